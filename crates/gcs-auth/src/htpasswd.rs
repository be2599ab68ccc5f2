//! htpasswd credential files and password hash verification.
//!
//! Each line holds `user:hash`. Supported hash formats:
//!
//! | Prefix | Scheme |
//! |---|---|
//! | `{SHA}` | base64-encoded SHA-1 |
//! | `$2a$`, `$2b$`, `$2x$`, `$2y$` | bcrypt |
//! | anything else (`$apr1$`, `$1$`) | MD5-crypt |

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest as _, Md5};
use sha1::Sha1;
use std::collections::HashMap;

use crate::file::{constant_time_eq, CredentialFormat};

const BCRYPT_PREFIXES: &[&str] = &["$2a$", "$2b$", "$2x$", "$2y$"];

/// Parsed htpasswd file.
#[derive(Debug, Clone, Default)]
pub struct Htpasswd {
    entries: HashMap<String, String>,
}

impl Htpasswd {
    /// Stored hash for a user.
    pub fn secret(&self, user: &str) -> Option<&str> {
        self.entries.get(user).map(String::as_str)
    }

    /// Number of users in the file.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the file has no users.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a user's password against the stored hash.
    pub fn verify(&self, user: &str, password: &str) -> bool {
        self.secret(user)
            .is_some_and(|secret| check_secret(password, secret))
    }
}

impl CredentialFormat for Htpasswd {
    fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_once(':'))
            .map(|(user, hash)| (user.to_string(), hash.to_string()))
            .collect();

        Self { entries }
    }
}

/// Check a plaintext password against an htpasswd hash.
pub fn check_secret(password: &str, secret: &str) -> bool {
    if let Some(encoded) = secret.strip_prefix("{SHA}") {
        let digest = Sha1::digest(password.as_bytes());
        return constant_time_eq(STANDARD.encode(digest).as_bytes(), encoded.as_bytes());
    }

    if BCRYPT_PREFIXES.iter().any(|p| secret.starts_with(p)) {
        return bcrypt::verify(password, secret).unwrap_or(false);
    }

    check_md5_crypt(password, secret)
}

fn check_md5_crypt(password: &str, secret: &str) -> bool {
    // "$magic$salt$hash"
    let parts: Vec<&str> = secret.splitn(4, '$').collect();
    if parts.len() != 4 || !parts[0].is_empty() {
        return false;
    }

    let magic = format!("${}$", parts[1]);
    let computed = md5_crypt(password.as_bytes(), parts[2].as_bytes(), magic.as_bytes());
    constant_time_eq(computed.as_bytes(), secret.as_bytes())
}

const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// MD5-crypt as used by `htpasswd -m` (`$apr1$`) and glibc (`$1$`).
pub(crate) fn md5_crypt(password: &[u8], salt: &[u8], magic: &[u8]) -> String {
    let mut ctx = Md5::new();
    ctx.update(password);
    ctx.update(magic);
    ctx.update(salt);

    let mut alt = Md5::new();
    alt.update(password);
    alt.update(salt);
    alt.update(password);
    let mixin = alt.finalize();

    for i in 0..password.len() {
        ctx.update([mixin[i % 16]]);
    }

    let mut i = password.len();
    while i != 0 {
        if i & 1 == 0 {
            ctx.update(&password[..1]);
        } else {
            ctx.update([0u8]);
        }
        i >>= 1;
    }

    let mut result = ctx.finalize();

    for round in 0..1000 {
        let mut round_ctx = Md5::new();
        if round & 1 == 0 {
            round_ctx.update(result);
        } else {
            round_ctx.update(password);
        }
        if round % 3 != 0 {
            round_ctx.update(salt);
        }
        if round % 7 != 0 {
            round_ctx.update(password);
        }
        if round & 1 == 0 {
            round_ctx.update(password);
        } else {
            round_ctx.update(result);
        }
        result = round_ctx.finalize();
    }

    let mut out = String::with_capacity(magic.len() + salt.len() + 23);
    out.push_str(&String::from_utf8_lossy(magic));
    out.push_str(&String::from_utf8_lossy(salt));
    out.push('$');

    let groups = [(0, 6, 12), (1, 7, 13), (2, 8, 14), (3, 9, 15), (4, 10, 5)];
    for (a, b, c) in groups {
        let v = (u32::from(result[a]) << 16) | (u32::from(result[b]) << 8) | u32::from(result[c]);
        push_itoa64(&mut out, v, 4);
    }
    push_itoa64(&mut out, u32::from(result[11]), 2);

    out
}

fn push_itoa64(out: &mut String, mut v: u32, n: usize) {
    for _ in 0..n {
        out.push(ITOA64[(v & 0x3f) as usize] as char);
        v >>= 6;
    }
}
