//! HTTP Digest authentication (RFC 2617, `algorithm=MD5`, `qop=auth`).
//!
//! Every challenge issues a fresh server nonce. Nonces are remembered in a
//! bounded table together with the highest nonce count seen, so a replayed
//! `nc` for a known nonce is rejected. When the table grows past
//! [`DIGEST_CLIENT_CACHE_SIZE`] + [`DIGEST_CLIENT_CACHE_TOLERANCE`] entries,
//! the least recently used nonces are dropped.

use md5::{Digest as _, Md5};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::authenticator::{quote_realm, AuthRequest, Challenge, Grant, Identity};
use crate::error::Result;
use crate::file::{constant_time_eq, CredentialFile};
use crate::htdigest::Htdigest;

/// Nonce table size before purging starts.
pub const DIGEST_CLIENT_CACHE_SIZE: usize = 1000;

/// Nonce table slack; a purge drops twice this many entries.
pub const DIGEST_CLIENT_CACHE_TOLERANCE: usize = 100;

#[derive(Debug, Clone, Copy)]
struct DigestClient {
    nc: u64,
    last_seen: Instant,
}

/// Digest authenticator backed by an htdigest file.
pub struct DigestAuth {
    realm: String,
    opaque: String,
    secrets: CredentialFile<Htdigest>,
    clients: Mutex<HashMap<String, DigestClient>>,
    cache_size: usize,
    cache_tolerance: usize,
}

impl DigestAuth {
    /// Create an authenticator for `realm` reading HA1 values from `htdigest`.
    pub fn new(realm: impl Into<String>, htdigest: impl Into<PathBuf>) -> Result<Self> {
        let realm = quote_realm(realm.into())?;
        let secrets: CredentialFile<Htdigest> = CredentialFile::open(htdigest)?;

        tracing::debug!(
            path = %secrets.path().display(),
            entries = secrets.current().len(),
            "Loaded htdigest file"
        );

        Ok(Self {
            realm,
            opaque: random_key(),
            secrets,
            clients: Mutex::new(HashMap::new()),
            cache_size: DIGEST_CLIENT_CACHE_SIZE,
            cache_tolerance: DIGEST_CLIENT_CACHE_TOLERANCE,
        })
    }

    /// Override the nonce table bounds.
    pub fn with_cache_limits(mut self, size: usize, tolerance: usize) -> Self {
        self.cache_size = size;
        self.cache_tolerance = tolerance;
        self
    }

    /// The realm announced in challenges.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Number of nonces currently tracked.
    pub fn tracked_nonces(&self) -> usize {
        self.clients.lock().len()
    }

    /// Check the request's credentials.
    pub fn authenticate(&self, request: &AuthRequest<'_>) -> std::result::Result<Grant, Challenge> {
        match self.check(request) {
            Some((user, info)) => Ok(Grant::new(Identity::new(user)).with_authentication_info(info)),
            None => Err(self.challenge()),
        }
    }

    fn check(&self, request: &AuthRequest<'_>) -> Option<(String, String)> {
        let params = parse_digest(request.authorization?)?;
        let param = |key: &str| params.get(key).map(String::as_str);

        // An absent algorithm means MD5.
        let algorithm = param("algorithm").unwrap_or("MD5");
        if param("opaque")? != self.opaque || algorithm != "MD5" || param("qop")? != "auth" {
            return None;
        }

        let uri = param("uri")?;
        if uri != request.uri && path_of(uri) != path_of(request.uri) {
            return None;
        }

        let username = param("username")?;
        let nonce = param("nonce")?;
        let nc = param("nc")?;
        let cnonce = param("cnonce")?;
        let qop = param("qop")?;
        let response = param("response")?;

        let secrets = self.secrets.current();
        let ha1 = secrets
            .ha1(username, &self.realm)
            .filter(|ha1| !ha1.is_empty())?;
        let ha2 = md5_hex(&format!("{}:{}", request.method, uri));
        let expected = md5_hex(&[ha1, nonce, nc, cnonce, qop, &ha2].join(":"));
        if !constant_time_eq(expected.as_bytes(), response.as_bytes()) {
            return None;
        }

        let count = u64::from_str_radix(nc, 16).ok()?;
        {
            let mut clients = self.clients.lock();
            let client = clients.get_mut(nonce)?;
            if client.nc != 0 && client.nc >= count {
                tracing::debug!(user = %username, "Rejected replayed digest nonce count");
                return None;
            }
            client.nc = count;
            client.last_seen = Instant::now();
        }

        let resp_ha2 = md5_hex(&format!(":{uri}"));
        let rspauth = md5_hex(&[ha1, nonce, nc, cnonce, qop, &resp_ha2].join(":"));
        let info = format!("qop=\"auth\", rspauth=\"{rspauth}\", cnonce=\"{cnonce}\", nc=\"{nc}\"");

        Some((username.to_string(), info))
    }

    fn challenge(&self) -> Challenge {
        let nonce = random_key();

        {
            let mut clients = self.clients.lock();
            if clients.len() > self.cache_size + self.cache_tolerance {
                purge(&mut clients, self.cache_tolerance * 2);
            }
            clients.insert(
                nonce.clone(),
                DigestClient {
                    nc: 0,
                    last_seen: Instant::now(),
                },
            );
        }

        Challenge::new(format!(
            "Digest realm=\"{}\", nonce=\"{}\", opaque=\"{}\", algorithm=MD5, qop=\"auth\"",
            self.realm, nonce, self.opaque
        ))
    }
}

/// Drop the `count` least recently seen nonces.
fn purge(clients: &mut HashMap<String, DigestClient>, count: usize) {
    let mut by_age: Vec<(Instant, String)> = clients
        .iter()
        .map(|(nonce, client)| (client.last_seen, nonce.clone()))
        .collect();
    by_age.sort_unstable();

    for (_, nonce) in by_age.into_iter().take(count) {
        clients.remove(&nonce);
    }
}

fn path_of(uri: &str) -> &str {
    uri.split_once('?').map_or(uri, |(path, _)| path)
}

fn md5_hex(input: &str) -> String {
    hex::encode(Md5::digest(input.as_bytes()))
}

fn random_key() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Parse `Digest k=v, k="v", ...`.
fn parse_digest(header: &str) -> Option<HashMap<String, String>> {
    let (scheme, rest) = header.split_once(' ')?;
    if scheme != "Digest" {
        return None;
    }
    Some(parse_pairs(rest))
}

/// Parse a comma separated list of `key=value` pairs with optionally quoted values.
pub(crate) fn parse_pairs(input: &str) -> HashMap<String, String> {
    let mut pairs = HashMap::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().to_string();
        let after = after.trim_start();

        let value = if let Some(quoted) = after.strip_prefix('"') {
            let mut value = String::new();
            let mut escaped = false;
            let mut end = None;
            for (i, c) in quoted.char_indices() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = Some(i + 1);
                    break;
                } else {
                    value.push(c);
                }
            }
            rest = end.map_or("", |end| &quoted[end..]);
            value
        } else {
            let end = after.find(',').unwrap_or(after.len());
            rest = &after[end..];
            after[..end].trim().to_string()
        };

        pairs.insert(key, value);
    }

    pairs
}
