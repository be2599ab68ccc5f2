//! htdigest credential files (`user:realm:HA1`).

use std::collections::HashMap;

use crate::file::CredentialFormat;

/// Parsed htdigest file.
#[derive(Debug, Clone, Default)]
pub struct Htdigest {
    // realm -> user -> HA1
    realms: HashMap<String, HashMap<String, String>>,
}

impl Htdigest {
    /// HA1 (hex MD5 of `user:realm:password`) for a user in a realm.
    pub fn ha1(&self, user: &str, realm: &str) -> Option<&str> {
        self.realms
            .get(realm)
            .and_then(|users| users.get(user))
            .map(String::as_str)
    }

    /// Number of `user:realm` entries.
    pub fn len(&self) -> usize {
        self.realms.values().map(HashMap::len).sum()
    }

    /// Whether the file has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialFormat for Htdigest {
    fn parse(contents: &str) -> Self {
        let mut realms: HashMap<String, HashMap<String, String>> = HashMap::new();

        for line in contents.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.splitn(3, ':');
            let (Some(user), Some(realm), Some(ha1)) = (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            realms
                .entry(realm.to_string())
                .or_default()
                .insert(user.to_string(), ha1.to_lowercase());
        }

        Self { realms }
    }
}
