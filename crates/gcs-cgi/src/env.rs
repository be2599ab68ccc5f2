//! Child process environment with unique keys.

/// Ordered environment for a CGI child.
///
/// Keys are unique: [`set`](CgiEnv::set) replaces an earlier value, so the
/// child never sees the same variable twice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CgiEnv {
    vars: Vec<(String, String)>,
}

impl CgiEnv {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.vars.retain(|(k, _)| *k != key);
        self.vars.push((key, value.into()));
    }

    /// Builder form of [`set`](CgiEnv::set).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Value of a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether a variable is present (possibly with an empty value).
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Apply every variable of `other` on top of this environment.
    pub fn extend(&mut self, other: &CgiEnv) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    /// Variables in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the environment is empty.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CgiEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = CgiEnv::new();
        for (key, value) in iter {
            env.set(key, value);
        }
        env
    }
}
