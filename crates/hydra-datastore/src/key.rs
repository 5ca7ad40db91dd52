//! Path-like datastore keys.

/// A cleaned `/seg1/seg2/...` key.
///
/// Empty segments collapse, so `"providers//x/"` becomes `/providers/x`.
/// The root key is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let mut out = String::with_capacity(raw.as_ref().len() + 1);
        for segment in raw.as_ref().split('/').filter(|s| !s.is_empty()) {
            out.push('/');
            out.push_str(segment);
        }
        if out.is_empty() {
            out.push('/');
        }
        Self(out)
    }

    /// The root key `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, without the root.
    pub fn namespaces(&self) -> Vec<&str> {
        self.0.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Last segment.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn child(&self, name: impl AsRef<str>) -> Key {
        Key::new(format!("{}/{}", self.0, name.as_ref()))
    }

    pub fn parent(&self) -> Key {
        match self.0.rfind('/') {
            Some(0) | None => Key::root(),
            Some(idx) => Key(self.0[..idx].to_string()),
        }
    }

    /// Whether `self` lies strictly below `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Key) -> bool {
        if ancestor.is_root() {
            return !self.is_root();
        }
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }

    /// Lower bound of the descendants in key order. Never a stored key, except
    /// for the root, which is not its own descendant.
    pub(crate) fn descendant_bound(&self) -> Key {
        Key(self.descendant_prefix())
    }

    /// Prefix every descendant's bytes start with.
    pub(crate) fn descendant_prefix(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("{}/", self.0)
        }
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::new(raw)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Key::new(raw)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
