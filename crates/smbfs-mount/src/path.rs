//! Server-relative share paths.

use std::fmt;

/// An absolute path inside the mounted share.
///
/// The root is `/`; every other path is built by appending a single name
/// component to a parent, so no path other than the root ends with `/` and
/// no component contains one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharePath(String);

impl SharePath {
    /// The share root, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Returns true for the share root.
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Appends a single name component.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty or contains a `/`. Names come from the
    /// kernel or from directory listings, neither of which may produce one.
    pub fn join(&self, name: &str) -> Self {
        assert!(
            !name.is_empty() && !name.contains('/'),
            "invalid path component {name:?}"
        );
        if self.is_root() {
            Self(format!("/{name}"))
        } else {
            Self(format!("{}/{name}", self.0))
        }
    }

    /// The final component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SharePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SharePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_from_root() {
        let path = SharePath::root().join("docs");
        assert_eq!(path.as_str(), "/docs");
        assert_eq!(path.join("a.txt").as_str(), "/docs/a.txt");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(SharePath::root().file_name(), None);
        assert_eq!(
            SharePath::root().join("d").join("f").file_name(),
            Some("f")
        );
    }

    #[test]
    #[should_panic(expected = "invalid path component")]
    fn test_join_rejects_separator() {
        let _ = SharePath::root().join("a/b");
    }

    #[test]
    #[should_panic(expected = "invalid path component")]
    fn test_join_rejects_empty() {
        let _ = SharePath::root().join("");
    }
}
