//! Logical key <-> storage path mapping

use certstore_core::{Key, StoragePath, SEPARATOR};

/// Joins a configured prefix in front of logical keys and strips it again
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMapper {
    /// Normalized prefix: no leading, trailing, or repeated separators
    prefix: String,
}

impl KeyMapper {
    /// Create a mapper for the given prefix (may be empty)
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: clean_join(&[prefix]),
        }
    }

    /// The normalized prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Map a logical key to its storage path
    ///
    /// Identity without a prefix; otherwise `prefix/key` with repeated
    /// separators collapsed.
    pub fn map(&self, key: &str) -> StoragePath {
        if self.prefix.is_empty() {
            return key.to_string();
        }
        clean_join(&[&self.prefix, key])
    }

    /// Map a listing prefix, keeping a trailing separator
    ///
    /// `map` drops the trailing separator, which would turn a directory
    /// listing of `a/` into a listing of the sibling-matching `a`.
    pub fn map_prefix(&self, prefix: &str) -> StoragePath {
        let mut path = self.map(prefix);
        let wants_separator = prefix.is_empty() || prefix.ends_with(SEPARATOR);
        if !self.prefix.is_empty() && wants_separator && !path.ends_with(SEPARATOR) {
            path.push(SEPARATOR);
        }
        path
    }

    /// Strip `prefix/` from the front of a storage path
    ///
    /// Paths outside the prefix are returned unchanged.
    pub fn unmap(&self, path: &str) -> Key {
        if self.prefix.is_empty() {
            return path.to_string();
        }
        path.strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix(SEPARATOR))
            .unwrap_or(path)
            .to_string()
    }
}

fn clean_join(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split(SEPARATOR))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_without_prefix() {
        let mapper = KeyMapper::new("");
        assert_eq!(mapper.map("certificates/example.com.crt"), "certificates/example.com.crt");
        assert_eq!(mapper.unmap("certificates/example.com.crt"), "certificates/example.com.crt");
    }

    #[test]
    fn test_map_with_prefix() {
        let mapper = KeyMapper::new("/caddy/");
        assert_eq!(mapper.prefix(), "caddy");
        assert_eq!(mapper.map("acme/account.json"), "caddy/acme/account.json");
        assert_eq!(mapper.map("//acme//account.json"), "caddy/acme/account.json");
        assert_eq!(mapper.unmap("caddy/acme/account.json"), "acme/account.json");
    }

    #[test]
    fn test_prefix_normalization() {
        let mapper = KeyMapper::new("a//b/");
        assert_eq!(mapper.prefix(), "a/b");
        assert_eq!(mapper.map("key"), "a/b/key");
    }

    #[test]
    fn test_unmap_outside_prefix_is_unchanged() {
        let mapper = KeyMapper::new("caddy");
        assert_eq!(mapper.unmap("other/file"), "other/file");
        assert_eq!(mapper.unmap("caddyfile"), "caddyfile");
    }

    #[test]
    fn test_round_trip() {
        for prefix in ["", "caddy", "/deep/nested/prefix/"] {
            let mapper = KeyMapper::new(prefix);
            for key in ["a", "a/x", "a/y/z", "certificates/acme/example.com/example.com.key"] {
                assert_eq!(mapper.unmap(&mapper.map(key)), key, "prefix {:?}", prefix);
            }
        }
    }

    #[test]
    fn test_map_prefix_keeps_directory_separator() {
        let mapper = KeyMapper::new("caddy");
        assert_eq!(mapper.map_prefix("a/"), "caddy/a/");
        assert_eq!(mapper.map_prefix("a"), "caddy/a");
        assert_eq!(mapper.map_prefix(""), "caddy/");

        let bare = KeyMapper::new("");
        assert_eq!(bare.map_prefix("a/"), "a/");
        assert_eq!(bare.map_prefix(""), "");
    }
}
