//! Cache key derivation.

use sha2::{Digest, Sha256};

use crate::domain::component::Attributes;

const DIGEST_HEX_LEN: usize = 32;

/// Default key: the type name plus a digest of the attribute pairs sorted by
/// name, so insertion order never affects the key.
pub fn default_cache_key(type_name: &str, attributes: &Attributes) -> String {
    let mut pairs: Vec<(&str, &str)> = attributes.iter().collect();
    pairs.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(type_name.as_bytes());
    for (name, value) in pairs {
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    let digest = hex::encode(hasher.finalize());
    format!("{type_name}:{}", &digest[..DIGEST_HEX_LEN])
}

/// Key for output that also depends on other components.
///
/// Dependency keys are sorted, so declaration order does not matter.
pub fn composite_key<I, S>(base_key: &str, dependency_keys: I) -> String
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut keys: Vec<String> = dependency_keys.into_iter().map(Into::into).collect();
    keys.sort_unstable();
    format!("{base_key}:deps:{}", keys.join(":"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_does_not_change_key() {
        let a = Attributes::new().with("tone", "info").with("label", "new");
        let b = Attributes::new().with("label", "new").with("tone", "info");
        assert_eq!(default_cache_key("Badge", &a), default_cache_key("Badge", &b));
    }

    #[test]
    fn changing_one_value_changes_key() {
        let a = Attributes::new().with("tone", "info").with("label", "new");
        let b = Attributes::new().with("tone", "warn").with("label", "new");
        assert_ne!(default_cache_key("Badge", &a), default_cache_key("Badge", &b));
    }

    #[test]
    fn type_name_participates_in_key() {
        let attributes = Attributes::new().with("label", "x");
        let badge = default_cache_key("Badge", &attributes);
        let card = default_cache_key("Card", &attributes);
        assert_ne!(badge, card);
        assert!(badge.starts_with("Badge:"));
    }

    #[test]
    fn pair_boundaries_are_unambiguous() {
        let a = Attributes::new().with("ab", "c");
        let b = Attributes::new().with("a", "bc");
        assert_ne!(default_cache_key("X", &a), default_cache_key("X", &b));
    }

    #[test]
    fn composite_key_sorts_dependencies() {
        let forward = composite_key("Card:1", ["Badge:b", "Badge:a"]);
        let reverse = composite_key("Card:1", ["Badge:a", "Badge:b"]);
        assert_eq!(forward, "Card:1:deps:Badge:a:Badge:b");
        assert_eq!(forward, reverse);
    }

    #[test]
    fn composite_key_without_dependencies() {
        let key = composite_key("Card:1", Vec::<String>::new());
        assert_eq!(key, "Card:1:deps:");
    }
}
