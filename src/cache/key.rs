//! Cache key derivation.
//!
//! A key is either supplied verbatim by the caller or computed from the call's
//! argument list as `sha256(json(args))`, optionally namespaced as
//! `"<prefix>:<digest>"`.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Returns the lowercase hex SHA-256 digest of `input` (always 64 characters).
///
/// # Examples
///
/// ```
/// use reqcache::cache::hash_key;
///
/// let digest = hash_key(b"[1,2]");
/// assert_eq!(digest.len(), 64);
/// assert_eq!(digest, hash_key(b"[1,2]"));
/// ```
pub fn hash_key(input: impl AsRef<[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_ref());
    hex::encode(hasher.finalize())
}

/// Serializes `args` into the canonical argument list that auto-generated keys are
/// hashed from.
///
/// The result is always a JSON array:
///
/// - tuples, arrays and sequences are the argument list itself (`(1, 2)` → `[1,2]`);
/// - `()` and `None` are the empty list (`[]`);
/// - any other value is a single argument (`42` → `[42]`, same as `(42,)`).
///
/// The arguments go through [`serde_json::Value`] first, whose object maps are
/// ordered by key, so two maps with the same entries serialize identically no
/// matter how they were built.
///
/// # Examples
///
/// ```
/// use reqcache::cache::canonical_args;
///
/// assert_eq!(canonical_args(&()).unwrap(), "[]");
/// assert_eq!(canonical_args(&42).unwrap(), canonical_args(&(42,)).unwrap());
/// ```
pub fn canonical_args<A>(args: &A) -> Result<String, serde_json::Error>
where
    A: Serialize + ?Sized,
{
    let list = match serde_json::to_value(args)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    serde_json::to_string(&list)
}

/// Derives the cache key for one call.
///
/// # Arguments
///
/// - `key` — the explicit key; required (and non-empty) when `auto_key` is false,
///   ignored otherwise.
/// - `auto_key` — when true, the key is derived from `args`.
/// - `prefix` — namespace for derived keys; empty means no namespace.
/// - `args` — the call's argument list.
///
/// # Errors
///
/// - [`CacheError::Configuration`] if `auto_key` is false and `key` is absent or empty.
/// - [`CacheError::Arguments`] if `args` cannot be serialized.
pub fn derive_key<A>(
    key: Option<&str>,
    auto_key: bool,
    prefix: &str,
    args: &A,
) -> Result<String, CacheError>
where
    A: Serialize + ?Sized,
{
    if !auto_key {
        return match key {
            Some(key) if !key.is_empty() => Ok(key.to_owned()),
            _ => Err(CacheError::Configuration(
                "`key` is required when `auto_key` is false".to_owned(),
            )),
        };
    }

    let raw = canonical_args(args).map_err(CacheError::Arguments)?;
    let digest = hash_key(raw);

    if prefix.is_empty() {
        Ok(digest)
    } else {
        Ok(format!("{prefix}:{digest}"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;

    // ── hash_key ──────────────────────────────────────────────────────────────

    #[test]
    fn hash_key_matches_known_sha256() {
        assert_eq!(
            hash_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hash_key_is_lowercase_hex() {
        let digest = hash_key("hello");
        assert_eq!(digest.len(), 64);
        assert!(
            digest
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        );
    }

    // ── derive_key ────────────────────────────────────────────────────────────

    #[test]
    fn explicit_key_is_used_verbatim() {
        let key = derive_key(Some("users:42"), false, "ignored", &()).unwrap();
        assert_eq!(key, "users:42");
    }

    #[test]
    fn missing_key_is_a_configuration_error() {
        let err = derive_key(None, false, "", &()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("`key` is required"));
    }

    #[test]
    fn empty_key_is_a_configuration_error() {
        let err = derive_key(Some(""), false, "", &()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn auto_key_ignores_explicit_key() {
        let with = derive_key(Some("foo"), true, "", &(1, 2)).unwrap();
        let without = derive_key(None, true, "", &(1, 2)).unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn auto_key_hashes_json_arguments() {
        let key = derive_key(None, true, "myprefix", &(1, 2)).unwrap();
        assert_eq!(key, format!("myprefix:{}", hash_key("[1,2]")));
    }

    #[test]
    fn auto_key_without_prefix_is_bare_digest() {
        let key = derive_key(None, true, "", &("a", 1)).unwrap();
        assert_eq!(key.len(), 64);
        assert!(!key.contains(':'));
    }

    #[test]
    fn empty_arguments_hash_as_empty_list() {
        let key = derive_key(None, true, "", &()).unwrap();
        assert_eq!(key, hash_key("[]"));
        assert_eq!(key, derive_key(None, true, "", &Vec::<u8>::new()).unwrap());
    }

    #[test]
    fn single_argument_matches_one_element_tuple() {
        let bare = derive_key(None, true, "users", &42).unwrap();
        let tupled = derive_key(None, true, "users", &(42,)).unwrap();
        assert_eq!(bare, tupled);
        assert_eq!(bare, format!("users:{}", hash_key("[42]")));
    }

    #[test]
    fn unserializable_arguments_are_reported_without_a_key() {
        let args = BTreeMap::from([((1, 2), 3)]);
        let err = derive_key(None, true, "users", &args).unwrap_err();
        assert!(matches!(err, CacheError::Arguments(_)));
        assert!(!err.to_string().contains("users"));
    }

    #[test]
    fn different_arguments_produce_different_keys() {
        let a = derive_key(None, true, "p", &(1, 2)).unwrap();
        let b = derive_key(None, true, "p", &(2, 1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn different_prefixes_produce_different_keys() {
        let a = derive_key(None, true, "users", &[7]).unwrap();
        let b = derive_key(None, true, "posts", &[7]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn map_arguments_are_order_independent() {
        let mut hashed = HashMap::new();
        hashed.insert("b", 2);
        hashed.insert("a", 1);
        let mut sorted = BTreeMap::new();
        sorted.insert("a", 1);
        sorted.insert("b", 2);

        let a = derive_key(None, true, "", &[&hashed]).unwrap();
        let b = derive_key(None, true, "", &[&sorted]).unwrap();
        assert_eq!(a, b);
    }
}
