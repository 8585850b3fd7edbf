//! Canonical collection hashing.

use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// `SHA-256("")`, the hash of the empty collection.
pub const EMPTY_COLLECTION_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Computes the canonical hash of a fingerprint collection.
///
/// Entries are lowercased, deduplicated, sorted ascending and concatenated
/// without a separator; the result is the lowercase hex SHA-256 of that
/// string. This must match the server bit for bit.
pub fn collection_hash<I, S>(fingerprints: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let canonical: BTreeSet<String> = fingerprints
        .into_iter()
        .map(|fp| fp.as_ref().to_ascii_lowercase())
        .collect();

    let mut hasher = Sha256::new();
    for fp in &canonical {
        hasher.update(fp.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_hash_is_sha256_of_empty_string() {
        let empty: [&str; 0] = [];
        assert_eq!(collection_hash(empty), EMPTY_COLLECTION_HASH);
        assert_eq!(hex::encode(Sha256::digest(b"")), EMPTY_COLLECTION_HASH);
    }

    #[test]
    fn hash_is_case_insensitive() {
        assert_eq!(collection_hash(["AB"]), collection_hash(["ab"]));
    }

    #[test]
    fn hash_is_order_insensitive() {
        assert_eq!(collection_hash(["a", "b"]), collection_hash(["b", "a"]));
    }

    #[test]
    fn hash_matches_manual_concatenation() {
        let expected = hex::encode(Sha256::digest(b"aa11bb22cc33"));
        assert_eq!(collection_hash(["cc33", "AA11", "bb22"]), expected);
    }

    #[test]
    fn hash_is_lowercase_hex() {
        let hash = collection_hash(["ff00"]);
        assert_eq!(hash.len(), 64);
        assert!(hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)));
    }

    proptest! {
        #[test]
        fn hash_ignores_permutation(mut items in prop::collection::vec("[0-9a-fA-F]{4,16}", 0..32)) {
            let forward = collection_hash(&items);
            items.reverse();
            prop_assert_eq!(forward, collection_hash(&items));
        }

        #[test]
        fn hash_ignores_case(items in prop::collection::vec("[0-9a-f]{4,16}", 0..32)) {
            let upper: Vec<String> = items.iter().map(|s| s.to_ascii_uppercase()).collect();
            prop_assert_eq!(collection_hash(&items), collection_hash(&upper));
        }
    }
}
