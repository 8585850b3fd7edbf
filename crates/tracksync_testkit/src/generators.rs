//! Property-based test generators using proptest.

use proptest::prelude::*;
use tracksync_protocol::{Fingerprint, FingerprintSet, SyncMode};

/// Strategy for canonical 64-hex fingerprints.
pub fn fingerprint_strategy() -> impl Strategy<Value = Fingerprint> {
    prop::array::uniform32(any::<u8>()).prop_map(|bytes| {
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Fingerprint::new(hex)
    })
}

/// Strategy for short fingerprints drawn from a small alphabet.
///
/// Collisions between independently generated sets are likely, which is what
/// overlap-heavy sync scenarios need.
pub fn small_fingerprint_strategy() -> impl Strategy<Value = Fingerprint> {
    (0u16..512).prop_map(|n| Fingerprint::new(format!("{n:04x}")))
}

/// Strategy for sets of up to `max_len` fingerprints.
pub fn fingerprint_set_strategy(max_len: usize) -> impl Strategy<Value = FingerprintSet> {
    prop::collection::vec(small_fingerprint_strategy(), 0..=max_len)
        .prop_map(|items| items.into_iter().collect())
}

/// Strategy for a local and a remote set that partially overlap.
pub fn overlapping_sets_strategy(
    max_len: usize,
) -> impl Strategy<Value = (FingerprintSet, FingerprintSet)> {
    (
        fingerprint_set_strategy(max_len),
        fingerprint_set_strategy(max_len),
        fingerprint_set_strategy(max_len / 2),
    )
        .prop_map(|(mut local, mut remote, shared)| {
            local.union_with(&shared);
            remote.union_with(&shared);
            (local, remote)
        })
}

/// Strategy for sync modes.
pub fn sync_mode_strategy() -> impl Strategy<Value = SyncMode> {
    prop_oneof![Just(SyncMode::Pcm), Just(SyncMode::File)]
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_fingerprints_parse(fp in fingerprint_strategy()) {
            prop_assert_eq!(fp.as_str().len(), 64);
            prop_assert!(Fingerprint::parse(fp.as_str()).is_ok());
        }

        #[test]
        fn overlapping_sets_share_items((local, remote) in overlapping_sets_strategy(20)) {
            prop_assert!(local.len() <= 30);
            prop_assert!(remote.len() <= 30);
        }
    }
}
