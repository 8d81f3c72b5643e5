//! Fingerprints of plans and merged rule sets.
//!
//! A fingerprint is the xxh64 of a value's JSON encoding, streamed straight
//! into the hasher. It is only meaningful for data whose encoding is
//! deterministic:
//!
//! - struct fields encode in declaration order
//! - collections are `Vec`, `BTreeMap` or `BTreeSet`, never hashed containers
//! - package ids are case-folded before they get here
//!
//! Two plans with the same fingerprint render identically.

use serde::Serialize;
use std::io;
use xxhash_rust::xxh64::Xxh64;

use crate::types::{Issue, OrderResult, PackageId, RelationReport};

/// Hasher seed. Changing it changes every fingerprint.
const SEED: u64 = 0;

/// `io::Write` adapter feeding an xxh64 state.
struct Digest(Xxh64);

impl io::Write for Digest {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Fingerprint of any deterministically encoded value, as 16 hex digits.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let mut digest = Digest(Xxh64::new(SEED));
    // String keys and no floats anywhere in fingerprinted types.
    serde_json::to_writer(&mut digest, value).expect("Fingerprinted value failed to encode");
    format!("{:016x}", digest.0.digest())
}

#[derive(Serialize)]
struct PlanDigest<'a> {
    order: &'a [PackageId],
    issues: &'a [Issue],
    relations: &'a [RelationReport],
}

impl OrderResult {
    /// Assemble a result and stamp its fingerprint.
    pub fn new(order: Vec<PackageId>, issues: Vec<Issue>, relations: Vec<RelationReport>) -> Self {
        let fingerprint = fingerprint(&PlanDigest {
            order: &order,
            issues: &issues,
            relations: &relations,
        });
        Self {
            order,
            issues,
            relations,
            fingerprint,
        }
    }

    /// Whether the stored fingerprint still matches the contents.
    pub fn verify_fingerprint(&self) -> bool {
        let expected = fingerprint(&PlanDigest {
            order: &self.order,
            issues: &self.issues,
            relations: &self.relations,
        });
        expected == self.fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IssueKind;
    use std::collections::BTreeMap;
    use xxhash_rust::xxh64::xxh64;

    fn id(s: &str) -> PackageId {
        PackageId::parse(s).unwrap()
    }

    #[test]
    fn test_streamed_digest_matches_one_shot_hash() {
        let order = vec![id("ludeon.rimworld"), id("brrainz.harmony")];
        let bytes = serde_json::to_vec(&order).unwrap();
        assert_eq!(fingerprint(&order), format!("{:016x}", xxh64(&bytes, SEED)));
    }

    #[test]
    fn test_map_insertion_order_does_not_matter() {
        let mut a = BTreeMap::new();
        a.insert(id("ludeon.rimworld"), 0);
        a.insert(id("brrainz.harmony"), 1);
        let mut b = BTreeMap::new();
        b.insert(id("brrainz.harmony"), 1);
        b.insert(id("ludeon.rimworld"), 0);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_order_result_fingerprint_tracks_contents() {
        let mut result = OrderResult::new(vec![id("a"), id("b")], Vec::new(), Vec::new());
        assert_eq!(result.fingerprint.len(), 16);
        assert!(result.verify_fingerprint());

        result.order.reverse();
        assert!(!result.verify_fingerprint());

        let flagged = OrderResult::new(
            vec![id("a"), id("b")],
            vec![Issue::new(IssueKind::Cycle, vec![id("a"), id("b")], None, "cycle")],
            Vec::new(),
        );
        assert_ne!(flagged.fingerprint, OrderResult::new(vec![id("a"), id("b")], Vec::new(), Vec::new()).fingerprint);
    }
}
