//! Three-way comparison of a local mirror against the device.

use omci_codec::AttributeMap;
use std::collections::BTreeMap;

/// Keys present on only one side, and keys present on both whose values differ.
///
/// Used for MIB resync and reconcile (values are attribute maps) and for
/// alarm audits (values are bitmaps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayDiff<K> {
    /// Keys only the local side has.
    pub local_only: Vec<K>,
    /// Keys only the device has.
    pub remote_only: Vec<K>,
    /// Keys on both sides whose values differ.
    pub differing: Vec<K>,
}

impl<K: Ord + Clone> ThreeWayDiff<K> {
    /// Compares `local` with `remote`; `same` decides whether two values match.
    pub fn compute<L, R, F>(local: &BTreeMap<K, L>, remote: &BTreeMap<K, R>, mut same: F) -> Self
    where
        F: FnMut(&L, &R) -> bool,
    {
        let mut diff = Self {
            local_only: Vec::new(),
            remote_only: Vec::new(),
            differing: Vec::new(),
        };
        for (key, local_value) in local {
            match remote.get(key) {
                None => diff.local_only.push(key.clone()),
                Some(remote_value) if !same(local_value, remote_value) => {
                    diff.differing.push(key.clone());
                }
                Some(_) => {}
            }
        }
        diff.remote_only = remote
            .keys()
            .filter(|key| !local.contains_key(*key))
            .cloned()
            .collect();
        diff
    }

    /// Returns true if both sides agree.
    pub fn is_empty(&self) -> bool {
        self.local_only.is_empty() && self.remote_only.is_empty() && self.differing.is_empty()
    }

    /// Total number of keys in all buckets.
    pub fn len(&self) -> usize {
        self.local_only.len() + self.remote_only.len() + self.differing.len()
    }
}

/// True if every attribute in `reference` has the same value in `other`.
///
/// Attributes only `other` carries are ignored: a device upload does not
/// report every attribute the local side may hold.
pub fn attributes_match(reference: &AttributeMap, other: &AttributeMap) -> bool {
    reference
        .iter()
        .all(|(name, value)| other.get(name) == Some(value))
}

/// Attributes of `reference` whose value in `other` is missing or different.
pub fn changed_attributes(reference: &AttributeMap, other: &AttributeMap) -> AttributeMap {
    reference
        .iter()
        .filter(|(name, value)| other.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use omci_codec::AttributeValue;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn attrs(pairs: &[(&str, u64)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), AttributeValue::Unsigned(*v)))
            .collect()
    }

    #[test]
    fn classifies_each_bucket() {
        let local = BTreeMap::from([
            ((256, 0), attrs(&[("admin_state", 1)])),
            ((11, 257), attrs(&[("max_frame_size", 1518)])),
            ((6, 1), attrs(&[("type", 47)])),
        ]);
        let device = BTreeMap::from([
            ((256, 0), attrs(&[("admin_state", 0)])),
            ((6, 1), attrs(&[("type", 47)])),
            ((263, 32769), attrs(&[("total_tcont_number", 8)])),
        ]);

        let diff = ThreeWayDiff::compute(&local, &device, |l, d| attributes_match(d, l));
        assert_eq!(diff.local_only, vec![(11, 257)]);
        assert_eq!(diff.remote_only, vec![(263, 32769)]);
        assert_eq!(diff.differing, vec![(256, 0)]);
        assert_eq!(diff.len(), 3);
    }

    #[test]
    fn device_subset_matches() {
        let local = attrs(&[("admin_state", 1), ("operational_state", 0)]);
        let device = attrs(&[("admin_state", 1)]);
        assert!(attributes_match(&device, &local));
        assert!(!attributes_match(&local, &device));
        assert_eq!(changed_attributes(&local, &device), attrs(&[("operational_state", 0)]));
    }

    proptest! {
        #[test]
        fn buckets_partition_keys(
            local in prop::collection::btree_map(0u16..32, 0u8..4, 0..24),
            remote in prop::collection::btree_map(0u16..32, 0u8..4, 0..24),
        ) {
            let diff = ThreeWayDiff::compute(&local, &remote, |a, b| a == b);

            let local_only: BTreeSet<_> = diff.local_only.iter().copied().collect();
            let remote_only: BTreeSet<_> = diff.remote_only.iter().copied().collect();
            let differing: BTreeSet<_> = diff.differing.iter().copied().collect();
            prop_assert!(local_only.is_disjoint(&remote_only));
            prop_assert!(local_only.is_disjoint(&differing));
            prop_assert!(remote_only.is_disjoint(&differing));

            for key in local.keys().chain(remote.keys()) {
                let expected_in_diff = local.get(key) != remote.get(key);
                let in_diff = local_only.contains(key) || remote_only.contains(key) || differing.contains(key);
                prop_assert_eq!(expected_in_diff, in_diff);
            }

            let same = ThreeWayDiff::compute(&local, &local, |a, b| a == b);
            prop_assert!(same.is_empty());
        }
    }
}
