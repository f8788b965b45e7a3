//! Property-based test generators using proptest.

use omci_codec::{AlarmBitmap, AttributeMap, AttributeValue, ALARM_BITMAP_BITS};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Strategy for attribute names.
pub fn attribute_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,15}").expect("valid regex")
}

/// Strategy for attribute values that survive the default codec unchanged.
pub fn attribute_value_strategy() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        any::<u32>().prop_map(|v| AttributeValue::Unsigned(u64::from(v))),
        any::<bool>().prop_map(AttributeValue::Bool),
        prop::string::string_regex("[A-Za-z0-9]{0,12}")
            .expect("valid regex")
            .prop_map(AttributeValue::Text),
    ]
}

/// Strategy for non-empty attribute maps.
pub fn attribute_map_strategy() -> impl Strategy<Value = AttributeMap> {
    prop::collection::btree_map(attribute_name_strategy(), attribute_value_strategy(), 1..6)
}

/// Strategy for a MIB: instances keyed by (class id, instance id).
///
/// Class ids stay clear of ONT Data, which never appears in an upload.
pub fn mib_strategy() -> impl Strategy<Value = BTreeMap<(u16, u16), AttributeMap>> {
    prop::collection::btree_map((3u16..400, any::<u16>()), attribute_map_strategy(), 0..12)
}

/// Strategy for sets of alarm numbers.
pub fn alarm_numbers_strategy() -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..ALARM_BITMAP_BITS, 0..8)
}

/// Strategy for alarm bitmaps.
pub fn alarm_bitmap_strategy() -> impl Strategy<Value = AlarmBitmap> {
    alarm_numbers_strategy().prop_map(|alarms| {
        let alarms: Vec<usize> = alarms.into_iter().collect();
        AlarmBitmap::with_alarms(&alarms).expect("alarm numbers in range")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn bitmaps_hold_generated_alarms(alarms in alarm_numbers_strategy()) {
            let list: Vec<usize> = alarms.iter().copied().collect();
            let bitmap = AlarmBitmap::with_alarms(&list).unwrap();
            prop_assert_eq!(bitmap.raised(), alarms);
        }
    }
}
