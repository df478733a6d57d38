//! Property-based tests for the result encoder.
//!
//! These tests use proptest to verify:
//! - Bitstring shape for arbitrary row sets
//! - Bit membership against the canonical id list
//! - Order independence of encoding and light flags
//! - Case-insensitive light flag matching

#![cfg(test)]

use proptest::prelude::*;
use serde_json::{Value, json};

use crate::constants::{BITSTRING_LEN, CANONICAL_IDS};
use crate::encoder::{EncodedCommand, Row, encode, flags, value_text};

// =============================================================================
// Arbitrary Generators
// =============================================================================

fn arb_id() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        3 => (0i64..16).prop_map(|i| Some(json!(i))),
        2 => (0i64..16).prop_map(|i| Some(json!(i.to_string()))),
        1 => "[a-z0-9 ]{0,4}".prop_map(|s| Some(json!(s))),
        1 => Just(Some(Value::Null)),
        1 => Just(None),
    ]
}

fn arb_name() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        2 => prop::sample::select(vec!["light 1", "LIGHT 1", "Light 2", "light 2", "pizza", "cow"])
            .prop_map(|s| Some(json!(s))),
        1 => "[a-zA-Z0-9 ]{0,8}".prop_map(|s| Some(json!(s))),
        1 => Just(Some(Value::Null)),
        1 => Just(None),
    ]
}

prop_compose! {
    fn arb_row()(id in arb_id(), name in arb_name(), extra in any::<u8>()) -> Row {
        let mut row = Row::new();
        if let Some(id) = id {
            row.insert("id".into(), id);
        }
        if let Some(name) = name {
            row.insert("name".into(), name);
        }
        row.insert("extra".into(), json!(extra));
        row
    }
}

fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
    prop::collection::vec(arb_row(), 0..24)
}

fn row_has_id(row: &Row, canonical: &str) -> bool {
    row.get("id").and_then(value_text).as_deref() == Some(canonical)
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn bitstring_has_fixed_shape(rows in arb_rows()) {
        let bits = encode(&rows);
        prop_assert_eq!(bits.as_str().len(), BITSTRING_LEN);
        prop_assert!(bits.as_str().chars().all(|c| c == '0' || c == '1'));
    }

    #[test]
    fn bit_set_iff_canonical_id_present(rows in arb_rows()) {
        let bits = encode(&rows);
        for (position, canonical) in CANONICAL_IDS.iter().enumerate() {
            let present = rows.iter().any(|row| row_has_id(row, canonical));
            prop_assert_eq!(bits.is_set(position), present, "position {}", position);
        }
    }

    #[test]
    fn encoding_ignores_row_order(shuffled in arb_rows().prop_flat_map(|rows| {
        let original = rows.clone();
        Just(rows).prop_shuffle().prop_map(move |s| (original.clone(), s))
    })) {
        let (original, permuted) = shuffled;
        prop_assert_eq!(
            EncodedCommand::from_rows(&original),
            EncodedCommand::from_rows(&permuted)
        );
    }

    #[test]
    fn light_flag_matches_case_insensitively(rows in arb_rows()) {
        let expected = rows.iter().any(|row| {
            matches!(row.get("name"), Some(Value::String(name)) if name.to_lowercase() == "light 1")
        });
        prop_assert_eq!(flags(&rows, "light 1"), expected);
        prop_assert_eq!(flags(&rows, "LIGHT 1"), expected);
    }

    #[test]
    fn rows_without_names_never_light(ids in prop::collection::vec(arb_id(), 0..16)) {
        let rows: Vec<Row> = ids
            .into_iter()
            .map(|id| {
                let mut row = Row::new();
                if let Some(id) = id {
                    row.insert("id".into(), id);
                }
                row
            })
            .collect();
        prop_assert!(!flags(&rows, "light 1"));
        prop_assert!(!flags(&rows, "light 2"));
    }
}
