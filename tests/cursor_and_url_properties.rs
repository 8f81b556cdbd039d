#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

//! Property-based checks for the quantified invariants in `SPEC_FULL.md` §8:
//! cursor monotonicity under arbitrary ack ordering, and `parse_group_url`
//! round-tripping for arbitrary host/group_id/query-suffix combinations.

use group_client_core::cursor::CursorStore;
use group_client_core::ops::parse_group_url;
use proptest::prelude::*;

proptest! {
    /// For any sequence of `save_msg_cursor` calls, the store reads back the
    /// maximum value seen so far, regardless of call order.
    #[test]
    fn ack_sequence_reads_back_as_max(values in prop::collection::vec(0_i64..10_000, 1..50)) {
        let store = CursorStore::in_memory();
        let mut expected_max = 0_i64;
        for &value in &values {
            store.save_msg_cursor("g", value);
            expected_max = expected_max.max(value);
            prop_assert_eq!(store.load_cursor("g").0, expected_max);
        }
    }

    /// `parse_group_url` strips scheme, query, and fragment regardless of
    /// which suffix form accompanies the path, for any host/group_id with no
    /// internal slash or query/fragment delimiter.
    #[test]
    fn parse_group_url_round_trips(
        host in "[a-z][a-z0-9.]{0,20}",
        group_id in "[a-zA-Z0-9_-]{1,20}",
        suffix_idx in 0..5_usize,
    ) {
        let suffixes = ["", "?x=1", "#f", "?x=1#f", "/"];
        let url = format!("https://{host}/{group_id}{}", suffixes[suffix_idx]);
        let parsed = parse_group_url(&url).expect("well-formed host/group_id should parse");
        prop_assert_eq!(parsed.target_aid, host);
        prop_assert_eq!(parsed.group_id, group_id);
    }
}
