//! Property-based test generators for chat messages.
//!
//! Strategies produce [`Message`]s with valid codes and ids. Dates are
//! generated on a coarse grid so that batches can either share timestamps
//! (to exercise tie handling) or be forced distinct.

use std::sync::Arc;

use proptest::prelude::*;

use crate::chat_code::{ChatCode, ChatSource, ChatType};
use crate::chunk::Chunk;
use crate::message::Message;
use crate::timestamps::micros_to_datetime;

// ─── Configuration ───────────────────────────────────────────────────────────

/// Shared proptest configuration: 256 cases, generous shrink budget.
#[must_use]
pub fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 256,
        max_shrink_iters: 5000,
        ..ProptestConfig::default()
    }
}

// ─── Leaf strategies ─────────────────────────────────────────────────────────

pub fn arb_chat_type() -> impl Strategy<Value = ChatType> {
    proptest::sample::select(ChatType::ALL)
}

/// A single-bit source, as decoded from a raw code.
pub fn arb_source_bit() -> impl Strategy<Value = ChatSource> {
    (0_u16..11).prop_map(ChatSource::from_index)
}

/// Any source mask, including empty.
pub fn arb_source_mask() -> impl Strategy<Value = ChatSource> {
    any::<u16>().prop_map(ChatSource::from_bits_truncate)
}

/// Timestamp in microseconds within 2020..2030.
pub fn arb_date_micros() -> impl Strategy<Value = i64> {
    1_577_836_800_000_000_i64..1_893_456_000_000_000_i64
}

// ─── Composite strategies ────────────────────────────────────────────────────

/// A message with a fresh id and the given date.
#[must_use]
pub fn message_at(micros: i64, chat_type: ChatType, source: ChatSource) -> Arc<Message> {
    Arc::new(
        Message::builder(ChatCode::new(chat_type, source))
            .date(micros_to_datetime(micros))
            .content(vec![Chunk::text(format!("line@{micros}"))])
            .build(),
    )
}

pub fn arb_message() -> impl Strategy<Value = Arc<Message>> {
    (arb_date_micros(), arb_chat_type(), arb_source_bit())
        .prop_map(|(micros, chat_type, source)| message_at(micros, chat_type, source))
}

/// Up to `max_len` messages with distinct ids (dates may collide).
pub fn arb_messages(max_len: usize) -> impl Strategy<Value = Vec<Arc<Message>>> {
    proptest::collection::vec(arb_message(), 0..=max_len)
}

/// Up to `max_len` messages with pairwise distinct dates, in arbitrary order.
pub fn arb_messages_distinct_dates(max_len: usize) -> impl Strategy<Value = Vec<Arc<Message>>> {
    proptest::collection::btree_set(arb_date_micros(), 0..=max_len)
        .prop_flat_map(|dates| {
            let dates: Vec<i64> = dates.into_iter().collect();
            Just(dates).prop_shuffle()
        })
        .prop_map(|dates| {
            dates
                .into_iter()
                .map(|micros| message_at(micros, ChatType::Say, ChatSource::OTHER))
                .collect()
        })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #![proptest_config(proptest_config())]

        /// Generated sources always carry exactly one bit and encode into a code.
        #[test]
        fn proptest_source_bit_roundtrips_through_code(
            chat_type in arb_chat_type(),
            source in arb_source_bit(),
        ) {
            let code = ChatCode::new(chat_type, source);
            prop_assert_eq!(code.chat_type(), Some(chat_type));
            prop_assert_eq!(code.source(), source);
        }

        /// Distinct-date batches really are distinct.
        #[test]
        fn proptest_distinct_dates_are_distinct(batch in arb_messages_distinct_dates(64)) {
            let dates: HashSet<_> = batch.iter().map(|m| m.date()).collect();
            prop_assert_eq!(dates.len(), batch.len());
        }
    }
}
