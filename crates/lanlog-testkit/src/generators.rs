//! Proptest generators for property-based testing.

use std::collections::BTreeSet;

use proptest::prelude::*;

use lanlog_store::LogStore;

use crate::fixtures::{placeholder, record};

/// The shape of one log as a device holds it: a head and the holes below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogShape {
    pub head: u64,
    pub holes: BTreeSet<u64>,
}

impl LogShape {
    /// Sequences holding a real record.
    pub fn present(&self) -> impl Iterator<Item = u64> + '_ {
        (1..=self.head).filter(|s| !self.holes.contains(s))
    }

    /// Write the shape into `store` as `user`'s log, holes as placeholders.
    ///
    /// # Panics
    /// If the store fails.
    pub async fn apply<S: LogStore + ?Sized>(&self, store: &S, user: &str) {
        for seq in 1..=self.head {
            let r = if self.holes.contains(&seq) {
                placeholder(user, seq, "observer")
            } else {
                record(user, seq)
            };
            store.insert_if_absent(&r).await.expect("applying log shape failed");
        }
    }
}

/// A log whose head is in `1..=max_head` and whose holes are strictly below
/// the head.
pub fn log_with_holes(max_head: u64) -> impl Strategy<Value = LogShape> {
    (1..=max_head.max(1)).prop_flat_map(|head| {
        let holes = if head > 1 {
            prop::collection::btree_set(1..head, 0..(head as usize).min(8)).boxed()
        } else {
            Just(BTreeSet::new()).boxed()
        };
        holes.prop_map(move |holes| LogShape { head, holes })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn holes_stay_below_head(shape in log_with_holes(40)) {
            prop_assert!(shape.holes.iter().all(|h| *h >= 1 && *h < shape.head));
            prop_assert_eq!(
                shape.present().count() + shape.holes.len(),
                shape.head as usize
            );
        }
    }
}
