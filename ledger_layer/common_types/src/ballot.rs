//   Copyright 2024 The Meridian Project
//   SPDX-License-Identifier: BSD-3-Clause

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValueHash;

/// A `(counter, value)` candidate within a slot. Ordering is lexicographic
/// over `(counter, value_hash)`, which the field order lets `derive` supply.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub counter: u32,
    pub value_hash: ValueHash,
}

impl Ballot {
    pub const fn new(counter: u32, value_hash: ValueHash) -> Self {
        Self { counter, value_hash }
    }

    /// Two ballots are compatible iff they carry the same value.
    pub fn is_compatible(&self, other: &Ballot) -> bool {
        self.value_hash == other.value_hash
    }

    /// The next ballot for `value_hash`, one counter above this one.
    pub fn successor(&self, value_hash: ValueHash) -> Ballot {
        Ballot::new(self.counter + 1, value_hash)
    }

    /// Same value, counter bumped by one.
    pub fn bumped(&self) -> Ballot {
        Ballot::new(self.counter + 1, self.value_hash)
    }
}

impl Display for Ballot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let hash = self.value_hash.as_bytes();
        write!(
            f,
            "({}, {:02x}{:02x}{:02x}{:02x})",
            self.counter, hash[0], hash[1], hash[2], hash[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vh(b: u8) -> ValueHash {
        ValueHash::from([b; 32])
    }

    #[test]
    fn orders_by_counter_then_value_hash() {
        let low = Ballot::new(1, vh(0xff));
        let high = Ballot::new(2, vh(0x00));
        assert!(low < high);

        let a = Ballot::new(2, vh(0x01));
        let b = Ballot::new(2, vh(0x02));
        assert!(a < b);
    }

    #[test]
    fn compatibility_ignores_counter() {
        let a = Ballot::new(1, vh(0xaa));
        let b = Ballot::new(9, vh(0xaa));
        let c = Ballot::new(1, vh(0xbb));
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn successor_bumps_counter() {
        let a = Ballot::new(3, vh(0xaa));
        assert_eq!(a.successor(vh(0xbb)), Ballot::new(4, vh(0xbb)));
        assert_eq!(a.bumped(), Ballot::new(4, vh(0xaa)));
    }
}
