/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fixed-size array of bits, used to summarize which votes or block parts are held.

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BitArray {
    bits: u32,
    elems: Vec<u64>,
}

impl BitArray {
    /// Create a `BitArray` of `bits` bits, all unset.
    pub fn new(bits: u32) -> BitArray {
        BitArray {
            bits,
            elems: vec![0; (bits as usize + 63) / 64],
        }
    }

    pub fn size(&self) -> u32 {
        self.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Get the bit at `index`. Out-of-range indices read as unset.
    pub fn get_index(&self, index: u32) -> bool {
        if index >= self.bits {
            return false;
        }
        self.elems[(index / 64) as usize] & (1u64 << (index % 64)) != 0
    }

    /// Set the bit at `index` to `value`. Returns `false` if `index` is out of range.
    pub fn set_index(&mut self, index: u32, value: bool) -> bool {
        if index >= self.bits {
            return false;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.elems[(index / 64) as usize] |= mask;
        } else {
            self.elems[(index / 64) as usize] &= !mask;
        }
        true
    }

    /// Number of set bits.
    pub fn count(&self) -> u32 {
        self.elems.iter().map(|elem| elem.count_ones()).sum()
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.bits
    }
}

#[test]
fn set_and_count_bits_test() {
    let mut bit_array = BitArray::new(130);
    assert!(bit_array.set_index(0, true));
    assert!(bit_array.set_index(64, true));
    assert!(bit_array.set_index(129, true));
    assert!(!bit_array.set_index(130, true));

    assert!(bit_array.get_index(64));
    assert!(!bit_array.get_index(65));
    assert_eq!(bit_array.count(), 3);

    bit_array.set_index(64, false);
    assert_eq!(bit_array.count(), 2);
    assert!(!bit_array.is_full());
}
