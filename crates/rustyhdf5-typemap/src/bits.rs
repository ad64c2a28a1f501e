//! Bit vectors packed into 64-bit words.

use std::fmt;

use bit_vec::BitVec;

use crate::error::{Result, TypeMapError};

/// Number of bits in one storage word.
pub const WORD_BITS: usize = 64;

/// Number of 64-bit words needed to hold `bits` bits.
///
/// Non-positive lengths are rejected.
pub fn bit_field_words(bits: i64) -> Result<usize> {
    if bits <= 0 {
        return Err(TypeMapError::InvalidLength {
            what: "bit field",
            length: bits,
        });
    }
    Ok((bits as usize).div_ceil(WORD_BITS))
}

/// A growable set of bit indices.
///
/// Two sets are equal when they contain the same set bits; trailing clear
/// bits (as left behind by word-aligned storage) carry no meaning.
#[derive(Clone, Default)]
pub struct BitSet {
    bits: BitVec,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set with the given bit indices set.
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        let mut set = Self::new();
        for i in indices {
            set.set(i, true);
        }
        set
    }

    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    pub fn set(&mut self, index: usize, value: bool) {
        if index >= self.bits.len() {
            if !value {
                return;
            }
            self.bits.grow(index + 1 - self.bits.len(), false);
        }
        self.bits.set(index, value);
    }

    /// Index of the highest set bit.
    pub fn highest_set_bit(&self) -> Option<usize> {
        (0..self.bits.len()).rev().find(|&i| self.get(i))
    }

    /// Logical length: highest set bit + 1, or 0 for an empty set.
    pub fn logical_len(&self) -> usize {
        self.highest_set_bit().map_or(0, |i| i + 1)
    }

    pub fn count_ones(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    pub fn is_empty(&self) -> bool {
        self.highest_set_bit().is_none()
    }

    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }

    /// Pack into exactly `words` little-endian-numbered 64-bit words
    /// (bit `i` lives in word `i / 64` at position `i % 64`).
    pub fn to_words(&self, words: usize) -> Vec<u64> {
        let mut out = vec![0u64; words];
        for i in self.ones() {
            if let Some(word) = out.get_mut(i / WORD_BITS) {
                *word |= 1u64 << (i % WORD_BITS);
            }
        }
        out
    }

    /// Unpack from 64-bit words.
    pub fn from_words(words: &[u64]) -> Self {
        let mut set = Self::new();
        for (w, &word) in words.iter().enumerate() {
            if word == 0 {
                continue;
            }
            for bit in 0..WORD_BITS {
                if word & (1u64 << bit) != 0 {
                    set.set(w * WORD_BITS + bit, true);
                }
            }
        }
        set
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        let len = self.logical_len();
        len == other.logical_len() && (0..len).all(|i| self.get(i) == other.get(i))
    }
}

impl Eq for BitSet {}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ones()).finish()
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self::from_indices(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 1)]
    #[case(63, 1)]
    #[case(64, 1)]
    #[case(65, 2)]
    #[case(128, 2)]
    #[case(129, 3)]
    fn words_for_bit_length(#[case] bits: i64, #[case] words: usize) {
        assert_eq!(bit_field_words(bits).unwrap(), words);
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    #[case(i64::MIN)]
    fn non_positive_bit_length_rejected(#[case] bits: i64) {
        assert!(matches!(
            bit_field_words(bits),
            Err(TypeMapError::InvalidLength { .. })
        ));
    }

    #[test]
    fn words_round_trip() {
        let set = BitSet::from_indices([0, 5, 63, 64, 100]);
        let words = set.to_words(2);
        assert_eq!(words[0], 1 | (1 << 5) | (1 << 63));
        assert_eq!(words[1], 1 | (1 << 36));
        assert_eq!(BitSet::from_words(&words), set);
    }

    #[test]
    fn trailing_clear_bits_do_not_affect_equality() {
        let mut a = BitSet::from_indices([3]);
        a.set(90, true);
        a.set(90, false);
        assert_eq!(a, BitSet::from_indices([3]));
        assert_eq!(a.logical_len(), 4);
    }

    #[test]
    fn empty_sets_are_equal() {
        assert_eq!(BitSet::new(), BitSet::from_words(&[0, 0, 0]));
        assert!(BitSet::new().is_empty());
        assert_eq!(BitSet::new().highest_set_bit(), None);
    }
}
