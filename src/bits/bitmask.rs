use crate::utils::error::{Result, try_filled};
use bitvec::prelude::*;

/// A fixed-size bit mask packed into 64-bit words.
///
/// Word-level access is used by the SPECK engine to skip runs of clear bits.
/// All scans are bounded to the logical length; storage bits past it are masked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmask {
    bits: BitVec<u64, Lsb0>,
}

impl Bitmask {
    pub fn new(len: usize) -> Self {
        Self {
            bits: BitVec::repeat(false, len),
        }
    }

    /// Like [`Bitmask::new`], reporting allocation failure as an error.
    pub fn try_new(len: usize) -> Result<Self> {
        let mut bits = BitVec::from_vec(try_filled(len.div_ceil(64), 0u64)?);
        bits.truncate(len);
        Ok(Self { bits })
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of storage words backing the logical bits.
    pub fn num_words(&self) -> usize {
        self.bits.len().div_ceil(64)
    }

    /// Changes the logical size; new bits are false.
    pub fn resize(&mut self, len: usize) {
        self.bits.resize(len, false);
    }

    /// Clears every bit, keeping the size.
    pub fn reset(&mut self) {
        self.bits.fill(false);
    }

    pub fn rbit(&self, idx: usize) -> bool {
        self.bits[idx]
    }

    pub fn wbit(&mut self, idx: usize, value: bool) {
        self.bits.set(idx, value);
    }

    pub fn wtrue(&mut self, idx: usize) {
        self.bits.set(idx, true);
    }

    pub fn wfalse(&mut self, idx: usize) {
        self.bits.set(idx, false);
    }

    fn tail_mask(&self, word_idx: usize) -> u64 {
        let valid = self.bits.len().saturating_sub(word_idx * 64);
        if valid >= 64 { u64::MAX } else { (1u64 << valid) - 1 }
    }

    /// The 64 bits starting at `word_idx * 64`; bit `i` of the result is mask bit
    /// `word_idx * 64 + i`. Bits beyond the logical length read as zero.
    pub fn read_word(&self, word_idx: usize) -> u64 {
        self.bits.as_raw_slice()[word_idx] & self.tail_mask(word_idx)
    }

    pub fn write_word(&mut self, word_idx: usize, value: u64) {
        let value = value & self.tail_mask(word_idx);
        self.bits.as_raw_mut_slice()[word_idx] = value;
    }

    pub fn count_true(&self) -> usize {
        self.bits.count_ones()
    }

    /// True if any bit in `[start, start + len)` is set. The range is clipped to
    /// the logical size.
    pub fn has_true(&self, start: usize, len: usize) -> bool {
        let end = start.saturating_add(len).min(self.bits.len());
        if start >= end {
            return false;
        }
        self.bits[start..end].any()
    }

    /// Raw storage words, for bulk save.
    pub fn view_buffer(&self) -> &[u64] {
        self.bits.as_raw_slice()
    }

    /// Restores the mask from words previously obtained through `view_buffer`.
    pub fn use_bitstream(&mut self, words: &[u64]) {
        let n = self.num_words().min(words.len());
        for (idx, &word) in words.iter().take(n).enumerate() {
            self.write_word(idx, word);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_bits() {
        let mut mask = Bitmask::new(100);
        assert_eq!(mask.len(), 100);
        assert_eq!(mask.num_words(), 2);
        mask.wtrue(3);
        mask.wtrue(64);
        mask.wbit(99, true);
        assert!(mask.rbit(3));
        assert!(mask.rbit(99));
        assert_eq!(mask.count_true(), 3);
        mask.wfalse(3);
        assert!(!mask.rbit(3));
        assert_eq!(mask.read_word(1), 1 | (1 << 35));
        mask.reset();
        assert_eq!(mask.count_true(), 0);
        assert_eq!(mask.len(), 100);
    }

    #[test]
    fn test_try_new() {
        let mask = Bitmask::try_new(130).unwrap();
        assert_eq!(mask, Bitmask::new(130));
        assert_eq!(mask.num_words(), 3);
        assert!(Bitmask::try_new(usize::MAX).is_err());
    }

    #[test]
    fn test_write_word_masks_tail() {
        let mut mask = Bitmask::new(70);
        mask.write_word(1, u64::MAX);
        assert_eq!(mask.read_word(1), 0b11_1111);
        assert_eq!(mask.count_true(), 6);
    }

    #[test]
    fn test_has_true_single_bit() {
        let mut mask = Bitmask::new(200);
        mask.wtrue(127);
        for start in [0usize, 60, 64, 100, 127, 128, 150] {
            for len in [1usize, 5, 64, 65, 130] {
                let expected = start <= 127 && 127 < start + len;
                assert_eq!(mask.has_true(start, len), expected, "start {} len {}", start, len);
            }
        }
        assert!(!mask.has_true(190, 50));
    }

    #[test]
    fn test_resize_and_restore() {
        let mut mask = Bitmask::new(10);
        mask.wtrue(9);
        mask.resize(80);
        assert!(mask.rbit(9));
        assert!(!mask.has_true(10, 70));

        let saved = mask.view_buffer().to_vec();
        let mut other = Bitmask::new(80);
        other.use_bitstream(&saved);
        assert_eq!(other, mask);
    }
}
