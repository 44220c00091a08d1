// src/bits/bitstream.rs

use crate::utils::error::{Result, SperrError};
use byteorder::{ByteOrder, LittleEndian};

const WORD_BITS: usize = 64;

#[inline]
fn low_mask(n: u32) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

#[inline]
fn shr(v: u64, n: u32) -> u64 {
    if n >= 64 { 0 } else { v >> n }
}

#[inline]
fn shl(v: u64, n: u32) -> u64 {
    if n >= 64 { 0 } else { v << n }
}

/// A growable bit buffer with independent read and write cursors.
///
/// Bits are packed LSB-first into 64-bit words. The write cursor keeps a
/// pending word (`wbuffer`) that is merged into storage on `flush`, when it
/// fills up, or before any random access. Reads past the written region
/// yield zero bits.
#[derive(Debug, Clone, Default)]
pub struct BitStream {
    buf: Vec<u64>,
    // write cursor
    wptr: usize,
    wbuffer: u64,
    wbits: u32,
    // read cursor: `rptr` is the next word to load
    rptr: usize,
    rbuffer: u64,
    rbits: u32,
}

impl BitStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream able to hold `nbits` bits before growing.
    pub fn with_capacity(nbits: usize) -> Result<Self> {
        let mut stream = Self::new();
        stream.reserve(nbits)?;
        Ok(stream)
    }

    /// Capacity in bits, always a multiple of 64.
    pub fn capacity(&self) -> usize {
        self.buf.len() * WORD_BITS
    }

    /// Ensures room for at least `nbits` bits. Never shrinks.
    pub fn reserve(&mut self, nbits: usize) -> Result<()> {
        let words = nbits.div_ceil(WORD_BITS);
        if words > self.buf.len() {
            self.resize_words(words)?;
        }
        Ok(())
    }

    fn resize_words(&mut self, words: usize) -> Result<()> {
        let extra = words - self.buf.len();
        self.buf
            .try_reserve_exact(extra)
            .map_err(|_| SperrError::Allocation(words * 8))?;
        self.buf.resize(words, 0);
        Ok(())
    }

    /// Doubles the word count until the write word is addressable.
    fn ensure_write_word(&mut self) -> Result<()> {
        if self.wptr < self.buf.len() {
            return Ok(());
        }
        let mut words = self.buf.len().max(1);
        while words <= self.wptr {
            words *= 2;
        }
        self.resize_words(words)
    }

    /// The stored word at `idx` with any pending write bits overlaid.
    #[inline]
    fn word_at(&self, idx: usize) -> u64 {
        let stored = self.buf.get(idx).copied().unwrap_or(0);
        if idx == self.wptr && self.wbits > 0 {
            (stored & !low_mask(self.wbits)) | self.wbuffer
        } else {
            stored
        }
    }

    pub fn wtell(&self) -> usize {
        self.wptr * WORD_BITS + self.wbits as usize
    }

    pub fn rtell(&self) -> usize {
        self.rptr * WORD_BITS - self.rbits as usize
    }

    /// Merges pending write bits into storage and returns the number of bits written.
    /// Bits above the write cursor in the same word are preserved.
    pub fn flush(&mut self) -> usize {
        if self.wbits > 0 && self.wptr < self.buf.len() {
            let keep = self.buf[self.wptr] & !low_mask(self.wbits);
            self.buf[self.wptr] = keep | self.wbuffer;
        }
        self.wtell()
    }

    /// Resets both cursors to the beginning. Content and capacity are kept.
    pub fn rewind(&mut self) {
        self.flush();
        self.wptr = 0;
        self.wbuffer = 0;
        self.wbits = 0;
        self.rptr = 0;
        self.rbuffer = 0;
        self.rbits = 0;
    }

    pub fn wseek(&mut self, pos: usize) {
        self.flush();
        self.wptr = pos / WORD_BITS;
        self.wbits = (pos % WORD_BITS) as u32;
        self.wbuffer = self.buf.get(self.wptr).copied().unwrap_or(0) & low_mask(self.wbits);
    }

    pub fn rseek(&mut self, pos: usize) {
        let word = pos / WORD_BITS;
        let offset = (pos % WORD_BITS) as u32;
        if offset == 0 {
            self.rptr = word;
            self.rbuffer = 0;
            self.rbits = 0;
        } else {
            self.rbuffer = self.word_at(word) >> offset;
            self.rptr = word + 1;
            self.rbits = WORD_BITS as u32 - offset;
        }
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.ensure_write_word()?;
        self.wbuffer |= (bit as u64) << self.wbits;
        self.wbits += 1;
        if self.wbits == WORD_BITS as u32 {
            self.buf[self.wptr] = self.wbuffer;
            self.wptr += 1;
            self.wbuffer = 0;
            self.wbits = 0;
        }
        Ok(())
    }

    /// Writes the low `n` bits of `value`, least significant bit first.
    pub fn write_n_bits(&mut self, value: u64, n: u32) -> Result<()> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(());
        }
        self.ensure_write_word()?;
        let value = value & low_mask(n);
        let space = WORD_BITS as u32 - self.wbits;
        self.wbuffer |= value << self.wbits;
        if n < space {
            self.wbits += n;
            return Ok(());
        }
        self.buf[self.wptr] = self.wbuffer;
        self.wptr += 1;
        self.wbits = n - space;
        self.wbuffer = shr(value, space);
        if self.wbits > 0 {
            self.ensure_write_word()?;
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> bool {
        if self.rbits == 0 {
            self.rbuffer = self.word_at(self.rptr);
            self.rptr += 1;
            self.rbits = WORD_BITS as u32;
        }
        let bit = self.rbuffer & 1 == 1;
        self.rbuffer >>= 1;
        self.rbits -= 1;
        bit
    }

    /// Reads `n` bits; the first bit read lands in the least significant position.
    pub fn read_n_bits(&mut self, n: u32) -> u64 {
        debug_assert!(n <= 64);
        if n == 0 {
            return 0;
        }
        if n <= self.rbits {
            let value = self.rbuffer & low_mask(n);
            self.rbuffer = shr(self.rbuffer, n);
            self.rbits -= n;
            return value;
        }
        let have = self.rbits;
        let need = n - have;
        let next = self.word_at(self.rptr);
        self.rptr += 1;
        let value = (self.rbuffer & low_mask(have)) | shl(next & low_mask(need), have);
        self.rbuffer = shr(next, need);
        self.rbits = WORD_BITS as u32 - need;
        value
    }

    pub fn random_read_bit(&self, pos: usize) -> bool {
        (self.word_at(pos / WORD_BITS) >> (pos % WORD_BITS)) & 1 == 1
    }

    /// Sets or clears the bit at `pos`. Both cursors keep their positions
    /// and later reads observe the new value.
    pub fn random_write_bit(&mut self, bit: bool, pos: usize) -> Result<()> {
        self.flush();
        self.reserve(pos + 1)?;
        let word = pos / WORD_BITS;
        let mask = 1u64 << (pos % WORD_BITS);
        if bit {
            self.buf[word] |= mask;
        } else {
            self.buf[word] &= !mask;
        }
        if word == self.wptr {
            self.wbuffer = self.buf[word] & low_mask(self.wbits);
        }
        let rpos = self.rtell();
        self.rseek(rpos);
        Ok(())
    }

    /// True if any bit in `[start, start + len)` is set.
    pub fn test_range(&self, start: usize, len: usize) -> bool {
        if len == 0 {
            return false;
        }
        let end = start + len;
        let first = start / WORD_BITS;
        let last = (end - 1) / WORD_BITS;
        (first..=last).any(|idx| {
            let lo = if idx == first { (start % WORD_BITS) as u32 } else { 0 };
            let hi = if idx == last {
                (end - idx * WORD_BITS) as u32
            } else {
                WORD_BITS as u32
            };
            let mask = low_mask(hi) & !low_mask(lo);
            self.word_at(idx) & mask != 0
        })
    }

    /// Packs the first `num_bits` bits into exactly `ceil(num_bits / 8)` bytes.
    /// Words are laid out little-endian and unused tail bits are zero.
    pub fn get_bitstream(&self, num_bits: usize) -> Vec<u8> {
        let nwords = num_bits.div_ceil(WORD_BITS);
        let mut bytes = vec![0u8; nwords * 8];
        for (idx, chunk) in bytes.chunks_exact_mut(8).enumerate() {
            let mut word = self.word_at(idx);
            let remaining = num_bits - idx * WORD_BITS;
            if remaining < WORD_BITS {
                word &= low_mask(remaining as u32);
            }
            LittleEndian::write_u64(chunk, word);
        }
        bytes.truncate(num_bits.div_ceil(8));
        bytes
    }

    /// Replaces the content with `num_bits` bits unpacked from `bytes`.
    /// The read cursor is placed at 0 and the write cursor after the last bit.
    pub fn parse_bitstream(&mut self, bytes: &[u8], num_bits: usize) -> Result<()> {
        let required = num_bits.div_ceil(8);
        if bytes.len() < required {
            return Err(SperrError::TruncatedStream {
                available: bytes.len() * 8,
                required: num_bits,
            });
        }
        let nwords = num_bits.div_ceil(WORD_BITS);
        self.buf.clear();
        self.resize_words(nwords)?;
        for (idx, chunk) in bytes[..required].chunks(8).enumerate() {
            let mut padded = [0u8; 8];
            padded[..chunk.len()].copy_from_slice(chunk);
            self.buf[idx] = LittleEndian::read_u64(&padded);
        }
        let tail = (num_bits % WORD_BITS) as u32;
        if tail > 0 {
            self.buf[nwords - 1] &= low_mask(tail);
        }
        self.wbits = 0;
        self.wbuffer = 0;
        self.wptr = 0;
        self.wseek(num_bits);
        self.rseek(0);
        Ok(())
    }
}
