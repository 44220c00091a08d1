// src/speck/engine.rs

//! The bitplane loop shared by the SPECK encoder and decoder.
//!
//! Both directions run the same state machine over LIS/LIP/LSP; the encoder
//! decides each significance bit from its residuals and emits it, the decoder
//! reads it. Every bit goes through `put`/`get`, which enforce the budget, so
//! the two sides stop at the same bit.

use super::magnitude::{Magnitude, lowest_bitplane, max_coefficient_bits};
use super::set::{CoefficientSet, Dims, initial_sets, split_set, split_type_i};
use crate::bits::bitmask::Bitmask;
use crate::bits::bitstream::BitStream;
use crate::utils::error::{Result, SperrError, try_filled};
use log::debug;

/// Metadata a decoder needs to replay an encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeckInfo {
    pub dims: Dims,
    /// `⌊log2(max magnitude)⌋`, the first coded bitplane; `i32::MIN` when
    /// every magnitude is zero.
    pub max_coefficient_bits: i32,
    /// Bits produced by the encoder.
    pub num_bits: usize,
}

/// Limits on how many bits an encode or decode may touch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Budget {
    pub max_bits: usize,
    /// Encoder only: stop once the sum of squared residuals drops to this value.
    pub target_sse: Option<f64>,
}

impl Budget {
    pub fn bits(max_bits: usize) -> Self {
        Budget {
            max_bits,
            target_sse: None,
        }
    }
}

/// Why a pass stopped early.
enum Halt {
    /// The bit budget or quality target was met. Not an error.
    Budget,
    Fatal(SperrError),
}

impl From<SperrError> for Halt {
    fn from(err: SperrError) -> Self {
        Halt::Fatal(err)
    }
}

type Step<T = ()> = std::result::Result<T, Halt>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Encode,
    Decode,
}

struct SseTracker {
    sse: f64,
    target: f64,
}

struct SpeckEngine<'s, T: Magnitude> {
    mode: Mode,
    dims: Dims,
    // encoder: residual magnitudes; decoder: reconstructed magnitudes
    coeffs: Vec<T>,
    signs: Vec<bool>,
    lis: Vec<Vec<CoefficientSet>>,
    lip: Bitmask,
    lsp: Vec<usize>,
    set_i: CoefficientSet,
    threshold: T,
    stream: &'s mut BitStream,
    max_bits: usize,
    bits: usize,
    sse: Option<SseTracker>,
}

impl<'s, T: Magnitude> SpeckEngine<'s, T> {
    fn new(
        mode: Mode,
        dims: Dims,
        coeffs: Vec<T>,
        signs: Vec<bool>,
        stream: &'s mut BitStream,
        budget: Budget,
    ) -> Result<Self> {
        let (root, set_i) = initial_sets(&dims);
        let mut lip = Bitmask::try_new(dims.len())?;
        let mut lis = vec![Vec::new(); root.level as usize + 1];
        if root.is_pixel() {
            lip.wtrue(root.pixel_index(&dims));
        } else {
            lis[root.level as usize].push(root);
        }
        let sse = match (mode, budget.target_sse) {
            (Mode::Encode, Some(target)) => Some(SseTracker {
                sse: coeffs.iter().map(|c| c.to_f64() * c.to_f64()).sum(),
                target,
            }),
            _ => None,
        };
        Ok(SpeckEngine {
            mode,
            dims,
            coeffs,
            signs,
            lis,
            lip,
            lsp: Vec::new(),
            set_i,
            threshold: T::default(),
            stream,
            max_bits: budget.max_bits,
            bits: 0,
            sse,
        })
    }

    /// Codes bitplanes from `max_bitplane` down to `min_bitplane`.
    /// Returns false if a budget stopped it first.
    fn run(&mut self, max_bitplane: i32, min_bitplane: i32) -> Result<bool> {
        if max_bitplane < min_bitplane {
            return Ok(true);
        }
        if self.target_met() {
            return Ok(false);
        }
        for bitplane in (min_bitplane..=max_bitplane).rev() {
            self.threshold = T::pow2(bitplane);
            #[cfg(feature = "speck-trace")]
            log::trace!(
                "bitplane {}: lsp={} lip={} bits={}",
                bitplane,
                self.lsp.len(),
                self.lip.count_true(),
                self.bits
            );
            match self.code_bitplane() {
                Ok(()) => {}
                Err(Halt::Budget) => return Ok(false),
                Err(Halt::Fatal(err)) => return Err(err),
            }
        }
        Ok(true)
    }

    fn finish(self) -> (Vec<T>, Vec<bool>, usize) {
        (self.coeffs, self.signs, self.bits)
    }

    fn code_bitplane(&mut self) -> Step {
        self.refinement_pass()?;
        self.sorting_pass_lip()?;
        self.sorting_pass_lis()?;
        self.sorting_pass_type_i()
    }

    fn target_met(&self) -> bool {
        matches!(&self.sse, Some(tracker) if tracker.sse <= tracker.target)
    }

    fn put(&mut self, bit: bool) -> Step {
        if self.bits >= self.max_bits {
            return Err(Halt::Budget);
        }
        self.stream.write_bit(bit)?;
        self.bits += 1;
        if self.bits >= self.max_bits {
            return Err(Halt::Budget);
        }
        if self.target_met() {
            return Err(Halt::Budget);
        }
        Ok(())
    }

    fn get(&mut self) -> Step<bool> {
        if self.bits >= self.max_bits {
            return Err(Halt::Budget);
        }
        self.bits += 1;
        Ok(self.stream.read_bit())
    }

    /// Codes one significance decision. An inferred decision is known to both
    /// sides and costs no bit.
    fn decide(&mut self, inferred: bool, probe: impl FnOnce(&Self) -> bool) -> Step<bool> {
        if inferred {
            return Ok(true);
        }
        match self.mode {
            Mode::Encode => {
                let significant = probe(&*self);
                self.put(significant)?;
                Ok(significant)
            }
            Mode::Decode => self.get(),
        }
    }

    fn set_is_significant(&self, set: &CoefficientSet) -> bool {
        let threshold = self.threshold;
        set.any_index(&self.dims, |idx| self.coeffs[idx] >= threshold)
    }

    /// Encoder: take one threshold off a residual.
    fn subtract_threshold(&mut self, idx: usize) {
        let old = self.coeffs[idx];
        let new = old - self.threshold;
        self.coeffs[idx] = new;
        if let Some(tracker) = &mut self.sse {
            let (old, new) = (old.to_f64(), new.to_f64());
            tracker.sse += new * new - old * old;
        }
    }

    fn pixel_significant(&mut self, idx: usize) -> Step {
        self.lsp.push(idx);
        match self.mode {
            Mode::Encode => {
                self.subtract_threshold(idx);
                let positive = self.signs[idx];
                self.put(positive)
            }
            Mode::Decode => {
                let positive = self.get()?;
                self.signs[idx] = positive;
                self.coeffs[idx] = self.threshold;
                Ok(())
            }
        }
    }

    fn refinement_pass(&mut self) -> Step {
        // newly significant pixels are appended by the sorting passes that follow
        for k in 0..self.lsp.len() {
            let idx = self.lsp[k];
            match self.mode {
                Mode::Encode => {
                    let bit = self.coeffs[idx] >= self.threshold;
                    if bit {
                        self.subtract_threshold(idx);
                    }
                    self.put(bit)?;
                }
                Mode::Decode => {
                    if self.get()? {
                        self.coeffs[idx] = self.coeffs[idx] + self.threshold;
                    }
                }
            }
        }
        Ok(())
    }

    fn sorting_pass_lip(&mut self) -> Step {
        let threshold = self.threshold;
        for word_idx in 0..self.lip.num_words() {
            let mut word = self.lip.read_word(word_idx);
            while word != 0 {
                let idx = word_idx * 64 + word.trailing_zeros() as usize;
                word &= word - 1;
                if self.decide(false, |e| e.coeffs[idx] >= threshold)? {
                    self.lip.wfalse(idx);
                    self.pixel_significant(idx)?;
                }
            }
        }
        Ok(())
    }

    fn sorting_pass_lis(&mut self) -> Step {
        for level in (0..self.lis.len()).rev() {
            let sets = std::mem::take(&mut self.lis[level]);
            let mut kept = Vec::with_capacity(sets.len());
            for set in sets {
                if self.decide(false, |e| e.set_is_significant(&set))? {
                    self.drain(vec![set])?;
                } else {
                    kept.push(set);
                }
            }
            let added = std::mem::replace(&mut self.lis[level], kept);
            self.lis[level].extend(added);
        }
        Ok(())
    }

    fn sorting_pass_type_i(&mut self) -> Step {
        while !self.set_i.is_empty() {
            let set_i = self.set_i;
            if !self.decide(false, |e| e.set_is_significant(&set_i))? {
                break;
            }
            let bands = split_type_i(&mut self.set_i, &self.dims);
            let mut pending = Vec::new();
            for band in bands.as_slice() {
                self.code_offspring(band, false, &mut pending)?;
            }
            self.drain(pending)?;
        }
        Ok(())
    }

    /// Splits significant sets until the worklist is empty.
    fn drain(&mut self, mut pending: Vec<CoefficientSet>) -> Step {
        while let Some(parent) = pending.pop() {
            let offspring = split_set(&parent);
            let last = offspring.len().saturating_sub(1);
            let mut any_significant = false;
            for (k, child) in offspring.as_slice().iter().enumerate() {
                // a significant parent has a significant child
                let inferred = k == last && !any_significant;
                if self.code_offspring(child, inferred, &mut pending)? {
                    any_significant = true;
                }
            }
        }
        Ok(())
    }

    /// Tests one freshly split set. Significant non-pixel sets go to `pending`.
    fn code_offspring(
        &mut self,
        child: &CoefficientSet,
        inferred: bool,
        pending: &mut Vec<CoefficientSet>,
    ) -> Step<bool> {
        let threshold = self.threshold;
        if child.is_pixel() {
            let idx = child.pixel_index(&self.dims);
            let significant = self.decide(inferred, |e| e.coeffs[idx] >= threshold)?;
            if significant {
                self.pixel_significant(idx)?;
            } else {
                self.lip.wtrue(idx);
            }
            Ok(significant)
        } else {
            let significant = self.decide(inferred, |e| e.set_is_significant(child))?;
            if significant {
                pending.push(*child);
            } else {
                self.push_lis(*child);
            }
            Ok(significant)
        }
    }

    fn push_lis(&mut self, set: CoefficientSet) {
        let level = set.level as usize;
        if level >= self.lis.len() {
            self.lis.resize_with(level + 1, Vec::new);
        }
        self.lis[level].push(set);
    }
}

/// Encodes `magnitudes` with their `signs` (true = non-negative) into `stream`,
/// which is rewound first.
pub(crate) fn encode<T: Magnitude>(
    magnitudes: Vec<T>,
    signs: Vec<bool>,
    dims: Dims,
    budget: Budget,
    stream: &mut BitStream,
) -> Result<SpeckInfo> {
    dims.validate()?;
    if magnitudes.len() != dims.len() || signs.len() != dims.len() {
        return Err(SperrError::InvalidArg(format!(
            "expected {} coefficients for {:?}, got {} magnitudes and {} signs",
            dims.len(),
            dims.0,
            magnitudes.len(),
            signs.len()
        )));
    }
    let max_bits = max_coefficient_bits(&magnitudes);
    let min_bits = lowest_bitplane(&magnitudes);
    stream.rewind();
    let mut engine = SpeckEngine::new(Mode::Encode, dims, magnitudes, signs, stream, budget)?;
    let completed = engine.run(max_bits, min_bits)?;
    let (_, _, num_bits) = engine.finish();
    stream.flush();
    debug!(
        "SPECK encode {:?}: bitplanes {}..={} bits={} lossless={}",
        dims.0, min_bits, max_bits, num_bits, completed
    );
    Ok(SpeckInfo {
        dims,
        max_coefficient_bits: max_bits,
        num_bits,
    })
}

/// Decodes up to `budget` bits (all of them when `None`) from the start of `stream`.
/// Returns magnitudes, signs and the number of bits consumed.
///
/// The encoder's last bitplane is not transmitted, so decoding runs towards
/// `T::MIN_BITPLANE` and ends when the declared bits are used up.
pub(crate) fn decode<T: Magnitude>(
    info: &SpeckInfo,
    stream: &mut BitStream,
    budget: Option<usize>,
) -> Result<(Vec<T>, Vec<bool>, usize)> {
    info.dims.validate()?;
    match T::BITS {
        Some(width) if info.max_coefficient_bits >= width as i32 => {
            return Err(SperrError::WidthTooNarrow {
                bits: info.max_coefficient_bits,
                width,
            });
        }
        None if info.max_coefficient_bits > f64::MAX_EXP - 1 => {
            return Err(SperrError::CorruptHeader(format!(
                "max_coefficient_bits {} out of range",
                info.max_coefficient_bits
            )));
        }
        _ => {}
    }
    let required = budget.map_or(info.num_bits, |b| b.min(info.num_bits));
    let available = stream.wtell();
    if available < required {
        return Err(SperrError::TruncatedStream {
            available,
            required,
        });
    }
    stream.rseek(0);

    let n = info.dims.len();
    let mut engine = SpeckEngine::new(
        Mode::Decode,
        info.dims,
        try_filled(n, T::default())?,
        try_filled(n, true)?,
        stream,
        Budget::bits(required),
    )?;
    let completed = engine.run(info.max_coefficient_bits, T::MIN_BITPLANE)?;
    let (coeffs, signs, bits) = engine.finish();
    if completed && bits != info.num_bits {
        return Err(SperrError::ValidationError(format!(
            "stream finished after {} bits but declares {}",
            bits, info.num_bits
        )));
    }
    debug!(
        "SPECK decode {:?}: read {} of {} bits",
        info.dims.0, bits, info.num_bits
    );
    Ok((coeffs, signs, bits))
}
