// src/outlier/coder.rs

use super::uint_vec::{UIntVec, UIntWidth};
use crate::bits::bitstream::BitStream;
use crate::speck::engine::{self, Budget, SpeckInfo};
use crate::speck::set::Dims;
use crate::utils::error::{Result, SperrError};
use log::debug;

/// A position whose reconstruction error needs correcting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Outlier {
    pub pos: usize,
    pub err: f64,
}

impl Outlier {
    pub fn new(pos: usize, err: f64) -> Self {
        Outlier { pos, err }
    }
}

/// Everything needed to decode an outlier stream besides its bits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierInfo {
    pub width: UIntWidth,
    pub tolerance: f64,
    /// 1-D SPECK metadata; its length is the addressed array length.
    pub speck: SpeckInfo,
}

impl OutlierInfo {
    pub fn length(&self) -> usize {
        self.speck.dims.len()
    }
}

fn check_tolerance(tolerance: f64) -> Result<()> {
    if tolerance.is_finite() && tolerance > 0.0 {
        Ok(())
    } else {
        Err(SperrError::InvalidArg(format!(
            "tolerance must be positive and finite, got {}",
            tolerance
        )))
    }
}

/// Codes sparse corrections `{pos, err}` with `|err| >= tolerance` so that each
/// decoded correction is within `tolerance` of the original.
///
/// Errors are quantized to `round_ties_even(|err| / tolerance)` and the dense
/// magnitude array is coded with a 1-D SPECK pass at the narrowest integer width
/// that holds the largest magnitude.
#[derive(Debug, Clone)]
pub struct OutlierCoder {
    length: usize,
    tolerance: f64,
    outliers: Vec<Outlier>,
}

impl OutlierCoder {
    pub fn new(length: usize, tolerance: f64) -> Result<Self> {
        check_tolerance(tolerance)?;
        if length == 0 {
            return Err(SperrError::InvalidArg("outlier array length is zero".into()));
        }
        Ok(OutlierCoder {
            length,
            tolerance,
            outliers: Vec::new(),
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn add_outlier(&mut self, outlier: Outlier) {
        self.outliers.push(outlier);
    }

    pub fn outliers(&self) -> &[Outlier] {
        &self.outliers
    }

    fn quantize(&self) -> Result<(Vec<u64>, Vec<bool>)> {
        let mut magnitudes = vec![0u64; self.length];
        let mut signs = vec![true; self.length];
        for &Outlier { pos, err } in &self.outliers {
            if pos >= self.length {
                return Err(SperrError::InvalidArg(format!(
                    "outlier position {} outside length {}",
                    pos, self.length
                )));
            }
            if !err.is_finite() || err.abs() < self.tolerance {
                return Err(SperrError::InvalidArg(format!(
                    "outlier error {} at {} is not finite or below tolerance {}",
                    err, pos, self.tolerance
                )));
            }
            let mag = (err.abs() / self.tolerance).round_ties_even();
            if mag >= u64::MAX as f64 {
                return Err(SperrError::InvalidArg(format!(
                    "outlier error {} at {} is too large for tolerance {}",
                    err, pos, self.tolerance
                )));
            }
            if magnitudes[pos] != 0 {
                return Err(SperrError::InvalidArg(format!(
                    "duplicate outlier at position {}",
                    pos
                )));
            }
            magnitudes[pos] = mag as u64;
            signs[pos] = err >= 0.0;
        }
        Ok((magnitudes, signs))
    }

    /// Encodes the collected outliers into `stream`, which is rewound first.
    pub fn encode(&self, stream: &mut BitStream) -> Result<OutlierInfo> {
        let (magnitudes, signs) = self.quantize()?;
        let max = magnitudes.iter().copied().max().unwrap_or(0);
        let width = UIntWidth::for_max(max);
        let dims = Dims::new_1d(self.length);
        let budget = Budget::bits(usize::MAX);
        let speck = match UIntVec::narrow(&magnitudes, width) {
            UIntVec::U8(v) => engine::encode(v, signs, dims, budget, stream)?,
            UIntVec::U16(v) => engine::encode(v, signs, dims, budget, stream)?,
            UIntVec::U32(v) => engine::encode(v, signs, dims, budget, stream)?,
            UIntVec::U64(v) => engine::encode(v, signs, dims, budget, stream)?,
        };
        debug!(
            "Outlier encode: {} outliers over {} positions, {}-bit magnitudes, {} bits",
            self.outliers.len(),
            self.length,
            width.bits(),
            speck.num_bits
        );
        Ok(OutlierInfo {
            width,
            tolerance: self.tolerance,
            speck,
        })
    }

    /// Decodes an outlier stream into corrections, ordered by position.
    pub fn decode(info: &OutlierInfo, stream: &mut BitStream) -> Result<Vec<Outlier>> {
        if check_tolerance(info.tolerance).is_err() {
            return Err(SperrError::CorruptHeader(format!(
                "invalid outlier tolerance {}",
                info.tolerance
            )));
        }
        let (magnitudes, signs) = match info.width {
            UIntWidth::U8 => {
                let (m, s, _) = engine::decode::<u8>(&info.speck, stream, None)?;
                (UIntVec::U8(m), s)
            }
            UIntWidth::U16 => {
                let (m, s, _) = engine::decode::<u16>(&info.speck, stream, None)?;
                (UIntVec::U16(m), s)
            }
            UIntWidth::U32 => {
                let (m, s, _) = engine::decode::<u32>(&info.speck, stream, None)?;
                (UIntVec::U32(m), s)
            }
            UIntWidth::U64 => {
                let (m, s, _) = engine::decode::<u64>(&info.speck, stream, None)?;
                (UIntVec::U64(m), s)
            }
        };
        let outliers: Vec<Outlier> = (0..magnitudes.len())
            .filter_map(|pos| {
                let mag = magnitudes.get(pos);
                (mag != 0).then(|| {
                    let value = info.tolerance * mag as f64;
                    Outlier::new(pos, if signs[pos] { value } else { -value })
                })
            })
            .collect();
        debug!(
            "Outlier decode: {} outliers over {} positions",
            outliers.len(),
            info.length()
        );
        Ok(outliers)
    }
}
