use super::engine::{self, Budget, SpeckInfo};
use super::params::StopCondition;
use super::set::Dims;
use crate::bits::bitstream::BitStream;
use crate::utils::error::{Result, SperrError};

/// A (possibly partial) decode of real-valued coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconstruction {
    /// Signed values; elements never reached stay 0.
    pub coeffs: Vec<f64>,
    /// True where the coefficient is non-negative.
    pub signs: Vec<bool>,
    pub bits_read: usize,
}

/// Target sum of squared errors for a PSNR relative to the data range.
fn target_sse(coeffs: &[f64], psnr: f64) -> f64 {
    let (min, max) = coeffs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &c| (lo.min(c), hi.max(c)));
    let range = max - min;
    let mse = range * range / 10f64.powf(psnr / 10.0);
    mse * coeffs.len() as f64
}

/// Encodes real coefficients into `stream` (rewound first).
///
/// A lossless encode codes down to the finest set bit of any coefficient and
/// reproduces every finite input exactly. Shorter encodes truncate toward zero
/// at the last coded bitplane.
pub fn encode_coefficients(
    coeffs: &[f64],
    dims: Dims,
    stop: StopCondition,
    stream: &mut BitStream,
) -> Result<SpeckInfo> {
    dims.validate()?;
    if coeffs.len() != dims.len() {
        return Err(SperrError::InvalidArg(format!(
            "{} coefficients do not fill dimensions {:?}",
            coeffs.len(),
            dims.0
        )));
    }
    if let Some(pos) = coeffs.iter().position(|c| !c.is_finite()) {
        return Err(SperrError::InvalidArg(format!(
            "non-finite coefficient at index {}",
            pos
        )));
    }
    let budget = match stop {
        StopCondition::Lossless => Budget::bits(usize::MAX),
        StopCondition::BitBudget(bits) => Budget::bits(bits),
        StopCondition::TargetPsnr(psnr) => Budget {
            max_bits: usize::MAX,
            target_sse: Some(target_sse(coeffs, psnr)),
        },
    };
    let magnitudes: Vec<f64> = coeffs.iter().map(|c| c.abs()).collect();
    let signs: Vec<bool> = coeffs.iter().map(|&c| c >= 0.0).collect();
    engine::encode(magnitudes, signs, dims, budget, stream)
}

/// Decodes at most `budget` bits (all when `None`) of a stream produced by
/// [`encode_coefficients`].
pub fn decode_coefficients(
    info: &SpeckInfo,
    stream: &mut BitStream,
    budget: Option<usize>,
) -> Result<Reconstruction> {
    let (mut coeffs, signs, bits_read) = engine::decode::<f64>(info, stream, budget)?;
    for (c, &positive) in coeffs.iter_mut().zip(&signs) {
        if !positive {
            *c = -*c;
        }
    }
    Ok(Reconstruction {
        coeffs,
        signs,
        bits_read,
    })
}
