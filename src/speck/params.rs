use crate::utils::error::{Result, SperrError};

/// When a SPECK encode stops emitting bits.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StopCondition {
    /// Code every bitplane down to threshold 1.
    #[default]
    Lossless,
    /// Stop after exactly this many bits (or earlier if lossless is reached).
    BitBudget(usize),
    /// Stop once the reconstruction PSNR, relative to the data range, reaches this value in dB.
    TargetPsnr(f64),
}

/// Encoder configuration. At most one stop condition may be set; none means lossless.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EncoderParams {
    pub bit_budget: Option<usize>,
    pub target_psnr: Option<f64>,
}

impl EncoderParams {
    pub fn lossless() -> Self {
        Self::default()
    }

    pub fn with_bit_budget(bits: usize) -> Self {
        Self {
            bit_budget: Some(bits),
            ..Self::default()
        }
    }

    pub fn with_target_psnr(psnr: f64) -> Self {
        Self {
            target_psnr: Some(psnr),
            ..Self::default()
        }
    }

    pub fn stop_condition(&self) -> Result<StopCondition> {
        match (self.bit_budget, self.target_psnr) {
            (Some(_), Some(_)) => Err(SperrError::ConflictingStopConditions),
            (Some(bits), None) => Ok(StopCondition::BitBudget(bits)),
            (None, Some(psnr)) if psnr.is_finite() => Ok(StopCondition::TargetPsnr(psnr)),
            (None, Some(psnr)) => Err(SperrError::InvalidArg(format!(
                "target PSNR must be finite, got {}",
                psnr
            ))),
            (None, None) => Ok(StopCondition::Lossless),
        }
    }
}

impl TryFrom<EncoderParams> for StopCondition {
    type Error = SperrError;

    fn try_from(params: EncoderParams) -> Result<Self> {
        params.stop_condition()
    }
}
