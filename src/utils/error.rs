use std::io;
use thiserror::Error;

/// Main error type for the SPECK / outlier coding library.
#[derive(Error, Debug)]
pub enum SperrError {
    /// An I/O error occurred while writing or reading a container
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// An invalid argument was provided
    #[error("Invalid argument: {0}")]
    InvalidArg(String),
    /// More than one stop condition was requested for a single encode
    #[error("Conflicting stop conditions: bit budget and target PSNR are both set")]
    ConflictingStopConditions,
    /// Growing a buffer failed
    #[error("Allocation of {0} bytes failed")]
    Allocation(usize),
    /// Fewer bits are available than the decode requires
    #[error("Truncated stream: {available} bits available, {required} required")]
    TruncatedStream { available: usize, required: usize },
    /// A header field is inconsistent with the data it describes
    #[error("Corrupt header: {0}")]
    CorruptHeader(String),
    /// The decoded bitplane count does not fit the magnitude type
    #[error("Magnitude width too narrow: {bits} bitplanes exceed a {width}-bit type")]
    WidthTooNarrow { bits: i32, width: u32 },
    /// Decoded data failed a consistency check
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl SperrError {
    /// True for errors caused by the bytes being decoded rather than by the caller.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            SperrError::TruncatedStream { .. }
                | SperrError::CorruptHeader(_)
                | SperrError::WidthTooNarrow { .. }
                | SperrError::ValidationError(_)
        )
    }
}

/// A specialized `Result` type for coding operations.
pub type Result<T> = std::result::Result<T, SperrError>;

/// `vec![value; len]` that reports allocation failure instead of aborting.
pub(crate) fn try_filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|_| SperrError::Allocation(len.saturating_mul(std::mem::size_of::<T>())))?;
    out.resize(len, value);
    Ok(out)
}
