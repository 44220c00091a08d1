//! # SPERR SPECK Library
//!
//! Progressive bit-plane coding of 1-D/2-D/3-D coefficient arrays with the
//! SPECK set-partitioning algorithm, plus bounded point-wise error correction.
//!
//! This library is organized into several modules:
//! - `utils`: Error handling and volume chunking
//! - `bits`: The random-access bit stream and word-packed bit mask
//! - `speck`: Set geometry, the bitplane engine and its real-valued front-end
//! - `outlier`: Sparse correction coding at a fixed tolerance
//! - `container`: Byte layouts of coded streams
//! - `compressor`: Mean removal, quantization and point-wise error pipeline

// Re-export commonly used types at the crate root
pub use utils::error::{Result, SperrError};

pub mod utils {
    pub mod chunks;
    pub mod error;
}

pub mod bits {
    pub mod bitmask;
    pub mod bitstream;

    pub use self::bitmask::Bitmask;
    pub use self::bitstream::BitStream;
}

pub mod speck {
    pub mod coder;
    pub mod engine;
    pub mod magnitude;
    pub mod params;
    pub mod set;

    pub use self::coder::{Reconstruction, decode_coefficients, encode_coefficients};
    pub use self::engine::SpeckInfo;
    pub use self::params::{EncoderParams, StopCondition};
    pub use self::set::Dims;
}

pub mod outlier {
    pub mod coder;
    pub mod uint_vec;

    pub use self::coder::{Outlier, OutlierCoder, OutlierInfo};
    pub use self::uint_vec::{UIntVec, UIntWidth};
}

pub mod container {
    pub mod header;
}

pub mod compressor;

// Public API exports
pub use bits::{BitStream, Bitmask};
pub use compressor::{CompressionMode, CompressorParams, SperrCompressor, SperrDecompressor, Volume};
pub use speck::{Dims, EncoderParams, SpeckInfo, StopCondition};
