// src/compressor.rs

//! End-to-end compression of real-valued volumes.
//!
//! The pipeline removes the mean, rounds each value to the nearest multiple of a
//! quantization step `q` (ties to even), codes the integers with SPECK and, in
//! point-wise error mode, decodes its own stream to find positions whose error
//! reaches the tolerance and codes corrections for them with the outlier coder.

use crate::bits::bitstream::BitStream;
use crate::container::header::{
    self, ChunkTable, ContainerHeader, FLAG_CHUNKED, FLAG_OUTLIERS, MAX_VALUES, OutlierHeader,
    SpeckStream, VolumeHeader,
};
use crate::outlier::coder::{Outlier, OutlierCoder};
use crate::speck::coder::{decode_coefficients, encode_coefficients};
use crate::speck::magnitude::Magnitude;
use crate::speck::params::StopCondition;
use crate::speck::set::Dims;
use crate::utils::chunks::{Chunk, chunk_count, chunk_volume, gather_chunk, scatter_chunk};
use crate::utils::error::{Result, SperrError, try_filled};
use log::{debug, info};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// What the compressor should guarantee.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionMode {
    /// Code every bitplane at the finest step that keeps 53 significant bits.
    Lossless,
    /// Spend at most this many SPECK bits (split across chunks by size).
    BitBudget(usize),
    /// Stop once this PSNR (dB, relative to the data range) is reached.
    TargetPsnr(f64),
    /// Every reconstructed value is within this absolute tolerance.
    PointwiseError(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorParams {
    pub mode: CompressionMode,
    /// Compress in independent chunks of this size.
    pub chunk_dims: Option<Dims>,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            mode: CompressionMode::Lossless,
            chunk_dims: None,
        }
    }
}

/// A decompressed volume.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Vec<f64>,
    pub dims: Dims,
}

fn check_input(data: &[f64], dims: Dims) -> Result<()> {
    dims.validate()?;
    if data.len() != dims.len() {
        return Err(SperrError::InvalidArg(format!(
            "{} values do not fill dimensions {:?}",
            data.len(),
            dims.0
        )));
    }
    if data.len() > MAX_VALUES {
        return Err(SperrError::InvalidArg(format!(
            "{} values exceed the container limit of {}",
            data.len(),
            MAX_VALUES
        )));
    }
    if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
        return Err(SperrError::InvalidArg(format!(
            "non-finite value at index {}",
            pos
        )));
    }
    Ok(())
}

/// Quantization step for data whose largest centered magnitude is `max_abs`.
fn quantization_step(mode: CompressionMode, max_abs: f64) -> f64 {
    match mode {
        CompressionMode::PointwiseError(tolerance) => 1.5 * tolerance,
        _ if max_abs > 0.0 => {
            let e = max_abs.max_coefficient_bits();
            f64::pow2((e - 52).max(f64::MIN_EXP - 1))
        }
        _ => 1.0,
    }
}

#[derive(Debug, Clone)]
pub struct SperrCompressor {
    params: CompressorParams,
}

impl SperrCompressor {
    pub fn new(params: CompressorParams) -> Result<Self> {
        match params.mode {
            CompressionMode::PointwiseError(t) if !(t.is_finite() && t > 0.0) => {
                return Err(SperrError::InvalidArg(format!(
                    "point-wise tolerance must be positive and finite, got {}",
                    t
                )));
            }
            CompressionMode::TargetPsnr(p) if !p.is_finite() => {
                return Err(SperrError::InvalidArg(format!(
                    "target PSNR must be finite, got {}",
                    p
                )));
            }
            _ => {}
        }
        Ok(Self { params })
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    /// Compresses a volume, chunked when `chunk_dims` is set.
    pub fn compress(&self, data: &[f64], dims: Dims) -> Result<Vec<u8>> {
        match self.params.chunk_dims {
            Some(chunk_dims) => self.compress_chunked(data, dims, chunk_dims),
            None => {
                check_input(data, dims)?;
                self.compress_volume(data, dims, self.params.mode)
            }
        }
    }

    fn compress_volume(&self, data: &[f64], dims: Dims, mode: CompressionMode) -> Result<Vec<u8>> {
        let n = data.len() as f64;
        let mean = data.iter().sum::<f64>() / n;
        let centered: Vec<f64> = data.iter().map(|v| v - mean).collect();
        let max_abs = centered.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let q = quantization_step(mode, max_abs);
        let scaled: Vec<f64> = centered.iter().map(|v| (v / q).round_ties_even()).collect();

        let stop = match mode {
            CompressionMode::Lossless | CompressionMode::PointwiseError(_) => StopCondition::Lossless,
            CompressionMode::BitBudget(bits) => StopCondition::BitBudget(bits),
            CompressionMode::TargetPsnr(psnr) => StopCondition::TargetPsnr(psnr),
        };
        let mut stream = BitStream::new();
        let speck = encode_coefficients(&scaled, dims, stop, &mut stream)?;

        let mut outliers = None;
        if let CompressionMode::PointwiseError(tolerance) = mode {
            let rec = decode_coefficients(&speck, &mut stream, None)?;
            let mut coder = OutlierCoder::new(data.len(), tolerance)?;
            for (pos, (&orig, &c)) in data.iter().zip(&rec.coeffs).enumerate() {
                let err = orig - (c * q + mean);
                if err.abs() >= tolerance {
                    coder.add_outlier(Outlier::new(pos, err));
                }
            }
            if !coder.outliers().is_empty() {
                let mut outlier_stream = BitStream::new();
                let info = coder.encode(&mut outlier_stream)?;
                let bytes = outlier_stream.get_bitstream(info.speck.num_bits);
                outliers = Some((OutlierHeader::from_info(&info), bytes));
            }
            debug!(
                "{} of {} values need correction at tolerance {}",
                coder.outliers().len(),
                data.len(),
                tolerance
            );
        }

        let flags = if outliers.is_some() { FLAG_OUTLIERS } else { 0 };
        let mut out = Vec::new();
        ContainerHeader { flags, dims }.write(&mut out)?;
        VolumeHeader { mean, q }.write(&mut out)?;
        header::write_block(&mut out, &SpeckStream::to_bytes(&speck, &stream)?)?;
        if let Some((outlier_header, bytes)) = outliers {
            outlier_header.write(&mut out)?;
            header::write_block(&mut out, &bytes)?;
        }
        info!(
            "Compressed {:?} ({} values) into {} bytes ({:.3} bits/value)",
            dims.0,
            data.len(),
            out.len(),
            out.len() as f64 * 8.0 / n
        );
        Ok(out)
    }

    /// Compresses each chunk independently into a chunk table container.
    pub fn compress_chunked(&self, data: &[f64], dims: Dims, chunk_dims: Dims) -> Result<Vec<u8>> {
        check_input(data, dims)?;
        let chunks = chunk_volume(dims, chunk_dims)?;
        let total = dims.len();
        let mode_for = |chunk: &Chunk| match self.params.mode {
            CompressionMode::BitBudget(bits) => {
                CompressionMode::BitBudget(chunk_budget(bits, chunk, total))
            }
            other => other,
        };
        let encode_one = |chunk: &Chunk| -> Result<Vec<u8>> {
            let values = gather_chunk(data, dims, chunk);
            self.compress_volume(&values, chunk.dims(), mode_for(chunk))
        };

        #[cfg(feature = "rayon")]
        let encoded = chunks.par_iter().map(encode_one).collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "rayon"))]
        let encoded = chunks.iter().map(encode_one).collect::<Result<Vec<_>>>()?;

        let mut out = Vec::new();
        ContainerHeader {
            flags: FLAG_CHUNKED,
            dims,
        }
        .write(&mut out)?;
        ChunkTable {
            chunk_dims,
            count: encoded.len() as u64,
        }
        .write(&mut out)?;
        for bytes in &encoded {
            header::write_block(&mut out, bytes)?;
        }
        debug!(
            "Chunked {:?} into {} chunks of {:?}, {} bytes",
            dims.0,
            chunks.len(),
            chunk_dims.0,
            out.len()
        );
        Ok(out)
    }
}

/// Splits a total bit budget across chunks in proportion to their size.
fn chunk_budget(bits: usize, chunk: &Chunk, total: usize) -> usize {
    (bits as u128 * chunk.dims().len() as u128 / total as u128) as usize
}

/// Reverses [`SperrCompressor`].
#[derive(Debug, Clone, Default)]
pub struct SperrDecompressor {
    bit_budget: Option<usize>,
}

impl SperrDecompressor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes only the first `bits` SPECK bits. A chunked container splits the
    /// budget across chunks by size, as [`SperrCompressor`] does for
    /// [`CompressionMode::BitBudget`]. Outlier corrections are skipped because
    /// they assume the full stream.
    pub fn with_bit_budget(bits: usize) -> Self {
        Self {
            bit_budget: Some(bits),
        }
    }

    pub fn decompress(&self, bytes: &[u8]) -> Result<Volume> {
        let header = ContainerHeader::read(&mut &bytes[..])?;
        if header.is_chunked() {
            self.decompress_chunked(bytes)
        } else {
            self.decompress_volume(bytes, self.bit_budget)
        }
    }

    fn decompress_volume(&self, bytes: &[u8], bit_budget: Option<usize>) -> Result<Volume> {
        let mut reader = bytes;
        let header = ContainerHeader::read(&mut reader)?;
        let dims = header.dims;
        let VolumeHeader { mean, q } = VolumeHeader::read(&mut reader)?;
        let mut speck = SpeckStream::from_bytes(&header::read_block(&mut reader)?, dims)?;
        let mut data = decode_coefficients(&speck.info, &mut speck.stream, bit_budget)?.coeffs;
        for v in data.iter_mut() {
            *v = *v * q + mean;
        }

        if header.has_outliers() {
            let info = OutlierHeader::read(&mut reader)?.into_info()?;
            if info.length() != data.len() {
                return Err(SperrError::CorruptHeader(format!(
                    "outlier length {} does not match {} values",
                    info.length(),
                    data.len()
                )));
            }
            let outlier_bytes = header::read_block(&mut reader)?;
            if bit_budget.is_none() {
                let mut stream = BitStream::new();
                stream.parse_bitstream(&outlier_bytes, info.speck.num_bits)?;
                for Outlier { pos, err } in OutlierCoder::decode(&info, &mut stream)? {
                    data[pos] += err;
                }
            }
        }
        Ok(Volume { data, dims })
    }

    /// Reassembles a volume compressed with [`SperrCompressor::compress_chunked`].
    pub fn decompress_chunked(&self, bytes: &[u8]) -> Result<Volume> {
        let mut reader = bytes;
        let header = ContainerHeader::read(&mut reader)?;
        if !header.is_chunked() {
            return Err(SperrError::InvalidArg("container is not chunked".into()));
        }
        let dims = header.dims;
        let ChunkTable { chunk_dims, count } = ChunkTable::read(&mut reader)?;
        let expected = chunk_count(dims, chunk_dims)
            .map_err(|_| SperrError::CorruptHeader(format!("invalid chunk dimensions {:?}", chunk_dims.0)))?;
        if count != expected as u64 {
            return Err(SperrError::CorruptHeader(format!(
                "{} chunks stored, {} expected",
                count, expected
            )));
        }
        // every chunk needs at least its 8-byte length prefix
        if expected > reader.len() / 8 {
            return Err(SperrError::TruncatedStream {
                available: reader.len() * 8,
                required: expected.saturating_mul(64),
            });
        }
        let chunks = chunk_volume(dims, chunk_dims)?;
        let blocks = chunks
            .iter()
            .map(|_| header::read_block(&mut reader))
            .collect::<Result<Vec<_>>>()?;

        let total = dims.len();
        let decode_one = |(chunk, block): (&Chunk, &Vec<u8>)| -> Result<Vec<f64>> {
            let budget = self.bit_budget.map(|bits| chunk_budget(bits, chunk, total));
            let volume = self.decompress_volume(block, budget)?;
            if volume.dims != chunk.dims() {
                return Err(SperrError::CorruptHeader(format!(
                    "chunk has dimensions {:?}, expected {:?}",
                    volume.dims.0, chunk.len
                )));
            }
            Ok(volume.data)
        };
        #[cfg(feature = "rayon")]
        let decoded = chunks
            .par_iter()
            .zip(blocks.par_iter())
            .map(decode_one)
            .collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "rayon"))]
        let decoded = chunks
            .iter()
            .zip(blocks.iter())
            .map(decode_one)
            .collect::<Result<Vec<_>>>()?;

        let mut data = try_filled(dims.len(), 0.0)?;
        for (chunk, values) in chunks.iter().zip(&decoded) {
            scatter_chunk(&mut data, dims, chunk, values);
        }
        Ok(Volume { data, dims })
    }
}
