//! Byte layouts for coded streams.
//!
//! All multi-byte fields are little-endian. A container starts with
//! `"SPRR" | version u8 | flags u8 | nx u64 | ny u64 | nz u64`.
//!
//! A single volume continues with `mean f64 | q f64`, a length-prefixed SPECK
//! block (`SpeckHeader` and packed bits) and, when `FLAG_OUTLIERS` is set, an
//! `OutlierHeader` followed by a length-prefixed block of packed outlier bits.
//! A chunked container continues with `chunk nx ny nz u64 | count u64` and
//! `count` length-prefixed single-volume containers.

use crate::bits::bitstream::BitStream;
use crate::outlier::coder::OutlierInfo;
use crate::outlier::uint_vec::UIntWidth;
use crate::speck::engine::SpeckInfo;
use crate::speck::set::Dims;
use crate::utils::error::{Result, SperrError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

pub const MAGIC: [u8; 4] = *b"SPRR";
pub const VERSION: u8 = 1;

/// Container flag: an outlier block follows the SPECK block.
pub const FLAG_OUTLIERS: u8 = 0x01;
/// Container flag: the body is a chunk table.
pub const FLAG_CHUNKED: u8 = 0x02;

/// Largest element count a header may declare.
pub const MAX_VALUES: usize = 1 << 36;

/// Reading past the end of a header means the header is damaged.
fn map_read(err: io::Error) -> SperrError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        SperrError::CorruptHeader("unexpected end of header".into())
    } else {
        SperrError::Io(err)
    }
}

fn to_usize(value: u64, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| SperrError::CorruptHeader(format!("{} {} too large", what, value)))
}

/// Writes a u64 length prefix followed by `bytes`.
pub fn write_block<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    writer.write_u64::<LittleEndian>(bytes.len() as u64)?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Reads a block written by [`write_block`].
pub fn read_block<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let len = to_usize(reader.read_u64::<LittleEndian>().map_err(map_read)?, "block length")?;
    let mut bytes = Vec::new();
    let read = reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
    if read != len {
        return Err(SperrError::TruncatedStream {
            available: read * 8,
            required: len * 8,
        });
    }
    Ok(bytes)
}

fn write_dims<W: Write>(writer: &mut W, dims: &Dims) -> Result<()> {
    for &d in &dims.0 {
        writer.write_u64::<LittleEndian>(d as u64)?;
    }
    Ok(())
}

fn read_dims<R: Read>(reader: &mut R) -> Result<Dims> {
    let mut dims = [0usize; 3];
    for d in dims.iter_mut() {
        *d = to_usize(reader.read_u64::<LittleEndian>().map_err(map_read)?, "dimension")?;
    }
    let dims = Dims(dims);
    dims.validate()
        .map_err(|_| SperrError::CorruptHeader(format!("invalid dimensions {:?}", dims.0)))?;
    if dims.len() > MAX_VALUES {
        return Err(SperrError::CorruptHeader(format!(
            "dimensions {:?} exceed {} values",
            dims.0, MAX_VALUES
        )));
    }
    Ok(dims)
}

/// Leading header of every container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub flags: u8,
    pub dims: Dims,
}

impl ContainerHeader {
    pub const SIZE: usize = 4 + 1 + 1 + 24;

    pub fn has_outliers(&self) -> bool {
        self.flags & FLAG_OUTLIERS != 0
    }

    pub fn is_chunked(&self) -> bool {
        self.flags & FLAG_CHUNKED != 0
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u8(VERSION)?;
        writer.write_u8(self.flags)?;
        write_dims(writer, &self.dims)
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(map_read)?;
        if magic != MAGIC {
            return Err(SperrError::CorruptHeader(format!(
                "bad magic {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        let version = reader.read_u8().map_err(map_read)?;
        if version != VERSION {
            return Err(SperrError::CorruptHeader(format!(
                "unsupported version {}",
                version
            )));
        }
        let flags = reader.read_u8().map_err(map_read)?;
        let dims = read_dims(reader)?;
        Ok(ContainerHeader { flags, dims })
    }
}

/// `mean f64 | q f64`: values were coded as `(v - mean) / q`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeHeader {
    pub mean: f64,
    pub q: f64,
}

impl VolumeHeader {
    pub const SIZE: usize = 16;

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_f64::<LittleEndian>(self.mean)?;
        writer.write_f64::<LittleEndian>(self.q)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mean = reader.read_f64::<LittleEndian>().map_err(map_read)?;
        let q = reader.read_f64::<LittleEndian>().map_err(map_read)?;
        if !(mean.is_finite() && q.is_finite() && q > 0.0) {
            return Err(SperrError::CorruptHeader(format!(
                "invalid mean {} or quantization step {}",
                mean, q
            )));
        }
        Ok(VolumeHeader { mean, q })
    }
}

/// `chunk nx ny nz u64 | count u64`, following a chunked container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTable {
    pub chunk_dims: Dims,
    pub count: u64,
}

impl ChunkTable {
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_dims(writer, &self.chunk_dims)?;
        writer.write_u64::<LittleEndian>(self.count)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let chunk_dims = read_dims(reader)?;
        let count = reader.read_u64::<LittleEndian>().map_err(map_read)?;
        Ok(ChunkTable { chunk_dims, count })
    }
}

/// `max_coefficient_bits i32 | num_bits u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeckHeader {
    pub max_coefficient_bits: i32,
    pub num_bits: u64,
}

impl SpeckHeader {
    pub const SIZE: usize = 12;

    pub fn from_info(info: &SpeckInfo) -> Self {
        SpeckHeader {
            max_coefficient_bits: info.max_coefficient_bits,
            num_bits: info.num_bits as u64,
        }
    }

    pub fn into_info(self, dims: Dims) -> Result<SpeckInfo> {
        Ok(SpeckInfo {
            dims,
            max_coefficient_bits: self.max_coefficient_bits,
            num_bits: to_usize(self.num_bits, "bit count")?,
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_i32::<LittleEndian>(self.max_coefficient_bits)?;
        writer.write_u64::<LittleEndian>(self.num_bits)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let max_coefficient_bits = reader.read_i32::<LittleEndian>().map_err(map_read)?;
        let num_bits = reader.read_u64::<LittleEndian>().map_err(map_read)?;
        Ok(SpeckHeader {
            max_coefficient_bits,
            num_bits,
        })
    }
}

/// A SPECK header followed by its packed bits.
///
/// Parsing accepts a byte stream cut anywhere after the header; the bits that
/// survived can still be decoded with a budget of at most `available_bits`.
#[derive(Debug, Clone)]
pub struct SpeckStream {
    pub info: SpeckInfo,
    pub stream: BitStream,
    pub available_bits: usize,
}

impl SpeckStream {
    pub fn to_bytes(info: &SpeckInfo, stream: &BitStream) -> Result<Vec<u8>> {
        let packed = stream.get_bitstream(info.num_bits);
        let mut bytes = Vec::with_capacity(SpeckHeader::SIZE + packed.len());
        SpeckHeader::from_info(info).write(&mut bytes)?;
        bytes.extend_from_slice(&packed);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8], dims: Dims) -> Result<Self> {
        let mut reader = bytes;
        let info = SpeckHeader::read(&mut reader)?.into_info(dims)?;
        let available_bits = info.num_bits.min(reader.len().saturating_mul(8));
        let mut stream = BitStream::new();
        stream.parse_bitstream(reader, available_bits)?;
        Ok(SpeckStream {
            info,
            stream,
            available_bits,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.available_bits == self.info.num_bits
    }
}

/// `width u8 | tolerance f64 | length u64 | max_coefficient_bits i32 | num_bits u64`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierHeader {
    pub width: UIntWidth,
    pub tolerance: f64,
    pub length: u64,
    pub max_coefficient_bits: i32,
    pub num_bits: u64,
}

impl OutlierHeader {
    pub const SIZE: usize = 1 + 8 + 8 + 4 + 8;

    pub fn from_info(info: &OutlierInfo) -> Self {
        OutlierHeader {
            width: info.width,
            tolerance: info.tolerance,
            length: info.length() as u64,
            max_coefficient_bits: info.speck.max_coefficient_bits,
            num_bits: info.speck.num_bits as u64,
        }
    }

    pub fn into_info(self) -> Result<OutlierInfo> {
        let length = to_usize(self.length, "outlier length")?;
        if length == 0 || length > MAX_VALUES {
            return Err(SperrError::CorruptHeader(format!(
                "outlier length {} out of range",
                length
            )));
        }
        Ok(OutlierInfo {
            width: self.width,
            tolerance: self.tolerance,
            speck: SpeckInfo {
                dims: Dims::new_1d(length),
                max_coefficient_bits: self.max_coefficient_bits,
                num_bits: to_usize(self.num_bits, "bit count")?,
            },
        })
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.width.tag())?;
        writer.write_f64::<LittleEndian>(self.tolerance)?;
        writer.write_u64::<LittleEndian>(self.length)?;
        writer.write_i32::<LittleEndian>(self.max_coefficient_bits)?;
        writer.write_u64::<LittleEndian>(self.num_bits)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let width = UIntWidth::from_tag(reader.read_u8().map_err(map_read)?)?;
        let tolerance = reader.read_f64::<LittleEndian>().map_err(map_read)?;
        let length = reader.read_u64::<LittleEndian>().map_err(map_read)?;
        let max_coefficient_bits = reader.read_i32::<LittleEndian>().map_err(map_read)?;
        let num_bits = reader.read_u64::<LittleEndian>().map_err(map_read)?;
        Ok(OutlierHeader {
            width,
            tolerance,
            length,
            max_coefficient_bits,
            num_bits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speck::coder::{decode_coefficients, encode_coefficients};
    use crate::speck::params::StopCondition;

    #[test]
    fn test_container_header_layout() {
        let header = ContainerHeader {
            flags: FLAG_OUTLIERS,
            dims: Dims::new_3d(3, 4, 5),
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), ContainerHeader::SIZE);
        assert_eq!(&bytes[..4], b"SPRR");
        assert_eq!(bytes[4], VERSION);
        assert_eq!(bytes[6], 3);

        let parsed = ContainerHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed, header);
        assert!(parsed.has_outliers());
        assert!(!parsed.is_chunked());
    }

    #[test]
    fn test_bad_magic_and_short_header() {
        let mut bytes = b"XXXX".to_vec();
        bytes.extend_from_slice(&[VERSION, 0]);
        assert!(matches!(
            ContainerHeader::read(&mut bytes.as_slice()),
            Err(SperrError::CorruptHeader(_))
        ));
        let err = SpeckHeader::read(&mut &[1u8, 2, 3][..]).unwrap_err();
        assert!(err.is_data_error());
    }

    #[test]
    fn test_speck_header_is_twelve_bytes() {
        let header = SpeckHeader {
            max_coefficient_bits: -3,
            num_bits: 1234,
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), SpeckHeader::SIZE);
        assert_eq!(SpeckHeader::read(&mut bytes.as_slice()).unwrap(), header);
    }

    #[test]
    fn test_truncated_speck_stream_decodes_prefix() {
        let coeffs: Vec<f64> = (0..64).map(|i| (i as f64 - 30.0) * 3.0).collect();
        let dims = Dims::new_2d(8, 8);
        let mut stream = BitStream::new();
        let info = encode_coefficients(&coeffs, dims, StopCondition::Lossless, &mut stream).unwrap();
        let bytes = SpeckStream::to_bytes(&info, &stream).unwrap();
        assert_eq!(bytes.len(), SpeckHeader::SIZE + info.num_bits.div_ceil(8));

        let cut = SpeckHeader::SIZE + 20;
        let mut partial = SpeckStream::from_bytes(&bytes[..cut], dims).unwrap();
        assert!(!partial.is_complete());
        assert_eq!(partial.available_bits, 160);
        let err = decode_coefficients(&partial.info, &mut partial.stream, None).unwrap_err();
        assert!(matches!(err, SperrError::TruncatedStream { .. }));
        let rec = decode_coefficients(&partial.info, &mut partial.stream, Some(160)).unwrap();
        assert_eq!(rec.bits_read, 160);

        let mut full = SpeckStream::from_bytes(&bytes, dims).unwrap();
        assert!(full.is_complete());
        let rec = decode_coefficients(&full.info, &mut full.stream, None).unwrap();
        assert_eq!(rec.coeffs, coeffs);
    }

    #[test]
    fn test_volume_header_rejects_bad_step() {
        let mut bytes = Vec::new();
        VolumeHeader { mean: -2.5, q: 0.125 }.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), VolumeHeader::SIZE);
        let parsed = VolumeHeader::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(parsed, VolumeHeader { mean: -2.5, q: 0.125 });

        let mut zero_step = Vec::new();
        VolumeHeader { mean: 1.0, q: 0.0 }.write(&mut zero_step).unwrap();
        assert!(matches!(
            VolumeHeader::read(&mut zero_step.as_slice()),
            Err(SperrError::CorruptHeader(_))
        ));
        assert!(VolumeHeader::read(&mut &bytes[..12]).unwrap_err().is_data_error());
    }

    #[test]
    fn test_oversized_dims_are_corrupt() {
        let mut bytes = Vec::new();
        ContainerHeader {
            flags: 0,
            dims: Dims::new_2d(2, 2),
        }
        .write(&mut bytes)
        .unwrap();
        bytes[6..14].copy_from_slice(&(1u64 << 40).to_le_bytes());
        bytes[14..22].copy_from_slice(&(1u64 << 20).to_le_bytes());
        assert!(matches!(
            ContainerHeader::read(&mut bytes.as_slice()),
            Err(SperrError::CorruptHeader(_))
        ));

        let header = OutlierHeader {
            width: UIntWidth::U8,
            tolerance: 0.5,
            length: MAX_VALUES as u64 + 1,
            max_coefficient_bits: 3,
            num_bits: 10,
        };
        assert!(matches!(header.into_info(), Err(SperrError::CorruptHeader(_))));
    }

    #[test]
    fn test_chunk_table() {
        let table = ChunkTable {
            chunk_dims: Dims::new_3d(16, 16, 8),
            count: 6,
        };
        let mut bytes = Vec::new();
        table.write(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(ChunkTable::read(&mut bytes.as_slice()).unwrap(), table);
        assert!(matches!(
            ChunkTable::read(&mut &bytes[..30]),
            Err(SperrError::CorruptHeader(_))
        ));
    }

    #[test]
    fn test_blocks() {
        let mut bytes = Vec::new();
        write_block(&mut bytes, b"abc").unwrap();
        write_block(&mut bytes, b"").unwrap();
        let mut reader = bytes.as_slice();
        assert_eq!(read_block(&mut reader).unwrap(), b"abc");
        assert!(read_block(&mut reader).unwrap().is_empty());

        let short = &bytes[..9];
        assert!(matches!(
            read_block(&mut &short[..]),
            Err(SperrError::TruncatedStream { .. })
        ));
    }
}
