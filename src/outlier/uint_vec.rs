use crate::utils::error::{Result, SperrError};

/// Unsigned integer width used to hold quantized outlier magnitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UIntWidth {
    U8,
    U16,
    U32,
    U64,
}

impl UIntWidth {
    /// The narrowest width that holds `max`.
    pub fn for_max(max: u64) -> Self {
        if max <= u8::MAX as u64 {
            UIntWidth::U8
        } else if max <= u16::MAX as u64 {
            UIntWidth::U16
        } else if max <= u32::MAX as u64 {
            UIntWidth::U32
        } else {
            UIntWidth::U64
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            UIntWidth::U8 => 8,
            UIntWidth::U16 => 16,
            UIntWidth::U32 => 32,
            UIntWidth::U64 => 64,
        }
    }

    /// Header tag.
    pub fn tag(self) -> u8 {
        match self {
            UIntWidth::U8 => 0,
            UIntWidth::U16 => 1,
            UIntWidth::U32 => 2,
            UIntWidth::U64 => 3,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(UIntWidth::U8),
            1 => Ok(UIntWidth::U16),
            2 => Ok(UIntWidth::U32),
            3 => Ok(UIntWidth::U64),
            other => Err(SperrError::CorruptHeader(format!(
                "unknown integer width tag {}",
                other
            ))),
        }
    }
}

/// Dense magnitudes stored at one of four widths, fixed for the lifetime of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UIntVec {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
}

impl UIntVec {
    /// Narrows `values` to `width`. Values must fit; see [`UIntWidth::for_max`].
    pub fn narrow(values: &[u64], width: UIntWidth) -> Self {
        match width {
            UIntWidth::U8 => UIntVec::U8(values.iter().map(|&v| v as u8).collect()),
            UIntWidth::U16 => UIntVec::U16(values.iter().map(|&v| v as u16).collect()),
            UIntWidth::U32 => UIntVec::U32(values.iter().map(|&v| v as u32).collect()),
            UIntWidth::U64 => UIntVec::U64(values.to_vec()),
        }
    }

    pub fn width(&self) -> UIntWidth {
        match self {
            UIntVec::U8(_) => UIntWidth::U8,
            UIntVec::U16(_) => UIntWidth::U16,
            UIntVec::U32(_) => UIntWidth::U32,
            UIntVec::U64(_) => UIntWidth::U64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            UIntVec::U8(v) => v.len(),
            UIntVec::U16(v) => v.len(),
            UIntVec::U32(v) => v.len(),
            UIntVec::U64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> u64 {
        match self {
            UIntVec::U8(v) => v[idx] as u64,
            UIntVec::U16(v) => v[idx] as u64,
            UIntVec::U32(v) => v[idx] as u64,
            UIntVec::U64(v) => v[idx],
        }
    }
}
