//! Frame decoding.
//!
//! A frame payload is a run of signed little-endian pixels whose width is
//! picked by the dynamic range latched when the acquisition started.

use crate::error::{DetectorError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bits per pixel negotiated with the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DynamicRange {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
}

impl DynamicRange {
    pub fn bits(self) -> i32 {
        match self {
            DynamicRange::Bits8 => 8,
            DynamicRange::Bits16 => 16,
            DynamicRange::Bits24 => 24,
            DynamicRange::Bits32 => 32,
        }
    }

    /// Value written to the device; it stores 24 bits as 32.
    pub fn wire_value(self) -> i32 {
        match self {
            DynamicRange::Bits24 => 32,
            other => other.bits(),
        }
    }

    pub fn element_width(self) -> ElementWidth {
        match self {
            DynamicRange::Bits8 => ElementWidth::I8,
            DynamicRange::Bits16 => ElementWidth::I16,
            DynamicRange::Bits24 | DynamicRange::Bits32 => ElementWidth::I32,
        }
    }
}

impl TryFrom<i32> for DynamicRange {
    type Error = DetectorError;

    fn try_from(bits: i32) -> Result<Self> {
        match bits {
            8 => Ok(DynamicRange::Bits8),
            16 => Ok(DynamicRange::Bits16),
            24 => Ok(DynamicRange::Bits24),
            32 => Ok(DynamicRange::Bits32),
            other => Err(DetectorError::decode(format!("unsupported dynamic range {other}"))),
        }
    }
}

/// Width of one decoded pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementWidth {
    I8,
    I16,
    I32,
}

impl ElementWidth {
    pub fn bytes(self) -> usize {
        match self {
            ElementWidth::I8 => 1,
            ElementWidth::I16 => 2,
            ElementWidth::I32 => 4,
        }
    }
}

/// Element count and width for a `byte_count` buffer at `dynamic_range` bits.
pub fn element_layout(dynamic_range: i32, byte_count: usize) -> Result<(usize, ElementWidth)> {
    let width = DynamicRange::try_from(dynamic_range)?.element_width();
    if byte_count % width.bytes() != 0 {
        return Err(DetectorError::decode(format!(
            "{byte_count} bytes is not a whole number of {}-byte elements",
            width.bytes()
        )));
    }
    Ok((byte_count / width.bytes(), width))
}

/// Decoded pixel values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FrameData {
    I8(Vec<i8>),
    I16(Vec<i16>),
    I32(Vec<i32>),
}

impl FrameData {
    pub fn len(&self) -> usize {
        match self {
            FrameData::I8(v) => v.len(),
            FrameData::I16(v) => v.len(),
            FrameData::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> ElementWidth {
        match self {
            FrameData::I8(_) => ElementWidth::I8,
            FrameData::I16(_) => ElementWidth::I16,
            FrameData::I32(_) => ElementWidth::I32,
        }
    }

    /// Pixel at `index`, widened.
    pub fn get(&self, index: usize) -> Option<i32> {
        match self {
            FrameData::I8(v) => v.get(index).map(|&x| i32::from(x)),
            FrameData::I16(v) => v.get(index).map(|&x| i32::from(x)),
            FrameData::I32(v) => v.get(index).copied(),
        }
    }
}

/// Decode a raw frame payload.
///
/// The buffer must hold a whole number of elements; it is never truncated
/// or padded.
pub fn decode(buffer: &[u8], dynamic_range: DynamicRange) -> Result<FrameData> {
    let (count, width) = element_layout(dynamic_range.bits(), buffer.len())?;
    let data = match width {
        ElementWidth::I8 => FrameData::I8(buffer.iter().map(|&b| b as i8).collect()),
        ElementWidth::I16 => FrameData::I16(
            buffer
                .chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        ElementWidth::I32 => FrameData::I32(
            buffer
                .chunks_exact(4)
                .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
    };
    debug_assert_eq!(data.len(), count);
    Ok(data)
}

/// One readout produced during an acquisition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Frame {
    index: u64,
    received_at: DateTime<Utc>,
    data: FrameData,
}

impl Frame {
    pub(crate) fn new(index: u64, data: FrameData) -> Self {
        Self {
            index,
            received_at: Utc::now(),
            data,
        }
    }

    /// Position of this frame within its acquisition, from 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    pub fn into_data(self) -> FrameData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_per_dynamic_range() {
        assert_eq!(element_layout(8, 12).unwrap(), (12, ElementWidth::I8));
        assert_eq!(element_layout(16, 12).unwrap(), (6, ElementWidth::I16));
        assert_eq!(element_layout(24, 12).unwrap(), (3, ElementWidth::I32));
        assert_eq!(element_layout(32, 12).unwrap(), (3, ElementWidth::I32));
    }

    #[test]
    fn test_layout_rejects_unknown_range() {
        for bits in [0, 1, 4, 12, 20, 64, -1] {
            assert!(matches!(element_layout(bits, 16), Err(DetectorError::Decode(_))), "range {bits}");
        }
    }

    #[test]
    fn test_layout_rejects_partial_element() {
        assert!(matches!(element_layout(16, 7), Err(DetectorError::Decode(_))));
        assert!(matches!(element_layout(32, 10), Err(DetectorError::Decode(_))));
    }

    #[test]
    fn test_decode_8_bit_is_signed() {
        let data = decode(&[0x00, 0x7F, 0x80, 0xFF], DynamicRange::Bits8).unwrap();
        assert_eq!(data, FrameData::I8(vec![0, 127, -128, -1]));
    }

    #[test]
    fn test_decode_16_bit_little_endian() {
        let data = decode(&[0x01, 0x00, 0xFF, 0xFF, 0x00, 0x80], DynamicRange::Bits16).unwrap();
        assert_eq!(data, FrameData::I16(vec![1, -1, i16::MIN]));
    }

    #[test]
    fn test_decode_24_bit_uses_four_bytes() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&70000i32.to_le_bytes());
        buffer.extend_from_slice(&(-5i32).to_le_bytes());
        let data = decode(&buffer, DynamicRange::Bits24).unwrap();
        assert_eq!(data, FrameData::I32(vec![70000, -5]));
        assert_eq!(data.width().bytes(), 4);
    }

    #[test]
    fn test_decode_length_mismatch_is_error() {
        let result = decode(&[0u8; 6], DynamicRange::Bits32);
        assert!(matches!(result, Err(DetectorError::Decode(_))));
    }

    #[test]
    fn test_wire_value_stores_24_as_32() {
        assert_eq!(DynamicRange::Bits24.wire_value(), 32);
        assert_eq!(DynamicRange::Bits16.wire_value(), 16);
        assert_eq!(DynamicRange::try_from(24).unwrap(), DynamicRange::Bits24);
    }

    #[test]
    fn test_frame_data_get_widens() {
        let data = FrameData::I16(vec![-3, 9]);
        assert_eq!(data.get(0), Some(-3));
        assert_eq!(data.get(2), None);
    }
}
