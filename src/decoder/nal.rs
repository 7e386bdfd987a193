//! NAL unit framing.
//!
//! Container samples carry NAL units prefixed with a 4-byte big-endian
//! length. The decode engine consumes Annex-B framing, so every copied unit
//! is re-framed with [`ANNEXB_START_CODE`].

use crate::error::{PixelReelError, Result};

/// Start code written in front of every NAL unit handed to the decode engine.
pub const ANNEXB_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Size of the big-endian length prefix in front of each NAL unit in a sample.
pub const NAL_LENGTH_PREFIX_SIZE: usize = 4;

/// H.264 NAL unit types (Table 7-1) the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture.
    SliceNonIdr,
    /// Coded slice data partition A/B/C.
    SliceDataPartition(u8),
    /// Coded slice of an IDR picture.
    SliceIdr,
    /// Supplemental enhancement information.
    Sei,
    /// Sequence parameter set.
    Sps,
    /// Picture parameter set.
    Pps,
    /// Access unit delimiter.
    AccessUnitDelimiter,
    /// Any other type.
    Other(u8),
}

impl NalUnitType {
    pub fn from_id(id: u8) -> Self {
        match id {
            1 => Self::SliceNonIdr,
            2..=4 => Self::SliceDataPartition(id),
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::AccessUnitDelimiter,
            other => Self::Other(other),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::SliceNonIdr => 1,
            Self::SliceDataPartition(id) => *id,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::AccessUnitDelimiter => 9,
            Self::Other(id) => *id,
        }
    }

    /// Whether this unit starts a picture the pipeline can decode.
    pub fn is_coded_slice(&self) -> bool {
        matches!(self, Self::SliceNonIdr | Self::SliceIdr)
    }

    pub fn is_idr(&self) -> bool {
        matches!(self, Self::SliceIdr)
    }
}

/// One-byte NAL unit header (7.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    /// `nal_ref_idc`: non-zero when the picture is used for reference.
    pub nal_ref_idc: u8,
    /// `nal_unit_type`.
    pub nal_unit_type: NalUnitType,
}

impl NalHeader {
    pub fn parse(byte: u8) -> Result<Self> {
        if byte & 0x80 != 0 {
            return Err(PixelReelError::Bitstream(format!(
                "forbidden_zero_bit set in NAL header 0x{:02x}",
                byte
            )));
        }
        Ok(Self {
            nal_ref_idc: (byte >> 5) & 0x03,
            nal_unit_type: NalUnitType::from_id(byte & 0x1F),
        })
    }

    /// Parse the header from the first byte of a NAL unit.
    pub fn from_nal(nal: &[u8]) -> Result<Self> {
        let byte = nal
            .first()
            .ok_or_else(|| PixelReelError::Bitstream("empty NAL unit".to_string()))?;
        Self::parse(*byte)
    }

    pub fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }
}

/// Iterator over the length-prefixed NAL units of one container sample.
///
/// Yields an error and stops if a length prefix runs past the end of the
/// sample.
#[derive(Debug, Clone)]
pub struct LengthPrefixedNals<'a> {
    remaining: &'a [u8],
}

impl<'a> LengthPrefixedNals<'a> {
    pub fn new(sample: &'a [u8]) -> Self {
        Self { remaining: sample }
    }
}

impl<'a> Iterator for LengthPrefixedNals<'a> {
    type Item = Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        if self.remaining.len() < NAL_LENGTH_PREFIX_SIZE {
            let leftover = self.remaining.len();
            self.remaining = &[];
            return Some(Err(PixelReelError::Bitstream(format!(
                "{} trailing bytes too short for a NAL length prefix",
                leftover
            ))));
        }

        let (prefix, rest) = self.remaining.split_at(NAL_LENGTH_PREFIX_SIZE);
        let nal_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if nal_len > rest.len() {
            self.remaining = &[];
            return Some(Err(PixelReelError::Bitstream(format!(
                "NAL length {} exceeds the {} bytes left in the sample",
                nal_len,
                rest.len()
            ))));
        }

        let (nal, rest) = rest.split_at(nal_len);
        self.remaining = rest;
        Some(Ok(nal))
    }
}

/// Find the first coded slice (IDR or non-IDR) in a length-prefixed sample.
///
/// Parameter sets, SEI and delimiters in front of the slice are skipped.
pub fn find_coded_slice(sample: &[u8]) -> Result<Option<(NalHeader, &[u8])>> {
    for nal in LengthPrefixedNals::new(sample) {
        let nal = nal?;
        let header = NalHeader::from_nal(nal)?;
        if header.nal_unit_type.is_coded_slice() {
            return Ok(Some((header, nal)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::length_prefixed;

    mod header_tests {
        use super::*;

        #[test]
        fn test_parse_idr_header() {
            let header = NalHeader::parse(0x65).unwrap();
            assert_eq!(header.nal_ref_idc, 3);
            assert_eq!(header.nal_unit_type, NalUnitType::SliceIdr);
            assert!(header.is_reference());
        }

        #[test]
        fn test_parse_non_reference_slice() {
            let header = NalHeader::parse(0x01).unwrap();
            assert_eq!(header.nal_ref_idc, 0);
            assert_eq!(header.nal_unit_type, NalUnitType::SliceNonIdr);
            assert!(!header.is_reference());
        }

        #[test]
        fn test_forbidden_bit_rejected() {
            assert!(NalHeader::parse(0xE5).is_err());
        }

        #[test]
        fn test_unit_type_ids_round_trip() {
            for id in 0u8..32 {
                assert_eq!(NalUnitType::from_id(id).id(), id);
            }
        }

        #[test]
        fn test_coded_slice_classification() {
            assert!(NalUnitType::SliceIdr.is_coded_slice());
            assert!(NalUnitType::SliceNonIdr.is_coded_slice());
            assert!(!NalUnitType::Sps.is_coded_slice());
            assert!(!NalUnitType::SliceDataPartition(2).is_coded_slice());
            assert!(NalUnitType::SliceIdr.is_idr());
            assert!(!NalUnitType::SliceNonIdr.is_idr());
        }
    }

    mod iterator_tests {
        use super::*;

        #[test]
        fn test_iterates_units_in_order() {
            let sample = length_prefixed(&[&[0x09, 0xF0], &[0x65, 0x88, 0x80]]);
            let nals: Vec<&[u8]> = LengthPrefixedNals::new(&sample)
                .collect::<Result<_>>()
                .unwrap();
            assert_eq!(nals, vec![&[0x09u8, 0xF0][..], &[0x65u8, 0x88, 0x80][..]]);
        }

        #[test]
        fn test_truncated_length_reports_error() {
            let mut sample = length_prefixed(&[&[0x65, 0x88]]);
            sample[3] = 10;
            let mut iter = LengthPrefixedNals::new(&sample);
            assert!(iter.next().unwrap().is_err());
            assert!(iter.next().is_none());
        }

        #[test]
        fn test_short_trailer_reports_error() {
            let mut sample = length_prefixed(&[&[0x65]]);
            sample.extend_from_slice(&[0x00, 0x00]);
            let results: Vec<_> = LengthPrefixedNals::new(&sample).collect();
            assert_eq!(results.len(), 2);
            assert!(results[1].is_err());
        }

        #[test]
        fn test_find_coded_slice_skips_parameter_sets() {
            let sample = length_prefixed(&[&[0x67, 0x42], &[0x68, 0xCE], &[0x06, 0x05], &[0x41, 0x9A]]);
            let (header, nal) = find_coded_slice(&sample).unwrap().unwrap();
            assert_eq!(header.nal_unit_type, NalUnitType::SliceNonIdr);
            assert_eq!(header.nal_ref_idc, 2);
            assert_eq!(nal, &[0x41u8, 0x9A][..]);
        }

        #[test]
        fn test_find_coded_slice_none() {
            let sample = length_prefixed(&[&[0x09, 0xF0]]);
            assert!(find_coded_slice(&sample).unwrap().is_none());
        }
    }
}
