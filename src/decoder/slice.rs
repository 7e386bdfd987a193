//! Slice header prefix (7.3.3).
//!
//! Parsing stops after the picture order count syntax; reference list
//! modification, weight tables and everything below are the decode engine's
//! business.

use super::bitreader::{strip_emulation_prevention, BitReader};
use super::nal::NalHeader;
use super::params::ParameterSets;
use crate::error::Result;

/// Bytes of slice payload unescaped for header parsing. The header prefix we
/// read is far shorter than this for any legal stream.
const SLICE_HEADER_SCAN_BYTES: usize = 64;

/// `slice_type % 5` (Table 7-6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceType {
    #[default]
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(slice_type: u32) -> Self {
        match slice_type % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        }
    }

    pub fn is_intra(&self) -> bool {
        matches!(self, Self::I | Self::Si)
    }
}

/// Parsed slice header fields up to `delta_pic_order_cnt[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    pub pic_parameter_set_id: u32,
    pub colour_plane_id: u8,
    pub frame_num: u32,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
}

impl SliceHeader {
    /// Parse the header of a coded slice NAL unit (header byte included).
    pub fn parse(nal_header: &NalHeader, nal: &[u8], params: &ParameterSets) -> Result<Self> {
        let payload = nal.get(1..).unwrap_or_default();
        let scan = &payload[..payload.len().min(SLICE_HEADER_SCAN_BYTES)];
        let rbsp = strip_emulation_prevention(scan);
        let mut r = BitReader::new(&rbsp);

        let mut header = SliceHeader {
            first_mb_in_slice: r.read_ue()?,
            slice_type: SliceType::from_raw(r.read_ue()?),
            pic_parameter_set_id: r.read_ue()?,
            ..Default::default()
        };

        let (pps, sps) = params.active(header.pic_parameter_set_id)?;

        if sps.separate_colour_plane_flag {
            header.colour_plane_id = r.read_bits(2)? as u8;
        }
        header.frame_num = r.read_bits(sps.frame_num_bits())?;

        if !sps.frame_mbs_only_flag {
            header.field_pic_flag = r.read_flag()?;
            if header.field_pic_flag {
                header.bottom_field_flag = r.read_flag()?;
            }
        }

        if nal_header.nal_unit_type.is_idr() {
            header.idr_pic_id = r.read_ue()?;
        }

        match sps.pic_order_cnt_type {
            0 => {
                header.pic_order_cnt_lsb = r.read_bits(sps.pic_order_cnt_lsb_bits())?;
                if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                    header.delta_pic_order_cnt_bottom = r.read_se()?;
                }
            }
            1 if !sps.delta_pic_order_always_zero_flag => {
                header.delta_pic_order_cnt[0] = r.read_se()?;
                if pps.bottom_field_pic_order_in_frame_present_flag && !header.field_pic_flag {
                    header.delta_pic_order_cnt[1] = r.read_se()?;
                }
            }
            _ => {}
        }

        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::{PpsBuilder, SliceBuilder, SpsBuilder};

    fn parameter_sets(sps: &SpsBuilder, pps: &PpsBuilder) -> ParameterSets {
        let sps = sps.build();
        let pps = pps.build();
        ParameterSets::from_nals([&sps[..]], [&pps[..]]).unwrap()
    }

    fn parse(slice: &SliceBuilder, sps: &SpsBuilder, pps: &PpsBuilder) -> SliceHeader {
        let params = parameter_sets(sps, pps);
        let nal = slice.build(sps, pps);
        let header = NalHeader::from_nal(&nal).unwrap();
        SliceHeader::parse(&header, &nal, &params).unwrap()
    }

    #[test]
    fn test_idr_slice_header() {
        let sps = SpsBuilder {
            log2_max_frame_num_minus4: 1,
            log2_max_pic_order_cnt_lsb_minus4: 2,
            ..Default::default()
        };
        let slice = SliceBuilder {
            idr: true,
            slice_type: 7,
            idr_pic_id: 3,
            pic_order_cnt_lsb: 0,
            ..Default::default()
        };
        let header = parse(&slice, &sps, &PpsBuilder::default());

        assert_eq!(header.slice_type, SliceType::I);
        assert!(header.slice_type.is_intra());
        assert_eq!(header.frame_num, 0);
        assert_eq!(header.idr_pic_id, 3);
        assert_eq!(header.pic_order_cnt_lsb, 0);
    }

    #[test]
    fn test_predictive_slice_header() {
        let sps = SpsBuilder::default();
        let slice = SliceBuilder {
            frame_num: 5,
            pic_order_cnt_lsb: 10,
            ..Default::default()
        };
        let header = parse(&slice, &sps, &PpsBuilder::default());

        assert_eq!(header.slice_type, SliceType::P);
        assert_eq!(header.frame_num, 5);
        assert_eq!(header.pic_order_cnt_lsb, 10);
        assert_eq!(header.delta_pic_order_cnt_bottom, 0);
    }

    #[test]
    fn test_delta_bottom_present() {
        let sps = SpsBuilder::default();
        let pps = PpsBuilder {
            bottom_field_pic_order_in_frame_present: true,
            ..Default::default()
        };
        let slice = SliceBuilder {
            frame_num: 1,
            pic_order_cnt_lsb: 4,
            delta_pic_order_cnt_bottom: -1,
            ..Default::default()
        };
        let header = parse(&slice, &sps, &pps);

        assert_eq!(header.pic_order_cnt_lsb, 4);
        assert_eq!(header.delta_pic_order_cnt_bottom, -1);
    }

    #[test]
    fn test_field_slice_flags() {
        let sps = SpsBuilder {
            frame_mbs_only: false,
            ..Default::default()
        };
        let pps = PpsBuilder {
            bottom_field_pic_order_in_frame_present: true,
            ..Default::default()
        };
        let slice = SliceBuilder {
            frame_num: 2,
            field_pic: true,
            bottom_field: true,
            pic_order_cnt_lsb: 9,
            ..Default::default()
        };
        let header = parse(&slice, &sps, &pps);

        assert!(header.field_pic_flag);
        assert!(header.bottom_field_flag);
        assert_eq!(header.pic_order_cnt_lsb, 9);
        // Field pictures never carry delta_pic_order_cnt_bottom.
        assert_eq!(header.delta_pic_order_cnt_bottom, 0);
    }

    #[test]
    fn test_poc_type_two_has_no_lsb() {
        let sps = SpsBuilder {
            pic_order_cnt_type: 2,
            ..Default::default()
        };
        let slice = SliceBuilder {
            frame_num: 7,
            ..Default::default()
        };
        let header = parse(&slice, &sps, &PpsBuilder::default());
        assert_eq!(header.frame_num, 7);
        assert_eq!(header.pic_order_cnt_lsb, 0);
    }

    #[test]
    fn test_unknown_pps_fails() {
        let sps = SpsBuilder::default();
        let params = parameter_sets(&sps, &PpsBuilder::default());
        let nal = SliceBuilder {
            pic_parameter_set_id: 4,
            ..Default::default()
        }
        .build(&sps, &PpsBuilder::default());
        let header = NalHeader::from_nal(&nal).unwrap();
        assert!(SliceHeader::parse(&header, &nal, &params).is_err());
    }

    #[test]
    fn test_slice_type_mapping() {
        assert_eq!(SliceType::from_raw(0), SliceType::P);
        assert_eq!(SliceType::from_raw(6), SliceType::B);
        assert_eq!(SliceType::from_raw(9), SliceType::Si);
        assert!(!SliceType::from_raw(5).is_intra());
    }
}
