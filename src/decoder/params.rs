//! Sequence and picture parameter sets.
//!
//! Only the syntax the playback pipeline consumes is kept: the fields that
//! shape slice headers, the picture order count mode, the reference frame
//! budget (which sizes the DPB and the memory frame pool) and the coded
//! picture dimensions. VUI and everything after it is ignored.

use std::collections::BTreeMap;

use tracing::debug;

use super::bitreader::{strip_emulation_prevention, BitReader};
use super::nal::{NalHeader, NalUnitType};
use crate::error::{PixelReelError, Result};

/// H.264 macroblock size in pixels.
pub const MB_SIZE: u32 = 16;

/// Profiles whose SPS carries chroma format, bit depth and scaling matrices (7.3.2.1.1).
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Frame cropping rectangle in crop units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCropping {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

/// Parsed sequence parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceParameterSet {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub chroma_format_idc: u32,
    pub separate_colour_plane_flag: bool,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    /// Only meaningful for `pic_order_cnt_type == 1`.
    pub delta_pic_order_always_zero_flag: bool,
    pub max_num_ref_frames: u32,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub frame_cropping: Option<FrameCropping>,
}

impl SequenceParameterSet {
    /// Parse an SPS NAL unit, header byte included.
    pub fn from_nal(nal: &[u8]) -> Result<Self> {
        let header = NalHeader::from_nal(nal)?;
        if header.nal_unit_type != NalUnitType::Sps {
            return Err(PixelReelError::Bitstream(format!(
                "expected SPS, found NAL unit type {}",
                header.nal_unit_type.id()
            )));
        }
        let rbsp = strip_emulation_prevention(&nal[1..]);
        Self::parse(&mut BitReader::new(&rbsp))
    }

    fn parse(r: &mut BitReader<'_>) -> Result<Self> {
        let profile_idc = r.read_bits(8)? as u8;
        r.skip_bits(8)?; // constraint_set flags + reserved_zero_2bits
        let level_idc = r.read_bits(8)? as u8;
        let seq_parameter_set_id = r.read_ue()?;

        let mut chroma_format_idc = 1;
        let mut separate_colour_plane_flag = false;
        if HIGH_PROFILES.contains(&profile_idc) {
            chroma_format_idc = r.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = r.read_flag()?;
            }
            r.read_ue()?; // bit_depth_luma_minus8
            r.read_ue()?; // bit_depth_chroma_minus8
            r.read_flag()?; // qpprime_y_zero_transform_bypass_flag
            if r.read_flag()? {
                let num_lists = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..num_lists {
                    if r.read_flag()? {
                        skip_scaling_list(r, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        let log2_max_frame_num_minus4 = r.read_ue()?;
        let pic_order_cnt_type = r.read_ue()?;
        let mut log2_max_pic_order_cnt_lsb_minus4 = 0;
        let mut delta_pic_order_always_zero_flag = false;
        match pic_order_cnt_type {
            0 => log2_max_pic_order_cnt_lsb_minus4 = r.read_ue()?,
            1 => {
                delta_pic_order_always_zero_flag = r.read_flag()?;
                r.read_se()?; // offset_for_non_ref_pic
                r.read_se()?; // offset_for_top_to_bottom_field
                let cycle = r.read_ue()?;
                for _ in 0..cycle {
                    r.read_se()?; // offset_for_ref_frame[i]
                }
            }
            _ => {}
        }

        let max_num_ref_frames = r.read_ue()?;
        r.read_flag()?; // gaps_in_frame_num_value_allowed_flag
        let pic_width_in_mbs_minus1 = r.read_ue()?;
        let pic_height_in_map_units_minus1 = r.read_ue()?;
        let frame_mbs_only_flag = r.read_flag()?;
        if !frame_mbs_only_flag {
            r.read_flag()?; // mb_adaptive_frame_field_flag
        }
        r.read_flag()?; // direct_8x8_inference_flag
        let frame_cropping = if r.read_flag()? {
            Some(FrameCropping {
                left: r.read_ue()?,
                right: r.read_ue()?,
                top: r.read_ue()?,
                bottom: r.read_ue()?,
            })
        } else {
            None
        };

        if log2_max_frame_num_minus4 > 12 {
            return Err(PixelReelError::Bitstream(format!(
                "log2_max_frame_num_minus4 {} out of range",
                log2_max_frame_num_minus4
            )));
        }
        if log2_max_pic_order_cnt_lsb_minus4 > 12 {
            return Err(PixelReelError::Bitstream(format!(
                "log2_max_pic_order_cnt_lsb_minus4 {} out of range",
                log2_max_pic_order_cnt_lsb_minus4
            )));
        }

        Ok(Self {
            profile_idc,
            level_idc,
            seq_parameter_set_id,
            chroma_format_idc,
            separate_colour_plane_flag,
            log2_max_frame_num_minus4,
            pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb_minus4,
            delta_pic_order_always_zero_flag,
            max_num_ref_frames,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            frame_cropping,
        })
    }

    /// Bit width of `frame_num` in slice headers.
    pub fn frame_num_bits(&self) -> u8 {
        (self.log2_max_frame_num_minus4 + 4) as u8
    }

    /// MaxFrameNum (7-10).
    pub fn max_frame_num(&self) -> u32 {
        1 << (self.log2_max_frame_num_minus4 + 4)
    }

    /// Bit width of `pic_order_cnt_lsb` in slice headers.
    pub fn pic_order_cnt_lsb_bits(&self) -> u8 {
        (self.log2_max_pic_order_cnt_lsb_minus4 + 4) as u8
    }

    /// MaxPicOrderCntLsb (7-11).
    pub fn max_pic_order_cnt_lsb(&self) -> i32 {
        1 << (self.log2_max_pic_order_cnt_lsb_minus4 + 4)
    }

    /// Macroblock-aligned picture size.
    pub fn padded_dimensions(&self) -> (u32, u32) {
        let width = (self.pic_width_in_mbs_minus1 + 1) * MB_SIZE;
        let map_units = self.pic_height_in_map_units_minus1 + 1;
        let height = (2 - u32::from(self.frame_mbs_only_flag)) * map_units * MB_SIZE;
        (width, height)
    }

    /// Display size after applying the cropping rectangle (7-19 .. 7-22).
    pub fn dimensions(&self) -> (u32, u32) {
        let (width, height) = self.padded_dimensions();
        let Some(crop) = self.frame_cropping else {
            return (width, height);
        };

        let (sub_width_c, sub_height_c) = match self.chroma_format_idc {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        };
        let monochrome_like = self.chroma_format_idc == 0 || self.separate_colour_plane_flag;
        let crop_unit_x = if monochrome_like { 1 } else { sub_width_c };
        let field_factor = 2 - u32::from(self.frame_mbs_only_flag);
        let crop_unit_y = if monochrome_like {
            field_factor
        } else {
            sub_height_c * field_factor
        };

        (
            width.saturating_sub(crop_unit_x * (crop.left + crop.right)),
            height.saturating_sub(crop_unit_y * (crop.top + crop.bottom)),
        )
    }

    /// DPB slots needed for this sequence; every reference frame may occupy
    /// two field slots, plus one slot for the picture being reconstructed.
    pub fn num_dpb_slots(&self) -> u32 {
        self.max_num_ref_frames * 2 + 1
    }
}

/// Skip a `scaling_list()` (7.3.2.1.1.1).
fn skip_scaling_list(r: &mut BitReader<'_>, size: usize) -> Result<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = r.read_se()?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// Parsed picture parameter set prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureParameterSet {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
}

impl PictureParameterSet {
    /// Parse a PPS NAL unit, header byte included.
    pub fn from_nal(nal: &[u8]) -> Result<Self> {
        let header = NalHeader::from_nal(nal)?;
        if header.nal_unit_type != NalUnitType::Pps {
            return Err(PixelReelError::Bitstream(format!(
                "expected PPS, found NAL unit type {}",
                header.nal_unit_type.id()
            )));
        }
        let rbsp = strip_emulation_prevention(&nal[1..]);
        let mut r = BitReader::new(&rbsp);
        Ok(Self {
            pic_parameter_set_id: r.read_ue()?,
            seq_parameter_set_id: r.read_ue()?,
            entropy_coding_mode_flag: r.read_flag()?,
            bottom_field_pic_order_in_frame_present_flag: r.read_flag()?,
        })
    }
}

/// Parameter sets of one title, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ParameterSets {
    sps: BTreeMap<u32, SequenceParameterSet>,
    pps: BTreeMap<u32, PictureParameterSet>,
}

impl ParameterSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every SPS and PPS NAL unit the container provides.
    pub fn from_nals<'a>(
        sps_nals: impl IntoIterator<Item = &'a [u8]>,
        pps_nals: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Self> {
        let mut sets = Self::new();
        for nal in sps_nals {
            sets.insert_sps(SequenceParameterSet::from_nal(nal)?);
        }
        for nal in pps_nals {
            sets.insert_pps(PictureParameterSet::from_nal(nal)?);
        }
        if sets.sps.is_empty() || sets.pps.is_empty() {
            return Err(PixelReelError::MissingParameterSet(format!(
                "need at least one SPS and one PPS, found {} and {}",
                sets.sps.len(),
                sets.pps.len()
            )));
        }
        Ok(sets)
    }

    pub fn insert_sps(&mut self, sps: SequenceParameterSet) {
        debug!(
            "SPS {}: profile {}, level {}, poc type {}, {} ref frames",
            sps.seq_parameter_set_id,
            sps.profile_idc,
            sps.level_idc,
            sps.pic_order_cnt_type,
            sps.max_num_ref_frames
        );
        self.sps.insert(sps.seq_parameter_set_id, sps);
    }

    pub fn insert_pps(&mut self, pps: PictureParameterSet) {
        self.pps.insert(pps.pic_parameter_set_id, pps);
    }

    pub fn sps(&self, id: u32) -> Option<&SequenceParameterSet> {
        self.sps.get(&id)
    }

    pub fn pps(&self, id: u32) -> Option<&PictureParameterSet> {
        self.pps.get(&id)
    }

    /// Resolve the PPS named by a slice and the SPS that PPS refers to.
    pub fn active(
        &self,
        pic_parameter_set_id: u32,
    ) -> Result<(&PictureParameterSet, &SequenceParameterSet)> {
        let pps = self.pps(pic_parameter_set_id).ok_or_else(|| {
            PixelReelError::MissingParameterSet(format!("PPS {}", pic_parameter_set_id))
        })?;
        let sps = self.sps(pps.seq_parameter_set_id).ok_or_else(|| {
            PixelReelError::MissingParameterSet(format!(
                "SPS {} (referenced by PPS {})",
                pps.seq_parameter_set_id, pic_parameter_set_id
            ))
        })?;
        Ok((pps, sps))
    }

    pub fn sequence_parameter_sets(&self) -> impl Iterator<Item = &SequenceParameterSet> {
        self.sps.values()
    }

    /// The SPS with the lowest id; it defines the title's dimensions.
    pub fn primary_sps(&self) -> Option<&SequenceParameterSet> {
        self.sps.values().next()
    }

    /// Largest DPB slot requirement over all sequences.
    pub fn num_dpb_slots(&self) -> u32 {
        self.sps
            .values()
            .map(SequenceParameterSet::num_dpb_slots)
            .max()
            .unwrap_or(0)
    }
}
