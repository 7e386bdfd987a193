//! Picture order count derivation (8.2.1).
//!
//! This module implements:
//! - POC type 0 (explicit `pic_order_cnt_lsb` with MSB wrap tracking)
//! - POC type 2 (POC implied by `frame_num` and reference status)
//! - A GOP counter that advances on every instantaneous refresh
//!
//! Type 1 streams are rejected with
//! [`PixelReelError::UnsupportedOrderCountType`].

use super::nal::NalHeader;
use super::params::SequenceParameterSet;
use super::slice::SliceHeader;
use crate::error::{PixelReelError, Result};

/// Order counts derived for one picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureOrder {
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    /// PicOrderCnt of the picture (8-1).
    pub poc: i32,
    /// Index of the group of pictures the picture belongs to.
    pub gop: i32,
}

/// Rolling state of the POC calculator.
///
/// Consumed strictly in decode order; it can only be rewound by
/// [`PicOrderCountState::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicOrderCountState {
    /// prevPicOrderCntMsb (type 0).
    pub prev_pic_order_cnt_msb: i32,
    /// prevPicOrderCntLsb (type 0).
    pub prev_pic_order_cnt_lsb: i32,
    /// GOP counter, -1 until the first refresh picture.
    pub poc_cycle: i32,
    /// prevFrameNum (type 2).
    pub prev_frame_num: u32,
    /// prevFrameNumOffset (type 2).
    pub prev_frame_num_offset: i32,
}

impl Default for PicOrderCountState {
    fn default() -> Self {
        Self {
            prev_pic_order_cnt_msb: 0,
            prev_pic_order_cnt_lsb: 0,
            poc_cycle: -1,
            prev_frame_num: 0,
            prev_frame_num_offset: 0,
        }
    }
}

impl PicOrderCountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget all history, as when decoding restarts at a refresh point.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Derive the order counts of one picture and advance the state.
    ///
    /// The state is left untouched when the stream's POC type is unsupported.
    pub fn calculate(
        &mut self,
        sps: &SequenceParameterSet,
        nal: &NalHeader,
        slice: &SliceHeader,
    ) -> Result<PictureOrder> {
        let (top, bottom) = match sps.pic_order_cnt_type {
            0 => self.calculate_type0(sps, nal, slice),
            2 => self.calculate_type2(sps, nal, slice),
            other => return Err(PixelReelError::UnsupportedOrderCountType(other)),
        };

        // (8-1)
        let poc = if !slice.field_pic_flag {
            top.min(bottom)
        } else if slice.bottom_field_flag {
            bottom
        } else {
            top
        };

        Ok(PictureOrder {
            top_field_order_cnt: top,
            bottom_field_order_cnt: bottom,
            poc,
            gop: self.poc_cycle,
        })
    }

    /// 8.2.1.1
    fn calculate_type0(
        &mut self,
        sps: &SequenceParameterSet,
        nal: &NalHeader,
        slice: &SliceHeader,
    ) -> (i32, i32) {
        if nal.nal_unit_type.is_idr() {
            self.prev_pic_order_cnt_msb = 0;
            self.prev_pic_order_cnt_lsb = 0;
            self.poc_cycle += 1;
        }

        let max_poc_lsb = sps.max_pic_order_cnt_lsb();
        let poc_lsb = slice.pic_order_cnt_lsb as i32;
        let prev_lsb = self.prev_pic_order_cnt_lsb;

        // (8-3)
        let poc_msb = if poc_lsb < prev_lsb && (prev_lsb - poc_lsb) >= max_poc_lsb / 2 {
            self.prev_pic_order_cnt_msb + max_poc_lsb
        } else if poc_lsb > prev_lsb && (poc_lsb - prev_lsb) > max_poc_lsb / 2 {
            self.prev_pic_order_cnt_msb - max_poc_lsb
        } else {
            self.prev_pic_order_cnt_msb
        };

        let mut top = 0;
        let mut bottom = 0;

        // (8-4)
        if !slice.bottom_field_flag {
            top = poc_msb + poc_lsb;
        }
        // (8-5)
        if !slice.field_pic_flag {
            bottom = top + slice.delta_pic_order_cnt_bottom;
        } else if slice.bottom_field_flag {
            bottom = poc_msb + poc_lsb;
        }

        if nal.is_reference() {
            self.prev_pic_order_cnt_msb = poc_msb;
            self.prev_pic_order_cnt_lsb = poc_lsb;
        }

        (top, bottom)
    }

    /// 8.2.1.3
    fn calculate_type2(
        &mut self,
        sps: &SequenceParameterSet,
        nal: &NalHeader,
        slice: &SliceHeader,
    ) -> (i32, i32) {
        let is_idr = nal.nal_unit_type.is_idr();
        let frame_num = slice.frame_num as i32;

        // (8-11)
        let frame_num_offset = if is_idr {
            0
        } else if self.prev_frame_num > slice.frame_num {
            self.prev_frame_num_offset + sps.max_frame_num() as i32
        } else {
            self.prev_frame_num_offset
        };

        // (8-12)
        let temp_poc = if is_idr {
            0
        } else if !nal.is_reference() {
            2 * (frame_num_offset + frame_num) - 1
        } else {
            2 * (frame_num_offset + frame_num)
        };

        self.prev_frame_num_offset = frame_num_offset;
        self.prev_frame_num = slice.frame_num;

        if temp_poc == 0 {
            self.poc_cycle += 1;
        }

        // (8-13)
        if !slice.field_pic_flag {
            (temp_poc, temp_poc)
        } else if slice.bottom_field_flag {
            (0, temp_poc)
        } else {
            (temp_poc, 0)
        }
    }
}
