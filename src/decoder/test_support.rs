//! Synthetic H.264 syntax for unit tests.

use std::io::Cursor;

use super::demux::SampleTable;
use super::params::FrameCropping;

/// MSB-first writer producing RBSP bytes.
#[derive(Default)]
pub(crate) struct BitWriter {
    data: Vec<u8>,
    current_byte: u8,
    bit_position: u8, // bits already in current_byte (0-7)
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, bit: bool) {
        self.current_byte = (self.current_byte << 1) | u8::from(bit);
        self.bit_position += 1;
        if self.bit_position == 8 {
            self.data.push(self.current_byte);
            self.current_byte = 0;
            self.bit_position = 0;
        }
    }

    pub fn write_bits(&mut self, value: u32, num_bits: u8) {
        for shift in (0..num_bits).rev() {
            self.push_bit((value >> shift) & 1 == 1);
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.push_bit(flag);
    }

    pub fn write_ue(&mut self, value: u32) {
        let code = u64::from(value) + 1;
        let len = 64 - code.leading_zeros() as u8;
        for _ in 1..len {
            self.push_bit(false);
        }
        for shift in (0..len).rev() {
            self.push_bit((code >> shift) & 1 == 1);
        }
    }

    pub fn write_se(&mut self, value: i32) {
        let code = if value > 0 {
            2 * value as i64 - 1
        } else {
            -2 * value as i64
        };
        self.write_ue(code as u32);
    }

    /// Flush the partial byte, zero-padded, and return the data.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if self.bit_position > 0 {
            let byte = self.current_byte << (8 - self.bit_position);
            self.data.push(byte);
        }
        self.data
    }

    /// Append `rbsp_trailing_bits()` and pack.
    pub fn into_rbsp(mut self) -> Vec<u8> {
        self.push_bit(true);
        while self.bit_position != 0 {
            self.push_bit(false);
        }
        self.into_bytes()
    }
}

/// Insert emulation prevention bytes and prepend the NAL header byte.
pub(crate) fn nal_unit(header: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut nal = vec![header];
    let mut zero_run = 0;
    for &byte in rbsp {
        if zero_run >= 2 && byte <= 0x03 {
            nal.push(0x03);
            zero_run = 0;
        }
        nal.push(byte);
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
    }
    nal
}

/// Concatenate NAL units with 4-byte big-endian length prefixes.
pub(crate) fn length_prefixed(nals: &[&[u8]]) -> Vec<u8> {
    nals.iter()
        .flat_map(|nal| {
            let len = (nal.len() as u32).to_be_bytes();
            [&len[..], *nal].concat()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub(crate) struct SpsBuilder {
    pub seq_parameter_set_id: u32,
    pub profile_idc: u8,
    pub scaling_matrix: bool,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt_type: u32,
    pub log2_max_pic_order_cnt_lsb_minus4: u32,
    pub max_num_ref_frames: u32,
    pub width_in_mbs: u32,
    pub height_in_map_units: u32,
    pub frame_mbs_only: bool,
    pub frame_cropping: Option<FrameCropping>,
}

impl Default for SpsBuilder {
    fn default() -> Self {
        Self {
            seq_parameter_set_id: 0,
            profile_idc: 66,
            scaling_matrix: false,
            log2_max_frame_num_minus4: 0,
            pic_order_cnt_type: 0,
            log2_max_pic_order_cnt_lsb_minus4: 2,
            max_num_ref_frames: 1,
            width_in_mbs: 20,
            height_in_map_units: 15,
            frame_mbs_only: true,
            frame_cropping: None,
        }
    }
}

impl SpsBuilder {
    pub fn build(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(u32::from(self.profile_idc), 8);
        w.write_bits(0, 8);
        w.write_bits(30, 8);
        w.write_ue(self.seq_parameter_set_id);
        if self.profile_idc == 100 {
            w.write_ue(1); // chroma_format_idc
            w.write_ue(0);
            w.write_ue(0);
            w.write_flag(false);
            w.write_flag(self.scaling_matrix);
            if self.scaling_matrix {
                // First 4x4 list present and flat, the rest absent.
                w.write_flag(true);
                for _ in 0..16 {
                    w.write_se(0);
                }
                for _ in 1..8 {
                    w.write_flag(false);
                }
            }
        }
        w.write_ue(self.log2_max_frame_num_minus4);
        w.write_ue(self.pic_order_cnt_type);
        match self.pic_order_cnt_type {
            0 => w.write_ue(self.log2_max_pic_order_cnt_lsb_minus4),
            1 => {
                w.write_flag(true);
                w.write_se(0);
                w.write_se(0);
                w.write_ue(0);
            }
            _ => {}
        }
        w.write_ue(self.max_num_ref_frames);
        w.write_flag(false);
        w.write_ue(self.width_in_mbs - 1);
        w.write_ue(self.height_in_map_units - 1);
        w.write_flag(self.frame_mbs_only);
        if !self.frame_mbs_only {
            w.write_flag(false);
        }
        w.write_flag(true);
        w.write_flag(self.frame_cropping.is_some());
        if let Some(crop) = self.frame_cropping {
            w.write_ue(crop.left);
            w.write_ue(crop.right);
            w.write_ue(crop.top);
            w.write_ue(crop.bottom);
        }
        w.write_flag(false); // vui_parameters_present_flag
        nal_unit(0x67, &w.into_rbsp())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PpsBuilder {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub bottom_field_pic_order_in_frame_present: bool,
}

impl PpsBuilder {
    pub fn build(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_ue(self.pic_parameter_set_id);
        w.write_ue(self.seq_parameter_set_id);
        w.write_flag(false);
        w.write_flag(self.bottom_field_pic_order_in_frame_present);
        w.write_ue(0); // num_slice_groups_minus1
        w.write_ue(0);
        w.write_ue(0);
        w.write_flag(false);
        w.write_bits(0, 2);
        w.write_se(0);
        w.write_se(0);
        w.write_se(0);
        w.write_flag(true);
        w.write_flag(false);
        w.write_flag(false);
        nal_unit(0x68, &w.into_rbsp())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct SliceBuilder {
    pub idr: bool,
    pub nal_ref_idc: u8,
    pub slice_type: u32,
    pub pic_parameter_set_id: u32,
    pub frame_num: u32,
    pub field_pic: bool,
    pub bottom_field: bool,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
    pub delta_pic_order_cnt_bottom: i32,
}

impl Default for SliceBuilder {
    fn default() -> Self {
        Self {
            idr: false,
            nal_ref_idc: 2,
            slice_type: 5,
            pic_parameter_set_id: 0,
            frame_num: 0,
            field_pic: false,
            bottom_field: false,
            idr_pic_id: 0,
            pic_order_cnt_lsb: 0,
            delta_pic_order_cnt_bottom: 0,
        }
    }
}

impl SliceBuilder {
    pub fn idr() -> Self {
        Self {
            idr: true,
            nal_ref_idc: 3,
            slice_type: 7,
            ..Default::default()
        }
    }

    pub fn predictive(nal_ref_idc: u8, frame_num: u32, pic_order_cnt_lsb: u32) -> Self {
        Self {
            nal_ref_idc,
            frame_num,
            pic_order_cnt_lsb,
            ..Default::default()
        }
    }

    pub fn build(&self, sps: &SpsBuilder, pps: &PpsBuilder) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(self.slice_type);
        w.write_ue(self.pic_parameter_set_id);
        w.write_bits(self.frame_num, (sps.log2_max_frame_num_minus4 + 4) as u8);
        if !sps.frame_mbs_only {
            w.write_flag(self.field_pic);
            if self.field_pic {
                w.write_flag(self.bottom_field);
            }
        }
        if self.idr {
            w.write_ue(self.idr_pic_id);
        }
        if sps.pic_order_cnt_type == 0 {
            w.write_bits(
                self.pic_order_cnt_lsb,
                (sps.log2_max_pic_order_cnt_lsb_minus4 + 4) as u8,
            );
            if pps.bottom_field_pic_order_in_frame_present && !self.field_pic {
                w.write_se(self.delta_pic_order_cnt_bottom);
            }
        }
        // Stand-in for the rest of the header and the slice data.
        w.write_bits(0xA5A5, 16);
        let header = (self.nal_ref_idc << 5) | if self.idr { 5 } else { 1 };
        nal_unit(header, &w.into_rbsp())
    }
}

/// One access unit of a synthetic stream.
#[derive(Debug, Clone)]
pub(crate) struct SyntheticFrame {
    pub slice: SliceBuilder,
    /// Prefix the slice with an access unit delimiter.
    pub with_delimiter: bool,
}

impl SyntheticFrame {
    pub fn idr() -> Self {
        Self {
            slice: SliceBuilder::idr(),
            with_delimiter: true,
        }
    }

    pub fn predictive(nal_ref_idc: u8, frame_num: u32, pic_order_cnt_lsb: u32) -> Self {
        Self {
            slice: SliceBuilder::predictive(nal_ref_idc, frame_num, pic_order_cnt_lsb),
            with_delimiter: false,
        }
    }
}

/// Build an in-memory title with fixed per-sample duration.
pub(crate) fn synthetic_stream(
    sps: &SpsBuilder,
    pps: &PpsBuilder,
    frames: &[SyntheticFrame],
    timescale: u64,
    sample_duration: u32,
) -> SampleTable<Cursor<Vec<u8>>> {
    let mut table = SampleTable::in_memory(timescale)
        .with_sequence_parameter_set(sps.build())
        .with_picture_parameter_set(pps.build());
    for frame in frames {
        let slice = frame.slice.build(sps, pps);
        if frame.with_delimiter {
            table.push_sample(&[&[0x09u8, 0xF0][..], &slice[..]], sample_duration);
        } else {
            table.push_sample(&[&slice[..]], sample_duration);
        }
    }
    table
}

/// Closed GOPs of `gop_length` frames: IDR then reference P frames with
/// `pic_order_cnt_lsb` stepping by 2.
pub(crate) fn simple_gops(gop_count: usize, gop_length: u32) -> Vec<SyntheticFrame> {
    let mut frames = Vec::new();
    for _ in 0..gop_count {
        frames.push(SyntheticFrame::idr());
        for n in 1..gop_length {
            frames.push(SyntheticFrame::predictive(2, n, 2 * n));
        }
    }
    frames
}
