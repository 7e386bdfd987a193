//! H.264 playback pipeline: from container samples to a displayable picture.
//!
//! This module provides:
//! - Shared decoder types and configuration (`DecoderConfig`, `FrameInfo`, etc.)
//! - Bitstream syntax parsing (`bitreader`, `nal`, `params`, `slice`)
//! - Picture order count derivation (`poc` module)
//! - Access unit extraction into the bitstream arena (`extract` module)
//! - The memory frame pool and DPB slot management (`frame_pool`, `dpb`)
//! - Playback timeline and seeking (`timeline`, `seek`)
//! - The owned [`VideoDecoder`] tying it all together (`player` module)

pub mod bitreader;
pub mod demux;
pub mod dpb;
pub mod engine;
pub mod extract;
pub mod frame_pool;
pub mod nal;
pub mod params;
pub mod player;
pub mod poc;
pub mod seek;
pub mod slice;
pub mod timeline;

#[cfg(test)]
pub(crate) mod test_support;

use ash::vk;

pub use demux::{video_time_to_ticks, Demuxer, SampleRecord, SampleTable, VideoMetadata};
pub use engine::{CompletionSender, DecodeEngine, FrameRetired};
pub use frame_pool::{DecodeOutcome, FrameState};
pub use player::VideoDecoder;
pub use timeline::PlaybackState;

use nal::NalUnitType;
use slice::SliceHeader;

/// Timeline ticks per second (microseconds).
pub const TICKS_PER_SECOND: u64 = 1_000_000;

/// Default GOP size used to bound how far from the playhead a decoded
/// picture may be before it is recycled.
pub const DEFAULT_GOP_SIZE: u32 = 32;

/// Default ceiling on DPB slots (16 reference frames as field pairs, plus the
/// picture being reconstructed).
pub const DEFAULT_MAX_DPB_SLOTS: u32 = 33;

/// Video dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<Dimensions> for vk::Extent2D {
    fn from(dimensions: Dimensions) -> Self {
        vk::Extent2D {
            width: dimensions.width,
            height: dimensions.height,
        }
    }
}

/// Frame types in a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// Not yet classified.
    #[default]
    Unknown,
    /// Instantaneous decoder refresh picture.
    Intra,
    /// Any other coded picture.
    Predictive,
}

/// Metadata of one access unit, stamped when it is extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameInfo {
    pub frame_type: FrameType,
    /// `nal_unit_type` of the coded slice.
    pub nal_unit_type: u8,
    pub nal_ref_idc: u8,
    pub top_field_order_cnt: i32,
    pub bottom_field_order_cnt: i32,
    /// Picture order count.
    pub poc: i32,
    /// Group of pictures the frame belongs to.
    pub gop: i32,
    /// Container sample the frame was extracted from.
    pub sample_index: usize,
    /// Presentation timestamp in timescale units.
    pub pts_in_timescale_units: u64,
    pub duration_in_timescale_units: u32,
    /// Presentation timestamp in ticks.
    pub pts: u64,
    /// Duration in ticks.
    pub duration: u64,
    pub slice_header: SliceHeader,
    pub seq_parameter_set_id: u32,
}

impl FrameInfo {
    pub fn is_idr(&self) -> bool {
        NalUnitType::from_id(self.nal_unit_type).is_idr()
    }

    /// Whether the picture is kept as a reference after decoding.
    pub fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }
}

/// Decoder configuration.
#[derive(Debug, Clone)]
#[must_use]
pub struct DecoderConfig {
    /// Recycling bound multiplier: decoded pictures further than
    /// `gop_size` frame durations from the playhead are recycled.
    pub gop_size: u32,
    /// Alignment applied to the used size of each recorded bitstream.
    pub min_bitstream_buffer_size_alignment: usize,
    /// Alignment of each memory frame's bitstream window offset.
    pub min_bitstream_buffer_offset_alignment: usize,
    /// Largest DPB the decode engine supports.
    pub max_dpb_slots: u32,
    /// Whether playback restarts at the beginning after the last frame.
    pub looping: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            gop_size: DEFAULT_GOP_SIZE,
            min_bitstream_buffer_size_alignment: 1,
            min_bitstream_buffer_offset_alignment: 1,
            max_dpb_slots: DEFAULT_MAX_DPB_SLOTS,
            looping: true,
        }
    }
}

impl DecoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the GOP size used by the recycling bound.
    pub fn with_gop_size(mut self, size: u32) -> Self {
        self.gop_size = size;
        self
    }

    /// Set the bitstream buffer alignments reported by the decode engine.
    pub fn with_bitstream_alignment(mut self, size_alignment: usize, offset_alignment: usize) -> Self {
        self.min_bitstream_buffer_size_alignment = size_alignment;
        self.min_bitstream_buffer_offset_alignment = offset_alignment;
        self
    }

    /// Set the DPB slot ceiling.
    pub fn with_max_dpb_slots(mut self, slots: u32) -> Self {
        self.max_dpb_slots = slots;
        self
    }

    /// Set whether playback loops.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod config_tests {
        use super::*;

        #[test]
        fn test_defaults() {
            let config = DecoderConfig::default();
            assert_eq!(config.gop_size, DEFAULT_GOP_SIZE);
            assert_eq!(config.min_bitstream_buffer_size_alignment, 1);
            assert_eq!(config.min_bitstream_buffer_offset_alignment, 1);
            assert_eq!(config.max_dpb_slots, DEFAULT_MAX_DPB_SLOTS);
            assert!(config.looping);
        }

        #[test]
        fn test_builder_chain() {
            let config = DecoderConfig::new()
                .with_gop_size(8)
                .with_bitstream_alignment(256, 64)
                .with_max_dpb_slots(17)
                .with_looping(false);
            assert_eq!(config.gop_size, 8);
            assert_eq!(config.min_bitstream_buffer_size_alignment, 256);
            assert_eq!(config.min_bitstream_buffer_offset_alignment, 64);
            assert_eq!(config.max_dpb_slots, 17);
            assert!(!config.looping);
        }
    }

    mod frame_info_tests {
        use super::*;

        #[test]
        fn test_default_is_unknown_non_reference() {
            let info = FrameInfo::default();
            assert_eq!(info.frame_type, FrameType::Unknown);
            assert!(!info.is_idr());
            assert!(!info.is_reference());
        }

        #[test]
        fn test_idr_reference() {
            let info = FrameInfo {
                frame_type: FrameType::Intra,
                nal_unit_type: 5,
                nal_ref_idc: 3,
                ..Default::default()
            };
            assert!(info.is_idr());
            assert!(info.is_reference());
        }
    }

    #[test]
    fn test_dimensions_to_extent() {
        let extent: vk::Extent2D = Dimensions::new(1920, 1080).into();
        assert_eq!(extent.width, 1920);
        assert_eq!(extent.height, 1080);
    }
}
