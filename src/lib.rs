//! # PixelReel
//!
//! H.264 playback pipeline for Vulkan Video.
//!
//! PixelReel turns a demuxed H.264 title into a stream of decode submissions
//! for a Vulkan Video engine, and decides which decoded picture should be on
//! screen at any wall-clock time.
//!
//! ## Features
//!
//! - Access unit extraction from length-prefixed samples into one shared
//!   bitstream arena
//! - Picture order count derivation (types 0 and 2)
//! - A bounded pool of memory frames with retirement-driven recycling
//! - Sliding-window DPB slot management
//! - Play, pause, loop and seek on a modular playback timeline
//!
//! ## Example
//!
//! ```no_run
//! use pixelreel::{DecodeEngine, DecoderConfig, Demuxer, VideoDecoder};
//!
//! fn play<D: Demuxer, E: DecodeEngine>(demuxer: D, engine: E) -> pixelreel::Result<()> {
//!     let mut decoder = VideoDecoder::new(demuxer, engine, DecoderConfig::default())?;
//!     decoder.play();
//!
//!     let completions = decoder.completion_sender();
//!     // Hand `completions` to whatever retires GPU work, then once per frame:
//!     decoder.update(16_667)?;
//!     if let Some(image) = decoder.get_latest_available_frame() {
//!         // Sample `image` in the presentation pass.
//!         let _ = image;
//!     }
//!     Ok(())
//! }
//! ```

pub mod decoder;
pub mod error;

pub use decoder::dpb::{DpbSlotManager, SlotBinding};
pub use decoder::engine::{DecodeRequest, PictureInfo};
pub use decoder::{
    video_time_to_ticks, CompletionSender, DecodeEngine, DecodeOutcome, DecoderConfig, Demuxer,
    Dimensions, FrameInfo, FrameRetired, FrameState, FrameType, PlaybackState, SampleRecord,
    SampleTable, VideoDecoder, VideoMetadata, TICKS_PER_SECOND,
};
pub use error::{PixelReelError, Result};
