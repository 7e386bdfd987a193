//! Decode engine boundary and the completion queue.
//!
//! The engine records decode work and reports retirement later, possibly
//! from another thread. Retirements travel through a crossbeam channel and
//! are drained at the top of each update, so memory frame state never
//! changes underneath the update logic.

use ash::vk;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::warn;

use super::dpb::SlotBinding;
use super::frame_pool::DecodeOutcome;
use crate::error::Result;

/// Picture parameters of one decode (`StdVideoDecodeH264PictureInfo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PictureInfo {
    pub field_pic_flag: bool,
    pub is_intra: bool,
    pub idr_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub is_reference: bool,
    pub seq_parameter_set_id: u32,
    pub pic_parameter_set_id: u32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub pic_order_cnt: [i32; 2],
}

/// One recorded decode.
#[derive(Debug, Clone, Copy)]
pub struct DecodeRequest<'a> {
    /// Memory frame the decode belongs to.
    pub frame_index: usize,
    /// Destination image of the memory frame.
    pub dst_image: vk::Image,
    pub coded_extent: vk::Extent2D,
    /// Offset of the frame's window in the bitstream arena.
    pub bitstream_offset: usize,
    /// Annex-B framed slice data, padded to the size alignment.
    pub bitstream: &'a [u8],
    /// Offset of the slice within `bitstream`.
    pub slice_offset: u32,
    pub picture: PictureInfo,
    pub setup_slot: &'a SlotBinding,
    pub references: &'a [SlotBinding],
}

/// Hardware decoder driven by the pipeline.
pub trait DecodeEngine {
    /// Create the destination image for one memory frame.
    fn create_output_image(&mut self, frame_index: usize, extent: vk::Extent2D) -> Result<vk::Image>;

    /// Open a coding scope with one binding per DPB slot.
    fn begin_session(&mut self, bindings: &[SlotBinding]) -> Result<()>;

    /// Record the decode of one picture.
    fn decode(&mut self, request: &DecodeRequest<'_>) -> Result<()>;

    fn end_session(&mut self) -> Result<()>;
}

/// Retirement of a memory frame's decode work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRetired {
    pub frame_index: usize,
    /// Query status read back for the decode, if queries are in use.
    pub status: Option<vk::QueryResultStatusKHR>,
}

impl FrameRetired {
    pub fn outcome(&self) -> DecodeOutcome {
        DecodeOutcome::from_query_status(self.status)
    }
}

/// Cloneable handle used to report retirements from any thread.
#[derive(Debug, Clone)]
pub struct CompletionSender {
    tx: Sender<FrameRetired>,
}

impl CompletionSender {
    /// Report that a memory frame's decode work has retired.
    ///
    /// Returns `false` if the decoder has been dropped.
    pub fn frame_retired(
        &self,
        frame_index: usize,
        status: Option<vk::QueryResultStatusKHR>,
    ) -> bool {
        self.tx
            .send(FrameRetired {
                frame_index,
                status,
            })
            .is_ok()
    }
}

/// Single-consumer queue of retirement events.
#[derive(Debug)]
pub struct CompletionQueue {
    tx: Sender<FrameRetired>,
    rx: Receiver<FrameRetired>,
}

impl Default for CompletionQueue {
    fn default() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> CompletionSender {
        CompletionSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every event posted so far.
    pub fn drain(&self) -> Vec<FrameRetired> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Completion channel disconnected");
                    break;
                }
            }
        }
        events
    }
}
