//! Memory frames and the bitstream arena they write into.
//!
//! The arena is one contiguous byte buffer statically split into one
//! fixed-size window per memory frame. A window is cleared by zeroing its
//! used-byte counter; windows never move and never overlap.

use std::ops::Range;

use ash::vk;
use tracing::{debug, warn};

use super::FrameInfo;
use crate::error::{PixelReelError, Result};

/// Round `size` up to a multiple of `alignment`. Zero stays zero.
pub fn align_to(size: usize, alignment: usize) -> usize {
    if size == 0 {
        return 0;
    }
    let alignment = alignment.max(1);
    ((size - 1) / alignment + 1) * alignment
}

/// Byte range of the arena reserved for one memory frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArenaWindow {
    pub offset: usize,
    pub capacity: usize,
    /// Bytes written since the window was last cleared.
    pub used: usize,
}

impl ArenaWindow {
    pub fn available(&self) -> usize {
        self.capacity - self.used
    }

    /// Fail with [`PixelReelError::CapacityExceeded`] unless `needed` more
    /// bytes fit.
    pub fn ensure_fits(&self, needed: usize) -> Result<()> {
        if needed > self.available() {
            return Err(PixelReelError::CapacityExceeded {
                needed,
                available: self.available(),
            });
        }
        Ok(())
    }

    /// Arena range holding the written bytes.
    pub fn used_range(&self) -> Range<usize> {
        self.offset..self.offset + self.used
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}

/// Shared bitstream buffer backing every memory frame.
#[derive(Debug, Clone)]
pub struct BitstreamArena {
    bytes: Vec<u8>,
    size_alignment: usize,
}

impl BitstreamArena {
    /// Allocate an arena and split it into `window_count` windows of at least
    /// `window_capacity` bytes.
    ///
    /// Window capacities are rounded up to `size_alignment` and window
    /// offsets to `offset_alignment`.
    pub fn partition(
        window_count: usize,
        window_capacity: usize,
        offset_alignment: usize,
        size_alignment: usize,
    ) -> Result<(Self, Vec<ArenaWindow>)> {
        if window_count == 0 || window_capacity == 0 {
            return Err(PixelReelError::InvalidConfig(format!(
                "cannot partition {} windows of {} bytes",
                window_count, window_capacity
            )));
        }
        let capacity = align_to(window_capacity, size_alignment);
        let stride = align_to(capacity, offset_alignment);

        let windows = (0..window_count)
            .map(|i| ArenaWindow {
                offset: i * stride,
                capacity,
                used: 0,
            })
            .collect::<Vec<_>>();

        debug!(
            "Bitstream arena: {} windows of {} bytes (stride {})",
            window_count, capacity, stride
        );

        Ok((
            Self {
                bytes: vec![0; stride * window_count],
                size_alignment: size_alignment.max(1),
            },
            windows,
        ))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn size_alignment(&self) -> usize {
        self.size_alignment
    }

    /// Copy `chunks` back to back into the free part of `window`.
    ///
    /// Nothing is written unless all chunks fit.
    pub fn append(&mut self, window: &mut ArenaWindow, chunks: &[&[u8]]) -> Result<()> {
        let needed = chunks.iter().map(|c| c.len()).sum();
        window.ensure_fits(needed)?;

        let mut cursor = window.offset + window.used;
        for chunk in chunks {
            self.bytes[cursor..cursor + chunk.len()].copy_from_slice(chunk);
            cursor += chunk.len();
        }
        window.used += needed;
        Ok(())
    }

    /// Pad the used part of `window` with zeros up to the size alignment.
    pub fn seal(&mut self, window: &mut ArenaWindow) {
        let aligned = align_to(window.used, self.size_alignment).min(window.capacity);
        let start = window.offset + window.used;
        let end = window.offset + aligned;
        self.bytes[start..end].fill(0);
        window.used = aligned;
    }

    /// Written bytes of `window`.
    pub fn window_bytes(&self, window: &ArenaWindow) -> &[u8] {
        &self.bytes[window.used_range()]
    }
}

/// Lifecycle of a memory frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    /// A decode is being recorded or is in flight.
    Recording,
    DecodeSuccess,
    DecodeFailed,
}

impl FrameState {
    /// Whether a decode outcome has been reported.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::DecodeSuccess | Self::DecodeFailed)
    }
}

/// Outcome of a retired decode as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeOutcome {
    Success,
    Failed,
    /// The query result was not available yet.
    Pending,
}

impl DecodeOutcome {
    /// Map a `VkQueryResultStatusKHR` read back for the decode.
    ///
    /// Positive statuses are completions, negative ones errors. A retirement
    /// without any status is treated as success.
    pub fn from_query_status(status: Option<vk::QueryResultStatusKHR>) -> Self {
        match status.map(|s| s.as_raw()) {
            None => Self::Success,
            Some(raw) if raw > 0 => Self::Success,
            Some(raw) if raw < 0 => Self::Failed,
            Some(_) => Self::Pending,
        }
    }
}

/// One slot of decode concurrency.
#[derive(Debug, Clone)]
pub struct MemoryFrame {
    pub index: usize,
    /// Decode destination image.
    pub image: vk::Image,
    pub window: ArenaWindow,
    pub info: FrameInfo,
    pub state: FrameState,
}

/// Fixed ring of memory frames sharing one bitstream arena.
#[derive(Debug)]
pub struct FramePool {
    frames: Vec<MemoryFrame>,
    arena: BitstreamArena,
}

impl FramePool {
    /// Build one memory frame per image, each with a window of at least
    /// `window_capacity` bytes.
    pub fn new(
        images: Vec<vk::Image>,
        window_capacity: usize,
        offset_alignment: usize,
        size_alignment: usize,
    ) -> Result<Self> {
        let (arena, windows) = BitstreamArena::partition(
            images.len(),
            window_capacity,
            offset_alignment,
            size_alignment,
        )?;
        let frames = images
            .into_iter()
            .zip(windows)
            .enumerate()
            .map(|(index, (image, window))| MemoryFrame {
                index,
                image,
                window,
                info: FrameInfo::default(),
                state: FrameState::Idle,
            })
            .collect();
        Ok(Self { frames, arena })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[MemoryFrame] {
        &self.frames
    }

    pub fn frame(&self, index: usize) -> Option<&MemoryFrame> {
        self.frames.get(index)
    }

    pub fn arena(&self) -> &BitstreamArena {
        &self.arena
    }

    /// Split borrow of one frame and the arena it writes into.
    pub fn frame_and_arena_mut(
        &mut self,
        index: usize,
    ) -> Option<(&mut MemoryFrame, &mut BitstreamArena)> {
        let frame = self.frames.get_mut(index)?;
        Some((frame, &mut self.arena))
    }

    /// Bytes recorded for a frame's decode.
    pub fn bitstream(&self, index: usize) -> Option<&[u8]> {
        self.frames
            .get(index)
            .map(|frame| self.arena.window_bytes(&frame.window))
    }

    pub fn count(&self, state: FrameState) -> usize {
        self.frames.iter().filter(|f| f.state == state).count()
    }

    /// Whether every frame holds a successfully decoded picture.
    pub fn all_decoded(&self) -> bool {
        self.frames
            .iter()
            .all(|f| f.state == FrameState::DecodeSuccess)
    }

    /// Claim the first idle or failed frame for recording.
    ///
    /// Returns `None` while another frame is still recording, or when every
    /// frame holds a decoded picture.
    pub fn acquire_idle_or_failed(&mut self) -> Option<usize> {
        if self.frames.iter().any(|f| f.state == FrameState::Recording) {
            return None;
        }
        let frame = self
            .frames
            .iter_mut()
            .find(|f| matches!(f.state, FrameState::Idle | FrameState::DecodeFailed))?;
        frame.state = FrameState::Recording;
        frame.window.clear();
        frame.info = FrameInfo::default();
        Some(frame.index)
    }

    /// Apply a retirement report from the engine.
    ///
    /// The window is cleared whatever the outcome. Only a recording frame
    /// changes state.
    pub fn mark_outcome(&mut self, index: usize, outcome: DecodeOutcome) {
        let Some(frame) = self.frames.get_mut(index) else {
            warn!("Retirement reported for unknown memory frame {}", index);
            return;
        };
        frame.window.clear();

        if frame.state != FrameState::Recording {
            debug!(
                "Memory frame {} retired in state {:?}, ignoring",
                index, frame.state
            );
            return;
        }
        match outcome {
            DecodeOutcome::Success => frame.state = FrameState::DecodeSuccess,
            DecodeOutcome::Failed => {
                warn!(
                    "Decode failed for memory frame {} (poc {})",
                    index, frame.info.poc
                );
                frame.state = FrameState::DecodeFailed;
            }
            DecodeOutcome::Pending => {
                warn!(
                    "Memory frame {} retired before its decode status was available",
                    index
                );
            }
        }
    }

    /// Fail a frame whose access unit could not be recorded.
    pub fn mark_failed(&mut self, index: usize) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.window.clear();
            frame.state = FrameState::DecodeFailed;
        }
    }

    /// Return a frame with a terminal state to `Idle`.
    pub fn recycle(&mut self, index: usize) -> bool {
        match self.frames.get_mut(index) {
            Some(frame) if frame.state.is_terminal() => {
                frame.state = FrameState::Idle;
                true
            }
            _ => false,
        }
    }
}
