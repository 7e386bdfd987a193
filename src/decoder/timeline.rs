//! Playback timeline.
//!
//! Converts monotonically increasing wall-clock ticks into a playhead on a
//! modular timeline of one title duration, and picks the decoded picture
//! closest to that playhead for display.
//!
//! - `Initial`: start and last-update ticks follow the clock; the playhead
//!   stays at the seek offset.
//! - `Pause` and `Seeking`: start ticks advance with the clock so the
//!   playhead stays put.
//! - `Play`: the playhead advances with the clock and wraps at the end.

use tracing::{debug, info};

use super::frame_pool::{FramePool, FrameState};
use crate::error::{PixelReelError, Result};

/// Playback state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Pre-decoding after creation.
    #[default]
    Initial,
    Pause,
    Play,
    /// Holding the displayed picture until the pool has refilled after a seek.
    Seeking,
}

/// Signed distance from the playhead to `pts` on a circle of `total` ticks.
///
/// Offsets up to half the circle ahead read as positive, everything else as
/// negative, so pictures near either end of the title stay close to a
/// playhead that has just wrapped.
pub fn clock_face_offset(pts: u64, playhead: u64, total: u64) -> i64 {
    let total = total as i64;
    let mut offset = (total - playhead as i64 + pts as i64).rem_euclid(total);
    if offset > total / 2 {
        offset -= total;
    }
    offset
}

/// Playhead bookkeeping of one title.
#[derive(Debug, Clone)]
pub struct Timeline {
    duration: u64,
    ticks_at_start: u64,
    ticks_at_last_update: u64,
    ticks_at_playhead: u64,
    ticks_seek_offset: u64,
    state: PlaybackState,
    is_not_looping: bool,
    latest_frame_for_display: Option<usize>,
}

impl Timeline {
    pub fn new(duration_in_ticks: u64, looping: bool) -> Result<Self> {
        if duration_in_ticks == 0 {
            return Err(PixelReelError::InvalidConfig(
                "timeline duration must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            duration: duration_in_ticks,
            ticks_at_start: 0,
            ticks_at_last_update: 0,
            ticks_at_playhead: 0,
            ticks_seek_offset: 0,
            state: PlaybackState::Initial,
            is_not_looping: !looping,
            latest_frame_for_display: None,
        })
    }

    pub fn duration(&self) -> u64 {
        self.duration
    }

    pub fn playhead(&self) -> u64 {
        self.ticks_at_playhead
    }

    /// Playhead as a fraction of the duration.
    pub fn normalized_playhead(&self) -> f32 {
        (self.ticks_at_playhead as f64 / self.duration as f64) as f32
    }

    pub fn seek_offset(&self) -> u64 {
        self.ticks_seek_offset
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn display_frame(&self) -> Option<usize> {
        self.latest_frame_for_display
    }

    pub fn is_looping(&self) -> bool {
        !self.is_not_looping
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.is_not_looping = !looping;
    }

    /// Start playing from `Pause` or `Initial`.
    pub fn play(&mut self) {
        if matches!(self.state, PlaybackState::Pause | PlaybackState::Initial) {
            self.state = PlaybackState::Play;
        }
    }

    /// Pause a playing timeline, or resume one that is not playing.
    pub fn set_pause_state(&mut self, should_pause: bool) {
        if should_pause {
            if self.state == PlaybackState::Play {
                self.state = PlaybackState::Pause;
            }
        } else {
            self.play();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state == PlaybackState::Pause
    }

    /// Leave `Initial` once there is nothing left to pre-decode.
    pub fn finish_initial_decode(&mut self) {
        if self.state == PlaybackState::Initial {
            debug!("Initial decode complete, pausing");
            self.state = PlaybackState::Pause;
        }
    }

    /// Enter `Seeking` with a new seek offset. Supersedes any seek in progress.
    pub fn begin_seek(&mut self, seek_offset: u64) {
        self.ticks_seek_offset = seek_offset % self.duration;
        self.state = PlaybackState::Seeking;
    }

    /// Playhead with the seek offset removed, on the modular timeline.
    pub fn playhead_without_offset(&self) -> i64 {
        self.ticks_at_playhead as i64 - self.ticks_seek_offset as i64
    }

    /// Playhead implied by the last update and `seek_offset`.
    pub fn playhead_with_offset(&self, seek_offset: u64) -> u64 {
        let elapsed = self.ticks_at_last_update as i64 - self.ticks_at_start as i64;
        let duration = self.duration as i64;
        (elapsed + seek_offset as i64 + duration).rem_euclid(duration) as u64
    }

    /// Advance to wall-clock `ticks`.
    ///
    /// `all_decoded` tells a seeking timeline whether every memory frame
    /// holds a decoded picture. Returns `true` when a playing timeline wrapped
    /// past the end; a non-looping timeline then holds its last playhead and
    /// pauses.
    pub fn advance(&mut self, ticks: u64, all_decoded: bool) -> bool {
        let pause_delta = ticks.saturating_sub(self.ticks_at_last_update);

        match self.state {
            PlaybackState::Initial => {
                self.ticks_at_start = ticks;
                self.ticks_at_last_update = ticks;
            }
            PlaybackState::Pause => {
                self.ticks_at_start += pause_delta;
                self.ticks_at_last_update = ticks;
            }
            PlaybackState::Seeking => {
                self.ticks_at_start += pause_delta;
                self.ticks_at_last_update = ticks;
                if all_decoded {
                    debug!("Seek complete");
                    self.state = PlaybackState::Pause;
                }
            }
            PlaybackState::Play => {
                self.ticks_at_last_update = ticks;
            }
        }

        let previous = self.ticks_at_playhead;
        self.ticks_at_playhead = self.playhead_with_offset(self.ticks_seek_offset);

        if self.ticks_at_playhead < previous && self.state == PlaybackState::Play {
            if self.is_not_looping {
                self.ticks_at_start += pause_delta;
                self.ticks_at_playhead = previous;
                self.state = PlaybackState::Pause;
            }
            info!("Reached end of title");
            return true;
        }
        false
    }

    /// Pick the decoded picture closest to the playhead and recycle pictures
    /// that have fallen out of reach.
    ///
    /// A picture is a candidate while less than one frame duration has passed
    /// since its presentation time. Candidates further than
    /// `frame_duration * gop_size` ahead are recycled, as are elapsed pictures
    /// once another picture has been chosen. An elapsed picture is only kept
    /// on screen while no candidate exists. The chosen picture is never
    /// recycled. While seeking the displayed picture is left alone and the
    /// selection is not applied.
    pub fn select_display_frame(&mut self, pool: &mut FramePool, gop_size: u32) -> Option<usize> {
        let display = self.latest_frame_for_display;
        let seeking = self.state == PlaybackState::Seeking;
        let mut closest = display;
        let mut closest_offset = i64::MAX;
        let mut recycle = Vec::new();

        for frame in pool.frames() {
            if frame.state != FrameState::DecodeSuccess {
                continue;
            }
            if seeking && Some(frame.index) == display {
                continue;
            }

            let offset = clock_face_offset(frame.info.pts, self.ticks_at_playhead, self.duration);
            let frame_duration = frame.info.duration as i64;
            let reach = frame_duration.saturating_mul(i64::from(gop_size));

            if offset >= -frame_duration {
                if offset < closest_offset {
                    if closest != display && closest_offset > reach {
                        recycle.extend(closest);
                    }
                    closest = Some(frame.index);
                    closest_offset = offset;
                } else if offset.abs() > reach {
                    recycle.push(frame.index);
                }
            } else if closest_offset != i64::MAX || closest != display {
                recycle.push(frame.index);
            } else {
                closest = Some(frame.index);
            }
        }

        for index in recycle {
            pool.recycle(index);
        }

        if !seeking {
            self.latest_frame_for_display = closest;
        }
        self.latest_frame_for_display
    }

}
