//! Seeking.
//!
//! A seek resolves a target time to the nearest sample, walks back to the
//! IDR picture that sample depends on, and computes the seek offset that
//! maps the continuing wall clock onto the new target.

use tracing::{debug, warn};

use super::demux::{video_time_to_ticks, Demuxer, SampleRecord};
use super::frame_pool::{FramePool, FrameState};
use super::nal::{LengthPrefixedNals, NalHeader};
use super::timeline::{clock_face_offset, Timeline};
use crate::error::Result;

/// Where decoding resumes after a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPlan {
    /// Seek target after resolution, in ticks.
    pub target_ticks: u64,
    /// Sample index of the IDR picture decoding restarts from.
    pub sample_index: usize,
    /// Presentation time of that IDR picture, in ticks.
    pub reference_ticks: u64,
    /// New timeline seek offset.
    pub seek_offset: u64,
}

fn sample_ticks<D: Demuxer + ?Sized>(demuxer: &D, index: usize) -> u64 {
    demuxer
        .sample(index)
        .map(|s| video_time_to_ticks(s.timestamp, demuxer.timescale()))
        .unwrap_or(0)
}

/// Index of the sample whose timestamp is closest to `target_ticks`.
///
/// Timestamps must be ascending. Ties go to the earlier sample.
pub fn find_closest_sample<D: Demuxer + ?Sized>(demuxer: &D, target_ticks: u64) -> usize {
    let count = demuxer.sample_count();
    if count == 0 {
        return 0;
    }

    // First sample at or after the target.
    let (mut low, mut high) = (0, count);
    while low < high {
        let mid = low + (high - low) / 2;
        if sample_ticks(demuxer, mid) < target_ticks {
            low = mid + 1;
        } else {
            high = mid;
        }
    }

    if low == count {
        return count - 1;
    }
    if low == 0 {
        return 0;
    }
    let before = target_ticks - sample_ticks(demuxer, low - 1);
    let after = sample_ticks(demuxer, low) - target_ticks;
    if before <= after {
        low - 1
    } else {
        low
    }
}

/// Classify one sample: `Some(true)` for an IDR slice, `Some(false)` for a
/// non-IDR slice, `None` if it carries no coded slice.
fn sample_starts_with_idr(sample: &[u8]) -> Result<Option<bool>> {
    for nal in LengthPrefixedNals::new(sample) {
        let header = NalHeader::from_nal(nal?)?;
        if header.nal_unit_type.is_coded_slice() {
            return Ok(Some(header.nal_unit_type.is_idr()));
        }
    }
    Ok(None)
}

/// Walk back from `from_index` (inclusive) to the nearest IDR sample.
///
/// Samples that cannot be read or parsed are skipped.
pub fn find_preceding_idr<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    from_index: usize,
) -> Option<(usize, SampleRecord)> {
    let last = from_index.min(demuxer.sample_count().checked_sub(1)?);
    let mut sample = Vec::new();

    for index in (0..=last).rev() {
        let record = match demuxer.read_sample(index, &mut sample) {
            Ok(record) => record,
            Err(e) => {
                warn!("Seek: cannot read sample {}: {}", index, e);
                continue;
            }
        };
        match sample_starts_with_idr(&sample) {
            Ok(Some(true)) => return Some((index, record)),
            Ok(_) => {}
            Err(e) => warn!("Seek: skipping malformed sample {}: {}", index, e),
        }
    }
    None
}

/// Resolve a seek request against the current timeline.
///
/// Targets past the end wrap around the title duration. With `resume_at_nearest_reference` the target moves back to the IDR
/// picture decoding restarts from. Without an IDR picture at or before the
/// target, decoding restarts at sample 0.
pub fn plan_seek<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    timeline: &Timeline,
    target_ticks: u64,
    resume_at_nearest_reference: bool,
) -> SeekPlan {
    let target_ticks = target_ticks % timeline.duration();
    let closest = find_closest_sample(demuxer, target_ticks);
    let sample_index = match find_preceding_idr(demuxer, closest) {
        Some((index, _)) => index,
        None => {
            warn!("Seek: no IDR picture at or before sample {}", closest);
            0
        }
    };
    let reference_ticks = sample_ticks(demuxer, sample_index);

    let target_ticks = if resume_at_nearest_reference {
        reference_ticks
    } else {
        target_ticks
    };

    let duration = timeline.duration() as i64;
    let seek_offset = (duration + target_ticks as i64 - timeline.playhead_without_offset())
        .rem_euclid(duration) as u64;

    debug!(
        "Seek: target {} resolves to sample {} (closest {}), offset {}",
        target_ticks, sample_index, closest, seek_offset
    );

    SeekPlan {
        target_ticks,
        sample_index,
        reference_ticks,
        seek_offset,
    }
}

/// Recycle decoded pictures made stale by a seek.
///
/// The displayed picture stays, and so does the one decoded picture
/// closest to the current playhead.
pub fn invalidate_decoded_frames(pool: &mut FramePool, timeline: &Timeline) {
    let playhead = timeline.playhead_with_offset(timeline.seek_offset());
    let display = timeline.display_frame();
    let mut closest: Option<usize> = None;
    let mut closest_offset = i64::MAX;
    let mut recycle = Vec::new();

    for frame in pool.frames() {
        if frame.state != FrameState::DecodeSuccess || Some(frame.index) == display {
            continue;
        }
        let offset = clock_face_offset(frame.info.pts, playhead, timeline.duration()).abs();
        if offset < closest_offset {
            recycle.extend(closest);
            closest = Some(frame.index);
            closest_offset = offset;
        } else {
            recycle.push(frame.index);
        }
    }

    for index in recycle {
        pool.recycle(index);
    }
}
