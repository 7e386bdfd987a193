//! Access unit extraction.
//!
//! Pulls one container sample, finds its first coded slice, stamps the
//! frame metadata (type, order counts, presentation time) and copies the
//! slice into the memory frame's arena window with Annex-B framing.

use tracing::{debug, info, warn};

use super::demux::{video_time_to_ticks, Demuxer};
use super::frame_pool::{BitstreamArena, MemoryFrame};
use super::nal::{find_coded_slice, NalHeader, ANNEXB_START_CODE};
use super::params::ParameterSets;
use super::poc::{PicOrderCountState, PictureOrder};
use super::slice::SliceHeader;
use super::{FrameInfo, FrameType};
use crate::error::{PixelReelError, Result};

/// Timestamp of the most recent IDR picture, in timescale units.
///
/// Presentation times of the pictures that follow are offsets from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdrAnchor {
    pub timestamp: u64,
}

/// Locate and parse the first coded slice of a length-prefixed sample.
fn parse_coded_slice<'a>(
    sample: &'a [u8],
    params: &ParameterSets,
) -> Result<Option<(NalHeader, SliceHeader, &'a [u8])>> {
    let Some((nal_header, nal)) = find_coded_slice(sample)? else {
        return Ok(None);
    };
    let header = SliceHeader::parse(&nal_header, nal, params)?;
    Ok(Some((nal_header, header, nal)))
}

/// Order counts of one sample, computed against `state`.
fn picture_order(
    sample: &[u8],
    params: &ParameterSets,
    state: &mut PicOrderCountState,
) -> Result<Option<PictureOrder>> {
    let Some((nal_header, header, _)) = parse_coded_slice(sample, params)? else {
        return Ok(None);
    };
    let (_, sps) = params.active(header.pic_parameter_set_id)?;
    state.calculate(sps, &nal_header, &header).map(Some)
}

/// Estimate the POC step between consecutive pictures.
///
/// Decodes the order counts of the first `num_dpb_slots + 1` samples with
/// a fresh state, sorts them by `(gop, poc)` and takes the smallest positive
/// difference between neighbours. Falls back to 1 when the samples give no
/// such difference.
pub fn estimate_poc_interval<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    params: &ParameterSets,
    num_dpb_slots: u32,
) -> Result<i64> {
    let count = demuxer
        .sample_count()
        .min(num_dpb_slots as usize + 1);
    let mut state = PicOrderCountState::new();
    let mut sample = Vec::new();
    let mut keys = Vec::with_capacity(count);

    for index in 0..count {
        let order = demuxer
            .read_sample(index, &mut sample)
            .and_then(|_| picture_order(&sample, params, &mut state));
        match order {
            Ok(Some(order)) => keys.push((i64::from(order.gop) << 32) + i64::from(order.poc)),
            Ok(None) => {}
            Err(e @ PixelReelError::UnsupportedOrderCountType(_)) => return Err(e),
            Err(e) => warn!("Skipping sample {} in POC interval estimate: {}", index, e),
        }
    }

    keys.sort_unstable();
    let interval = keys
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|diff| *diff > 0)
        .min();

    match interval {
        Some(interval) => {
            info!("POC interval: {} (from {} samples)", interval, keys.len());
            Ok(interval)
        }
        None => {
            warn!(
                "Could not derive a POC interval from {} samples, assuming 1",
                keys.len()
            );
            Ok(1)
        }
    }
}

/// Copies access units into memory frames.
#[derive(Debug)]
pub struct AccessUnitExtractor {
    params: ParameterSets,
    timescale: u64,
    poc_interval: i64,
    sample: Vec<u8>,
}

impl AccessUnitExtractor {
    pub fn new(params: ParameterSets, timescale: u64, poc_interval: i64) -> Self {
        Self {
            params,
            timescale,
            poc_interval: poc_interval.max(1),
            sample: Vec::new(),
        }
    }

    pub fn params(&self) -> &ParameterSets {
        &self.params
    }

    pub fn poc_interval(&self) -> i64 {
        self.poc_interval
    }

    /// Extract sample `sample_index` into `frame`.
    ///
    /// The slice is copied behind [`ANNEXB_START_CODE`] and the used bytes
    /// are padded to the arena's size alignment. If the slice does not fit,
    /// [`PixelReelError::CapacityExceeded`] is returned before `state` or
    /// `anchor` change. An IDR picture moves `anchor` to its own timestamp.
    pub fn extract<D: Demuxer + ?Sized>(
        &mut self,
        demuxer: &mut D,
        sample_index: usize,
        frame: &mut MemoryFrame,
        arena: &mut BitstreamArena,
        state: &mut PicOrderCountState,
        anchor: &mut IdrAnchor,
    ) -> Result<()> {
        let record = demuxer.read_sample(sample_index, &mut self.sample)?;
        let (nal_header, header, nal) = parse_coded_slice(&self.sample, &self.params)?
            .ok_or_else(|| {
                PixelReelError::Bitstream(format!(
                    "sample {} carries no coded slice",
                    sample_index
                ))
            })?;

        frame.window.ensure_fits(ANNEXB_START_CODE.len() + nal.len())?;

        let (_, sps) = self.params.active(header.pic_parameter_set_id)?;
        let order = state.calculate(sps, &nal_header, &header)?;

        let is_idr = nal_header.nal_unit_type.is_idr();
        if is_idr {
            anchor.timestamp = record.timestamp;
        }

        // anchor + duration * (poc / poc_interval)
        let offset = i64::from(record.duration) * (i64::from(order.poc) / self.poc_interval);
        let pts_in_timescale_units = (anchor.timestamp as i64 + offset).max(0) as u64;

        arena.append(&mut frame.window, &[&ANNEXB_START_CODE, nal])?;
        arena.seal(&mut frame.window);

        frame.info = FrameInfo {
            frame_type: if is_idr {
                FrameType::Intra
            } else {
                FrameType::Predictive
            },
            nal_unit_type: nal_header.nal_unit_type.id(),
            nal_ref_idc: nal_header.nal_ref_idc,
            top_field_order_cnt: order.top_field_order_cnt,
            bottom_field_order_cnt: order.bottom_field_order_cnt,
            poc: order.poc,
            gop: order.gop,
            sample_index,
            pts_in_timescale_units,
            duration_in_timescale_units: record.duration,
            pts: video_time_to_ticks(pts_in_timescale_units, self.timescale),
            duration: video_time_to_ticks(u64::from(record.duration), self.timescale),
            slice_header: header,
            seq_parameter_set_id: sps.seq_parameter_set_id,
        };

        debug!(
            "Extracted sample {} into frame {}: {:?} poc {} gop {} pts {}",
            sample_index,
            frame.index,
            frame.info.frame_type,
            frame.info.poc,
            frame.info.gop,
            frame.info.pts
        );
        Ok(())
    }
}
