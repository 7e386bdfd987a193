//! The owned video decoder.
//!
//! [`VideoDecoder`] holds every piece of decoder-wide state (POC state, DPB,
//! memory frames, timeline) and is driven by one [`VideoDecoder::update`]
//! call per application frame. Engine retirements arrive through
//! [`VideoDecoder::completion_sender`] and are applied at the start of the
//! next update.

use ash::vk;
use tracing::{debug, error, info, warn};

use super::demux::{Demuxer, VideoMetadata};
use super::dpb::{DpbSlotManager, SlotBinding};
use super::engine::{CompletionQueue, CompletionSender, DecodeEngine, DecodeRequest, PictureInfo};
use super::extract::{estimate_poc_interval, AccessUnitExtractor, IdrAnchor};
use super::frame_pool::{FramePool, FrameState, MemoryFrame};
use super::params::ParameterSets;
use super::poc::PicOrderCountState;
use super::seek::{invalidate_decoded_frames, plan_seek};
use super::timeline::{PlaybackState, Timeline};
use super::{DecoderConfig, Dimensions, FrameInfo, FrameType};
use crate::error::{PixelReelError, Result};

type PlaybackCompleteCallback = Box<dyn FnMut()>;

/// Updates a decode may stay in flight before the pool is reported stalled.
const STALL_WARNING_UPDATES: u32 = 300;

/// H.264 playback pipeline over a demuxer and a decode engine.
pub struct VideoDecoder<D, E> {
    demuxer: D,
    engine: E,
    config: DecoderConfig,
    metadata: VideoMetadata,
    extractor: AccessUnitExtractor,
    pool: FramePool,
    dpb: DpbSlotManager,
    timeline: Timeline,
    poc_state: PicOrderCountState,
    anchor: IdrAnchor,
    completions: CompletionQueue,
    /// Next sample to extract, in decode order.
    current_decoded_frame: usize,
    stalled_updates: u32,
    on_playback_complete: Option<PlaybackCompleteCallback>,
}

impl<D: Demuxer, E: DecodeEngine> VideoDecoder<D, E> {
    /// Load a title and allocate its memory frames.
    ///
    /// Fails if the stream uses POC type 1, needs more DPB slots than
    /// `config.max_dpb_slots`, or has no samples.
    pub fn new(mut demuxer: D, mut engine: E, config: DecoderConfig) -> Result<Self> {
        if config.gop_size == 0 {
            return Err(PixelReelError::InvalidConfig(
                "gop_size must be non-zero".to_string(),
            ));
        }

        let params = ParameterSets::from_nals(
            demuxer.sequence_parameter_sets().iter().map(Vec::as_slice),
            demuxer.picture_parameter_sets().iter().map(Vec::as_slice),
        )?;
        if let Some(sps) = params
            .sequence_parameter_sets()
            .find(|sps| !matches!(sps.pic_order_cnt_type, 0 | 2))
        {
            return Err(PixelReelError::UnsupportedOrderCountType(
                sps.pic_order_cnt_type,
            ));
        }

        let num_dpb_slots = params.num_dpb_slots();
        if num_dpb_slots == 0 || num_dpb_slots > config.max_dpb_slots {
            return Err(PixelReelError::InvalidConfig(format!(
                "stream needs {} DPB slots, engine supports {}",
                num_dpb_slots, config.max_dpb_slots
            )));
        }

        let poc_interval = estimate_poc_interval(&mut demuxer, &params, num_dpb_slots)?;
        let metadata = VideoMetadata::derive(&demuxer, &params, poc_interval)?;

        let extent: vk::Extent2D =
            Dimensions::new(metadata.padded_width, metadata.padded_height).into();
        let pool_size = num_dpb_slots as usize + 1;
        let images = (0..pool_size)
            .map(|index| engine.create_output_image(index, extent))
            .collect::<Result<Vec<_>>>()?;
        let pool = FramePool::new(
            images,
            metadata.max_memory_frame_size_bytes,
            config.min_bitstream_buffer_offset_alignment,
            config.min_bitstream_buffer_size_alignment,
        )?;

        info!(
            "Loaded title: {}x{}, {} frames, {:.2}s, {:.2} fps",
            metadata.width,
            metadata.height,
            metadata.num_frames,
            metadata.duration_in_seconds,
            metadata.average_frames_per_second
        );
        info!(
            "DPB slots: {}, memory frames: {}, POC interval: {}",
            num_dpb_slots, pool_size, poc_interval
        );

        Ok(Self {
            extractor: AccessUnitExtractor::new(params, metadata.timescale, poc_interval),
            dpb: DpbSlotManager::new(num_dpb_slots)?,
            timeline: Timeline::new(metadata.duration_in_ticks, config.looping)?,
            demuxer,
            engine,
            config,
            metadata,
            pool,
            poc_state: PicOrderCountState::new(),
            anchor: IdrAnchor::default(),
            completions: CompletionQueue::new(),
            current_decoded_frame: 0,
            stalled_updates: 0,
            on_playback_complete: None,
        })
    }

    /// Advance playback to wall-clock `ticks` and record at most one decode.
    ///
    /// Call once per application frame, before querying display state. An
    /// error is returned only if the engine rejects a submission; the memory
    /// frame is then marked failed and retried on a later update.
    pub fn update(&mut self, ticks: u64) -> Result<()> {
        for event in self.completions.drain() {
            self.pool.mark_outcome(event.frame_index, event.outcome());
        }

        let wrapped = self.timeline.advance(ticks, self.pool.all_decoded());
        self.timeline
            .select_display_frame(&mut self.pool, self.config.gop_size);

        let result = match self.pool.acquire_idle_or_failed() {
            Some(index) => {
                self.stalled_updates = 0;
                let recorded = self.record_decode(index);
                self.current_decoded_frame =
                    (self.current_decoded_frame + 1) % self.metadata.num_frames;
                recorded
            }
            None => {
                self.check_for_stall();
                if self.pool.all_decoded() {
                    self.timeline.finish_initial_decode();
                }
                Ok(())
            }
        };

        if wrapped {
            if let Some(callback) = self.on_playback_complete.as_mut() {
                callback();
            }
        }
        result
    }

    /// Extract the current sample into memory frame `index` and submit it.
    fn record_decode(&mut self, index: usize) -> Result<()> {
        let sample_index = self.current_decoded_frame;
        let (frame, arena) = self.pool.frame_and_arena_mut(index).ok_or_else(|| {
            PixelReelError::InvalidConfig(format!("memory frame {} out of range", index))
        })?;

        if let Err(e) = self.extractor.extract(
            &mut self.demuxer,
            sample_index,
            frame,
            arena,
            &mut self.poc_state,
            &mut self.anchor,
        ) {
            match e {
                PixelReelError::CapacityExceeded { .. } => {
                    error!("Cannot copy sample {} into frame {}: {}", sample_index, index, e)
                }
                _ => warn!("Skipping sample {}: {}", sample_index, e),
            }
            self.pool.mark_failed(index);
            return Ok(());
        }

        let Some(frame) = self.pool.frame(index) else {
            return Ok(());
        };
        let info = frame.info;
        let setup = self.dpb.prepare(&info);
        let request = DecodeRequest {
            frame_index: index,
            dst_image: frame.image,
            coded_extent: Dimensions::new(self.metadata.padded_width, self.metadata.padded_height)
                .into(),
            bitstream_offset: frame.window.offset,
            bitstream: self.pool.arena().window_bytes(&frame.window),
            slice_offset: 0,
            picture: picture_info(&info),
            setup_slot: &setup.setup_slot,
            references: &setup.references,
        };

        if let Err(e) = submit(&mut self.engine, &setup.session_bindings, &request) {
            error!("Decode submission for frame {} failed: {}", index, e);
            self.pool.mark_failed(index);
            return Err(e);
        }

        debug!(
            "Recorded sample {} into frame {} (target slot {}, {} references)",
            sample_index,
            index,
            setup.target_slot,
            setup.references.len()
        );
        self.dpb.commit(setup);
        Ok(())
    }

    /// Warn once when a recorded decode never retires and blocks the pool.
    fn check_for_stall(&mut self) {
        if self.pool.count(FrameState::Recording) == 0 {
            self.stalled_updates = 0;
            return;
        }
        self.stalled_updates = self.stalled_updates.saturating_add(1);
        if self.stalled_updates == STALL_WARNING_UPDATES {
            warn!(
                "No decode retired in {} updates, memory frame pool is stalled",
                STALL_WARNING_UPDATES
            );
            self.log_frame_states();
        }
    }

    pub fn play(&mut self) {
        self.timeline.play();
    }

    /// Pause while playing, or resume otherwise.
    pub fn set_pause_state(&mut self, should_pause: bool) {
        self.timeline.set_pause_state(should_pause);
    }

    /// Whether playback is paused. `Initial` and `Seeking` do not count.
    pub fn get_pause_state(&self) -> bool {
        self.timeline.is_paused()
    }

    /// Move playback to `target_ticks`.
    ///
    /// Decoding restarts at the IDR picture at or before the target. With
    /// `resume_at_nearest_reference` the playhead lands on that picture
    /// instead of the requested time. Targets past the end wrap around the
    /// duration. Returns the resolved target in ticks. A seek issued while
    /// seeking replaces it.
    pub fn seek(&mut self, target_ticks: u64, resume_at_nearest_reference: bool) -> u64 {
        self.poc_state.reset();

        let plan = plan_seek(
            &mut self.demuxer,
            &self.timeline,
            target_ticks,
            resume_at_nearest_reference,
        );
        self.current_decoded_frame = plan.sample_index;

        invalidate_decoded_frames(&mut self.pool, &self.timeline);
        self.timeline.begin_seek(plan.seek_offset);

        plan.target_ticks
    }

    /// Playhead in ticks and as a fraction of the duration.
    pub fn get_current_playhead_position(&self) -> (u64, f32) {
        (self.timeline.playhead(), self.timeline.normalized_playhead())
    }

    pub fn get_total_duration_in_ticks(&self) -> u64 {
        self.metadata.duration_in_ticks
    }

    /// Image of the picture to show, if one has been decoded.
    pub fn get_latest_available_frame(&self) -> Option<vk::Image> {
        self.display_frame().map(|frame| frame.image)
    }

    /// Picture order count of the picture to show.
    pub fn get_latest_available_frame_index(&self) -> Option<i32> {
        self.display_frame().map(|frame| frame.info.poc)
    }

    fn display_frame(&self) -> Option<&MemoryFrame> {
        let frame = self
            .timeline
            .display_frame()
            .and_then(|index| self.pool.frame(index));
        if frame.is_none() {
            warn!("No frame available yet");
        }
        frame
    }

    pub fn get_playback_should_loop(&self) -> bool {
        self.timeline.is_looping()
    }

    pub fn set_playback_should_loop(&mut self, should_loop: bool) {
        self.timeline.set_looping(should_loop);
    }

    /// Called from `update` each time playback passes the end of the title.
    pub fn set_on_playback_complete_callback(&mut self, callback: impl FnMut() + 'static) {
        self.on_playback_complete = Some(Box::new(callback));
    }

    /// Display size after cropping.
    pub fn get_frame_dimensions(&self) -> Dimensions {
        self.metadata.dimensions()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.timeline.state()
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Handle for reporting engine retirements, usable from any thread.
    pub fn completion_sender(&self) -> CompletionSender {
        self.completions.sender()
    }

    pub fn frames(&self) -> &[MemoryFrame] {
        self.pool.frames()
    }

    pub fn dpb(&self) -> &DpbSlotManager {
        &self.dpb
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Sample index the next decode will read.
    pub fn current_decoded_frame(&self) -> usize {
        self.current_decoded_frame
    }

    /// Dump every memory frame at debug level.
    pub fn log_frame_states(&self) {
        let shown = self.timeline.display_frame();
        for frame in self.pool.frames() {
            debug!(
                "frame {:2}{} {:?}: sample {} poc {} gop {} pts {} ({} bytes)",
                frame.index,
                if Some(frame.index) == shown { "*" } else { " " },
                frame.state,
                frame.info.sample_index,
                frame.info.poc,
                frame.info.gop,
                frame.info.pts,
                frame.window.used
            );
        }
    }
}

fn picture_info(info: &FrameInfo) -> PictureInfo {
    let slice = &info.slice_header;
    PictureInfo {
        field_pic_flag: slice.field_pic_flag,
        is_intra: info.frame_type == FrameType::Intra,
        idr_pic_flag: info.is_idr(),
        bottom_field_flag: slice.field_pic_flag && slice.bottom_field_flag,
        is_reference: info.is_reference(),
        seq_parameter_set_id: info.seq_parameter_set_id,
        pic_parameter_set_id: slice.pic_parameter_set_id,
        frame_num: slice.frame_num,
        idr_pic_id: slice.idr_pic_id,
        pic_order_cnt: [info.top_field_order_cnt, info.bottom_field_order_cnt],
    }
}

fn submit<E: DecodeEngine>(
    engine: &mut E,
    session_bindings: &[SlotBinding],
    request: &DecodeRequest<'_>,
) -> Result<()> {
    engine.begin_session(session_bindings)?;
    engine.decode(request)?;
    engine.end_session()
}
