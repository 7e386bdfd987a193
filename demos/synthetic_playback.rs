//! Example: Synthetic Playback
//!
//! Drives a `VideoDecoder` over a generated H.264 stream with a stub decode
//! engine. Decodes retire one update after they are recorded, the way a
//! renderer retires GPU work a frame later.

use ash::vk::{self, Handle};
use pixelreel::{
    DecodeEngine, DecodeRequest, DecoderConfig, PlaybackState, SampleTable, SlotBinding,
    VideoDecoder, TICKS_PER_SECOND,
};
use std::cell::Cell;
use std::rc::Rc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

const GOP_COUNT: u32 = 4;
const GOP_LENGTH: u32 = 30;
const TIMESCALE: u64 = 30_000;
const SAMPLE_DURATION: u32 = 1_001;
const UPDATE_TICKS: u64 = TICKS_PER_SECOND / 60;

/// MSB-first bit packer for the few header fields the pipeline reads.
#[derive(Default)]
struct BitWriter {
    data: Vec<u8>,
    current_byte: u8,
    bit_position: u8,
}

impl BitWriter {
    fn bits(&mut self, value: u32, count: u8) -> &mut Self {
        for i in (0..count).rev() {
            self.current_byte = (self.current_byte << 1) | ((value >> i) & 1) as u8;
            self.bit_position += 1;
            if self.bit_position == 8 {
                self.data.push(self.current_byte);
                self.current_byte = 0;
                self.bit_position = 0;
            }
        }
        self
    }

    fn ue(&mut self, value: u32) -> &mut Self {
        let code = value + 1;
        let len = 32 - code.leading_zeros() as u8;
        self.bits(0, len - 1).bits(code, len)
    }

    /// Add trailing bits, escape, and prepend the NAL header.
    fn nal(&mut self, header: u8) -> Vec<u8> {
        self.bits(1, 1);
        while self.bit_position != 0 {
            self.bits(0, 1);
        }
        let mut nal = vec![header];
        let mut zeros = 0;
        for &byte in &self.data {
            if zeros >= 2 && byte <= 3 {
                nal.push(3);
                zeros = 0;
            }
            nal.push(byte);
            zeros = if byte == 0 { zeros + 1 } else { 0 };
        }
        nal
    }
}

/// Baseline 320x240, POC type 0 with 6-bit LSB, one reference frame.
fn sequence_parameter_set() -> Vec<u8> {
    BitWriter::default()
        .bits(66, 8)
        .bits(0, 8)
        .bits(30, 8)
        .ue(0) // seq_parameter_set_id
        .ue(4) // log2_max_frame_num_minus4
        .ue(0) // pic_order_cnt_type
        .ue(4) // log2_max_pic_order_cnt_lsb_minus4
        .ue(1) // max_num_ref_frames
        .bits(0, 1)
        .ue(19)
        .ue(14)
        .bits(1, 1) // frame_mbs_only_flag
        .bits(1, 1)
        .bits(0, 1)
        .bits(0, 1)
        .nal(0x67)
}

fn picture_parameter_set() -> Vec<u8> {
    BitWriter::default()
        .ue(0)
        .ue(0)
        .bits(0, 2)
        .ue(0)
        .ue(0)
        .ue(0)
        .bits(0, 3)
        .ue(0)
        .ue(0)
        .ue(0)
        .bits(0b100, 3)
        .nal(0x68)
}

fn slice(idr: bool, frame_num: u32) -> Vec<u8> {
    let mut w = BitWriter::default();
    w.ue(0).ue(if idr { 7 } else { 5 }).ue(0).bits(frame_num, 8);
    if idr {
        w.ue(0);
    }
    w.bits(frame_num * 2, 8).bits(0xA5A5, 16);
    w.nal(if idr { 0x65 } else { 0x41 })
}

fn synthetic_title() -> SampleTable<std::io::Cursor<Vec<u8>>> {
    let mut table = SampleTable::in_memory(TIMESCALE)
        .with_sequence_parameter_set(sequence_parameter_set())
        .with_picture_parameter_set(picture_parameter_set());
    for _ in 0..GOP_COUNT {
        for n in 0..GOP_LENGTH {
            table.push_sample(&[&slice(n == 0, n)[..]], SAMPLE_DURATION);
        }
    }
    table
}

/// Accepts every submission and remembers which frames are in flight.
#[derive(Default)]
struct StubEngine {
    images: u64,
    in_flight: Vec<usize>,
    submitted: usize,
}

impl DecodeEngine for StubEngine {
    fn create_output_image(
        &mut self,
        _frame_index: usize,
        _extent: vk::Extent2D,
    ) -> pixelreel::Result<vk::Image> {
        self.images += 1;
        Ok(vk::Image::from_raw(self.images))
    }

    fn begin_session(&mut self, _bindings: &[SlotBinding]) -> pixelreel::Result<()> {
        Ok(())
    }

    fn decode(&mut self, request: &DecodeRequest<'_>) -> pixelreel::Result<()> {
        self.in_flight.push(request.frame_index);
        self.submitted += 1;
        Ok(())
    }

    fn end_session(&mut self) -> pixelreel::Result<()> {
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    println!("PixelReel Synthetic Playback Example\n");

    let config = DecoderConfig::default().with_looping(false);
    let mut decoder = VideoDecoder::new(synthetic_title(), StubEngine::default(), config)?;
    let metadata = decoder.metadata().clone();
    println!(
        "Title: {}x{}, {} frames, {:.2}s at {:.2} fps, {} DPB slots\n",
        metadata.width,
        metadata.height,
        metadata.num_frames,
        metadata.duration_in_seconds,
        metadata.average_frames_per_second,
        metadata.num_dpb_slots
    );

    let finished = Rc::new(Cell::new(false));
    let flag = finished.clone();
    decoder.set_on_playback_complete_callback(move || flag.set(true));

    let completions = decoder.completion_sender();
    let mut ticks = 0;
    let mut seeked = false;

    while !finished.get() {
        for frame_index in decoder.engine_mut().in_flight.drain(..) {
            completions.frame_retired(frame_index, Some(vk::QueryResultStatusKHR::COMPLETE));
        }
        decoder.update(ticks)?;

        if decoder.playback_state() == PlaybackState::Pause && !seeked && ticks > 0 {
            decoder.play();
        }
        let (playhead, normalized) = decoder.get_current_playhead_position();
        if !seeked && playhead > decoder.get_total_duration_in_ticks() / 2 {
            let target = decoder.get_total_duration_in_ticks() / 4;
            println!("Seeking to {target} ticks");
            decoder.seek(target, true);
            seeked = true;
        }
        if seeked && decoder.playback_state() == PlaybackState::Pause {
            decoder.play();
        }

        if ticks % (UPDATE_TICKS * 30) == 0 {
            println!(
                "t={:>8} playhead={:>8} ({:>5.1}%) state={:?} poc={:?}",
                ticks,
                playhead,
                normalized * 100.0,
                decoder.playback_state(),
                decoder.get_latest_available_frame_index()
            );
        }
        ticks += UPDATE_TICKS;
    }

    decoder.log_frame_states();
    println!(
        "\nPlayback complete after {} decodes",
        decoder.engine().submitted
    );
    Ok(())
}
