//! Container collaborator boundary.
//!
//! The pipeline never parses container boxes itself. It consumes a
//! [`Demuxer`]: a flat sample table plus random access to the underlying
//! byte stream. [`SampleTable`] is the stock implementation over any
//! `Read + Seek` source, and [`VideoMetadata`] summarises a title at load.

use std::io::{Cursor, Read, Seek, SeekFrom};

use super::nal::NAL_LENGTH_PREFIX_SIZE;
use super::params::ParameterSets;
use super::{Dimensions, TICKS_PER_SECOND};
use crate::error::{PixelReelError, Result};

/// Location and timing of one container sample (one access unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleRecord {
    /// Absolute offset of the sample in the container stream.
    pub byte_offset: u64,
    /// Size of the sample in bytes.
    pub byte_size: u32,
    /// Decode timestamp in timescale units.
    pub timestamp: u64,
    /// Duration in timescale units.
    pub duration: u32,
}

/// Source of samples for the decode pipeline.
pub trait Demuxer {
    /// Timescale units per second.
    fn timescale(&self) -> u64;

    fn sample_count(&self) -> usize;

    fn sample(&self, index: usize) -> Option<SampleRecord>;

    /// Fill `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// SPS NAL units (header byte included) from the sample description.
    fn sequence_parameter_sets(&self) -> &[Vec<u8>];

    /// PPS NAL units (header byte included) from the sample description.
    fn picture_parameter_sets(&self) -> &[Vec<u8>];

    /// Read a whole sample into `buf`, replacing its contents.
    fn read_sample(&mut self, index: usize, buf: &mut Vec<u8>) -> Result<SampleRecord> {
        let record = self.sample(index).ok_or_else(|| {
            PixelReelError::Demux(format!(
                "sample {} out of range ({} samples)",
                index,
                self.sample_count()
            ))
        })?;
        buf.clear();
        buf.resize(record.byte_size as usize, 0);
        self.read_at(record.byte_offset, buf)?;
        Ok(record)
    }

    /// `timestamp + duration` of the last sample.
    fn duration_in_timescale_units(&self) -> u64 {
        self.sample_count()
            .checked_sub(1)
            .and_then(|last| self.sample(last))
            .map(|s| s.timestamp + u64::from(s.duration))
            .unwrap_or(0)
    }
}

/// Sample table over a seekable byte source.
#[derive(Debug)]
pub struct SampleTable<R> {
    reader: R,
    timescale: u64,
    samples: Vec<SampleRecord>,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
}

impl<R: Read + Seek> SampleTable<R> {
    /// Wrap a reader and a sample table produced by a container parser.
    pub fn from_reader(reader: R, timescale: u64, samples: Vec<SampleRecord>) -> Self {
        Self {
            reader,
            timescale,
            samples,
            sps: Vec::new(),
            pps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sequence_parameter_set(mut self, nal: Vec<u8>) -> Self {
        self.sps.push(nal);
        self
    }

    #[must_use]
    pub fn with_picture_parameter_set(mut self, nal: Vec<u8>) -> Self {
        self.pps.push(nal);
        self
    }

    pub fn samples(&self) -> &[SampleRecord] {
        &self.samples
    }
}

impl SampleTable<Cursor<Vec<u8>>> {
    /// Empty in-memory title; fill it with [`SampleTable::push_sample`].
    pub fn in_memory(timescale: u64) -> Self {
        Self::from_reader(Cursor::new(Vec::new()), timescale, Vec::new())
    }

    /// Append one sample made of `nals`, each written with a 4-byte
    /// big-endian length prefix. The sample starts where the previous
    /// one ended on the timeline.
    pub fn push_sample(&mut self, nals: &[&[u8]], duration: u32) -> SampleRecord {
        let data = self.reader.get_mut();
        let byte_offset = data.len() as u64;
        for nal in nals {
            data.extend_from_slice(&(nal.len() as u32).to_be_bytes());
            data.extend_from_slice(nal);
        }
        let byte_size = nals
            .iter()
            .map(|nal| NAL_LENGTH_PREFIX_SIZE + nal.len())
            .sum::<usize>() as u32;
        let timestamp = self
            .samples
            .last()
            .map(|s| s.timestamp + u64::from(s.duration))
            .unwrap_or(0);

        let record = SampleRecord {
            byte_offset,
            byte_size,
            timestamp,
            duration,
        };
        self.samples.push(record);
        record
    }
}

impl<R: Read + Seek> Demuxer for SampleTable<R> {
    fn timescale(&self) -> u64 {
        self.timescale
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn sample(&self, index: usize) -> Option<SampleRecord> {
        self.samples.get(index).copied()
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    fn sequence_parameter_sets(&self) -> &[Vec<u8>] {
        &self.sps
    }

    fn picture_parameter_sets(&self) -> &[Vec<u8>] {
        &self.pps
    }
}

/// Convert a timescale-unit time into ticks.
///
/// Whole seconds convert exactly; the fractional remainder is rounded to the
/// nearest tick. A zero timescale yields zero.
pub fn video_time_to_ticks(units: u64, timescale: u64) -> u64 {
    if timescale == 0 {
        return 0;
    }
    let seconds = units / timescale;
    let remainder = u128::from(units % timescale);
    let fraction = (remainder * u128::from(TICKS_PER_SECOND) + u128::from(timescale) / 2)
        / u128::from(timescale);
    seconds * TICKS_PER_SECOND + fraction as u64
}

/// Per-title facts derived once at load.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    /// Display width after cropping.
    pub width: u32,
    /// Display height after cropping.
    pub height: u32,
    /// Macroblock-aligned width.
    pub padded_width: u32,
    /// Macroblock-aligned height.
    pub padded_height: u32,
    pub num_dpb_slots: u32,
    /// Smallest POC step between consecutive pictures.
    pub poc_interval: i64,
    pub timescale: u64,
    pub duration_in_timescale_units: u64,
    pub duration_in_ticks: u64,
    pub duration_in_seconds: f64,
    pub average_frames_per_second: f64,
    pub num_frames: usize,
    /// Upper bound for one access unit: three bytes per padded pixel.
    pub max_memory_frame_size_bytes: usize,
}

impl VideoMetadata {
    /// Summarise a title from its sample table and parameter sets.
    pub fn derive<D: Demuxer + ?Sized>(
        demuxer: &D,
        params: &ParameterSets,
        poc_interval: i64,
    ) -> Result<Self> {
        let sps = params
            .primary_sps()
            .ok_or_else(|| PixelReelError::MissingParameterSet("no SPS".to_string()))?;

        let timescale = demuxer.timescale();
        if timescale == 0 {
            return Err(PixelReelError::InvalidConfig(
                "container timescale is zero".to_string(),
            ));
        }
        let num_frames = demuxer.sample_count();
        if num_frames == 0 {
            return Err(PixelReelError::InvalidConfig(
                "container has no samples".to_string(),
            ));
        }
        let duration_in_timescale_units = demuxer.duration_in_timescale_units();
        let duration_in_ticks = video_time_to_ticks(duration_in_timescale_units, timescale);
        if duration_in_ticks == 0 {
            return Err(PixelReelError::InvalidConfig(
                "title duration is zero".to_string(),
            ));
        }

        let (width, height) = sps.dimensions();
        let (padded_width, padded_height) = sps.padded_dimensions();
        let duration_in_seconds = duration_in_timescale_units as f64 / timescale as f64;

        Ok(Self {
            width,
            height,
            padded_width,
            padded_height,
            num_dpb_slots: params.num_dpb_slots(),
            poc_interval,
            timescale,
            duration_in_timescale_units,
            duration_in_ticks,
            duration_in_seconds,
            average_frames_per_second: num_frames as f64 / duration_in_seconds,
            num_frames,
            max_memory_frame_size_bytes: padded_width as usize * padded_height as usize * 3,
        })
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Duration of one sample in ticks, taken from the average frame rate.
    pub fn frame_duration_in_ticks(&self) -> u64 {
        self.duration_in_ticks / self.num_frames as u64
    }
}
