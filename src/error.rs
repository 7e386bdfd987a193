//! Error types for PixelReel.

use thiserror::Error;

/// Main error type for PixelReel operations.
#[derive(Error, Debug)]
pub enum PixelReelError {
    /// The stream uses a picture order count type the pipeline cannot derive.
    #[error("Unsupported pic_order_cnt_type: {0}")]
    UnsupportedOrderCountType(u32),

    /// A sample does not fit into the remaining space of its bitstream window.
    #[error("Bitstream window too small: {needed} bytes needed, {available} available")]
    CapacityExceeded {
        /// Bytes the copy would have written.
        needed: usize,
        /// Bytes still free in the window.
        available: usize,
    },

    /// Truncated or malformed H.264 syntax.
    #[error("Malformed bitstream: {0}")]
    Bitstream(String),

    /// A slice or PPS refers to a parameter set that was never provided.
    #[error("Missing parameter set: {0}")]
    MissingParameterSet(String),

    /// Configuration that cannot produce a working pipeline.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The container collaborator could not provide a sample.
    #[error("Demuxer error: {0}")]
    Demux(String),

    /// Reading from the container stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic Vulkan error reported by the decode engine.
    #[error("Vulkan error: {0}")]
    Vulkan(ash::vk::Result),
}

impl From<ash::vk::Result> for PixelReelError {
    fn from(result: ash::vk::Result) -> Self {
        PixelReelError::Vulkan(result)
    }
}

/// Result type for PixelReel operations.
pub type Result<T> = std::result::Result<T, PixelReelError>;
