//! Public error and diagnostic types for VP8 decoding.

use alloc::string::String;
use thiserror::Error;

/// Errors that can occur when attempting to decode a VP8 frame
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// VP8's `[0x9D, 0x01, 0x2A]` keyframe start code not found or invalid
    #[error("Invalid VP8 magic: {0:x?}")]
    Vp8MagicInvalid([u8; 3]),

    /// VP8 decoder initialisation wasn't provided with enough data
    #[error("Not enough VP8 init data")]
    NotEnoughInitData,

    /// The bitstream was somehow corrupt or truncated
    #[error("Corrupt bitstream")]
    BitStreamError,

    /// At time of writing, only the YUV colour-space encoded as `0` is specified
    #[error("Invalid VP8 color space: {0}")]
    ColorSpaceInvalid(u8),

    /// LUMA prediction mode was not recognised
    #[error("Invalid VP8 luma prediction mode: {0}")]
    LumaPredictionModeInvalid(i8),

    /// Intra-prediction mode was not recognised
    #[error("Invalid VP8 intra prediction mode: {0}")]
    IntraPredictionModeInvalid(i8),

    /// Chroma prediction mode was not recognised
    #[error("Invalid VP8 chroma prediction mode: {0}")]
    ChromaPredictionModeInvalid(i8),

    /// Image is too large, either for the platform's pointer size or for
    /// the configured [`Limits`](crate::Limits)
    #[error("Image too large")]
    ImageTooLarge,

    /// The stream may be valid, but this crate doesn't support decoding it.
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Invalid function call or parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Per-frame decode diagnostics.
///
/// Counters are reset by every [`decode_frame`](crate::Vp8Decoder::decode_frame)
/// call and describe the last decoded frame only. Soft per-macroblock
/// conditions (a missing reference frame) are absorbed into these counters
/// instead of failing the decode.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct FrameStats {
    /// Number of intra-coded macroblocks in the frame.
    pub intra_mbs: u32,

    /// Number of inter-coded macroblocks in the frame.
    pub inter_mbs: u32,

    /// Number of inter macroblocks per motion-vector mode, indexed by
    /// [`MvMode`](crate::MvMode) as usize.
    pub mv_modes: [u32; 5],

    /// Inter macroblocks whose reference frame was never stored; their
    /// prediction was substituted with the midpoint value 128.
    pub missing_reference_mbs: u32,
}
