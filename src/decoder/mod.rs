//! VP8 decoder implementation

mod api;
mod bit_reader;
mod inter;
mod limits;
mod loop_filter;
mod motion;
mod vp8;

pub use api::{DecodeError, FrameStats};
pub use limits::Limits;
pub use motion::{MotionVector, MvMode, RefFrame};
pub use vp8::{Frame, FrameHeader, Vp8Decoder};

// Probability tables re-exported for the bitstream-authoring test
// support (hidden from public docs).
#[doc(hidden)]
pub use crate::common::types::{COEFF_PROBS, COEFF_UPDATE_PROBS, PROB_DCT_CAT};
#[doc(hidden)]
pub use motion::{DEFAULT_MV_PROBS, MV_UPDATE_PROBS};
