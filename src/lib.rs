//! Decoding of VP8 video bitstreams
//!
//! Copyright (C) 2025 Imazen LLC
//!
//! This program is free software: you can redistribute it and/or modify
//! it under the terms of the GNU Affero General Public License as published
//! by the Free Software Foundation, either version 3 of the License, or
//! (at your option) any later version.
//!
//! For commercial licensing inquiries: support@imazen.io
//!
//! This crate decodes the VP8 video format as defined in RFC 6386,
//! including inter-predicted (P) frames: reference-frame selection,
//! motion-vector prediction and decoding, SPLITMV partitioning, and
//! motion-compensated prediction with six-tap sub-pixel luma filtering
//! and bilinear chroma interpolation. Output is a planar 4:2:0 image.
//!
//! The decoder is strictly sequential: macroblocks are decoded in raster
//! order because each one's mode and motion-vector contexts depend on its
//! left and above neighbours.
//!
//! # Features
//!
//! - `std` (default): std error-trait integration. Everything else works
//!   without it (requires `alloc`).
//!
//! # Decoding
//!
//! One [`Vp8Decoder`] is kept alive across a whole sequence so that inter
//! frames can reference previously decoded frames:
//!
//! ```rust,no_run
//! use zenvp8::Vp8Decoder;
//!
//! let frames: Vec<Vec<u8>> = vec![]; // compressed VP8 frames
//! let mut decoder = Vp8Decoder::new();
//! for data in &frames {
//!     decoder.init(data, data.len())?;
//!     let header = decoder.decode_frame_header()?;
//!     let frame = decoder.decode_frame()?;
//!     println!("{}x{} keyframe={}", frame.width, frame.height, header.key_frame);
//! }
//! # Ok::<(), zenvp8::DecodeError>(())
//! ```
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]
#![deny(missing_docs)]

extern crate alloc;

mod common;
/// VP8 frame decoding.
pub mod decoder;

pub use decoder::{
    DecodeError, Frame, FrameHeader, FrameStats, Limits, MotionVector, MvMode, RefFrame,
    Vp8Decoder,
};
