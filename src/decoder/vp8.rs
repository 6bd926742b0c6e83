//! An implementation of the VP8 Video Codec
//!
//! This module decodes key and inter frames of the VP8 video format as
//! defined in RFC-6386: frame headers, macroblock modes, DCT residuals,
//! intra and motion-compensated prediction, the in-loop deblocking
//! filter and the last/golden/altref reference store.
//!
//! # Related Links
//! * [rfc-6386](http://tools.ietf.org/html/rfc6386) - The VP8 Data Format and Decoding Guide
//! * [VP8.pdf](http://static.googleusercontent.com/media/research.google.com/en//pubs/archive/37073.pdf) - An overview of of the VP8 format

#![allow(clippy::too_many_arguments)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::collapsible_else_if)]

use alloc::boxed::Box;
use alloc::string::ToString;
use alloc::vec;
use alloc::vec::Vec;
use core::array;

use byteorder_lite::{ByteOrder, LittleEndian};

use super::api::{DecodeError, FrameStats};
use super::bit_reader::BoolReader;
use super::inter::predict_inter;
use super::limits::Limits;
use super::loop_filter;
use super::motion::{
    parse_inter_mb, update_mv_probs, InterMb, InterParams, MotionVector, MvContext, MvMode,
    RefFrame, DEFAULT_MV_PROBS,
};
use crate::common::prediction::*;
use crate::common::transform;
use crate::common::types::*;

/// The frame-level fields returned by
/// [`decode_frame_header`](Vp8Decoder::decode_frame_header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct FrameHeader {
    /// True for an intra-only keyframe, false for an inter frame.
    pub key_frame: bool,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Whether this frame is intended for display.
    pub show_frame: bool,
    /// Bitstream version (0..=3).
    pub version: u8,
}

/// A decoded frame in planar 4:2:0 form.
///
/// The planes are stored padded to whole macroblocks; rows are
/// [`luma_stride`](Frame::luma_stride) / [`chroma_stride`](Frame::chroma_stride)
/// bytes wide and only the top-left `width` x `height` (luma) region is
/// picture content.
#[derive(Default, Debug, Clone)]
pub struct Frame {
    /// The width of the luma plane
    pub width: u16,

    /// The height of the luma plane
    pub height: u16,

    /// The luma plane of the frame
    pub ybuf: Vec<u8>,

    /// The blue-difference chroma plane of the frame
    pub ubuf: Vec<u8>,

    /// The red-difference chroma plane of the frame
    pub vbuf: Vec<u8>,
}

impl Frame {
    pub(crate) fn new(width: u16, height: u16) -> Self {
        let mbw = usize::from(width.div_ceil(16));
        let mbh = usize::from(height.div_ceil(16));
        Self {
            width,
            height,
            ybuf: vec![0u8; mbw * 16 * mbh * 16],
            ubuf: vec![0u8; mbw * 8 * mbh * 8],
            vbuf: vec![0u8; mbw * 8 * mbh * 8],
        }
    }

    /// Bytes per luma row (width rounded up to a whole macroblock).
    #[must_use]
    pub fn luma_stride(&self) -> usize {
        usize::from(self.width.div_ceil(16)) * 16
    }

    /// Bytes per chroma row.
    #[must_use]
    pub fn chroma_stride(&self) -> usize {
        usize::from(self.width.div_ceil(16)) * 8
    }

    /// Luma plane height including macroblock padding.
    #[must_use]
    pub fn buffer_height(&self) -> usize {
        usize::from(self.height.div_ceil(16)) * 16
    }
}

/// Per-macroblock mode state retained for the loop-filter pass.
#[derive(Clone, Copy)]
struct MacroBlock {
    bpred: [IntraMode; 16],
    luma_mode: LumaMode,
    chroma_mode: ChromaMode,
    segmentid: u8,
    coeffs_skipped: bool,
    non_zero_dct: bool,
    ref_frame: RefFrame,
    mv_mode: MvMode,
}

impl Default for MacroBlock {
    fn default() -> Self {
        Self {
            bpred: [IntraMode::DC; 16],
            luma_mode: LumaMode::DC,
            chroma_mode: ChromaMode::DC,
            segmentid: 0,
            coeffs_skipped: false,
            non_zero_dct: false,
            ref_frame: RefFrame::Intra,
            mv_mode: MvMode::Zero,
        }
    }
}

/// Info required from a previously decoded macro block in future
/// For the top macroblocks this will be the bottom values, for the left macroblock the right values
#[derive(Default, Clone, Copy)]
struct PreviousMacroBlock {
    bpred: [IntraMode; 4],
    // complexity is laid out like: y2,y,y,y,y,u,u,v,v
    complexity: [u8; 9],
}

/// Entropy state that outlives a frame when `refresh_entropy_probs` is
/// set: token probabilities, MV probabilities and the inter-frame intra
/// mode probabilities. Keyframes reset it to the RFC defaults.
#[derive(Clone)]
struct EntropyState {
    token_probs: Box<TokenProbTreeNodes>,
    mv_probs: [[Prob; 19]; 2],
    ymode_probs: [Prob; 4],
    uvmode_probs: [Prob; 3],
}

impl EntropyState {
    fn defaults() -> Self {
        Self {
            token_probs: Box::new(COEFF_PROB_NODES),
            mv_probs: DEFAULT_MV_PROBS,
            ymode_probs: INTER_YMODE_PROBS,
            uvmode_probs: INTER_UV_MODE_PROBS,
        }
    }
}

/// Read DCT coefficients from the partition's reader.
/// Returns whether any coefficient beyond `first` was decoded.
#[inline]
fn read_coefficients(
    reader: &mut BoolReader,
    output: &mut [i32],
    probs: &[[[TreeNode; NUM_DCT_TOKENS - 1]; 3]; 17],
    first: usize,
    complexity: usize,
    dcq: i16,
    acq: i16,
) -> Result<bool, DecodeError> {
    debug_assert!(complexity <= 2);
    debug_assert!(output.len() >= 16);

    let mut n = first;
    let mut prob = &probs[n][complexity];

    while n < 16 {
        if !reader.read_bool(prob[0].prob) {
            break;
        }

        while !reader.read_bool(prob[1].prob) {
            n += 1;
            if n >= 16 {
                if reader.is_eof() {
                    return Err(DecodeError::BitStreamError);
                }
                return Ok(true);
            }
            prob = &probs[n][0];
        }

        let v: i32;
        let next_ctx: usize;

        if !reader.read_bool(prob[2].prob) {
            v = 1;
            next_ctx = 1;
        } else {
            if !reader.read_bool(prob[3].prob) {
                if !reader.read_bool(prob[4].prob) {
                    v = 2;
                } else {
                    v = 3 + reader.read_bool(prob[5].prob) as i32;
                }
            } else {
                if !reader.read_bool(prob[6].prob) {
                    if !reader.read_bool(prob[7].prob) {
                        v = 5 + reader.read_bool(159) as i32;
                    } else {
                        v = 7 + 2 * reader.read_bool(165) as i32 + reader.read_bool(145) as i32;
                    }
                } else {
                    let bit1 = reader.read_bool(prob[8].prob) as usize;
                    let bit0 = reader.read_bool(prob[9 + bit1].prob) as usize;
                    let cat = 2 * bit1 + bit0;

                    let cat_probs = &PROB_DCT_CAT[2 + cat];
                    let mut extra = 0i32;
                    for &p in cat_probs.iter() {
                        if p == 0 {
                            break;
                        }
                        extra = extra + extra + reader.read_bool(p) as i32;
                    }
                    v = 3 + (8 << cat) + extra;
                }
            }
            next_ctx = 2;
        }

        let signed_v = if reader.read_bool(128) { -v } else { v };

        let zigzag = ZIGZAG[n] as usize;
        let q = if zigzag > 0 { acq } else { dcq };
        output[zigzag] = signed_v * i32::from(q);

        n += 1;
        if n < 16 {
            prob = &probs[n][next_ctx];
        }
    }

    if reader.is_eof() {
        return Err(DecodeError::BitStreamError);
    }
    Ok(n > first)
}

/// Inverse-transforms one residual block, adds it to the workspace at
/// `(x0, y0)` and clears the block, maintaining the all-zero invariant
/// of the shared coefficient buffer.
#[inline]
fn idct_add_residue_and_clear(ws: &mut Workspace, block: &mut [i32; 16], y0: usize, x0: usize) {
    let has_ac = block[1..].iter().any(|&v| v != 0);
    if has_ac {
        transform::idct4x4(block);
    } else if block[0] != 0 {
        transform::idct4x4_dc(block);
    } else {
        return;
    }

    add_residue(ws, block, y0, x0, WS_STRIDE);
    block.fill(0);
}

// set border
fn set_chroma_border(left_border: &mut [u8], top_border: &mut [u8], ws: &Workspace, mbx: usize, x0: usize) {
    let stride = WS_STRIDE;
    // The next macroblock's corner is this one's last top-border pixel.
    left_border[0] = ws[(WS_B_Y - 1) * stride + x0 + 7];

    for (i, left) in left_border[1..][..8].iter_mut().enumerate() {
        *left = ws[(WS_B_Y + i) * stride + x0 + 7];
    }

    for (top, &w) in top_border[mbx * 8..][..8]
        .iter_mut()
        .zip(&ws[(WS_B_Y + 7) * stride + x0..][..8])
    {
        *top = w;
    }
}

/// VP8 Decoder
///
/// Decodes keyframes and inter frames, holding the last/golden/altref
/// reference store across frames. One instance is meant to decode a
/// whole sequence: call [`init`](Self::init) with each compressed frame,
/// then [`decode_frame_header`](Self::decode_frame_header) and
/// [`decode_frame`](Self::decode_frame).
pub struct Vp8Decoder {
    frame_data: Vec<u8>,
    data_pos: usize,
    b: BoolReader,

    limits: Limits,

    mbwidth: u16,
    mbheight: u16,
    macroblocks: Vec<MacroBlock>,

    frame: Frame,
    keyframe: bool,
    version: u8,
    show_frame: bool,
    header_parsed: bool,

    filter_type: bool, // true: simple filter, false: normal filter
    filter_level: u8,
    sharpness_level: u8,

    segments_enabled: bool,
    segments_update_map: bool,
    segment: [Segment; MAX_SEGMENTS],
    segment_tree_nodes: [TreeNode; 3],
    segment_map: Vec<u8>,

    loop_filter_adjustments_enabled: bool,
    ref_delta: [i32; 4],
    mode_delta: [i32; 4],

    // One independent boolean decoder per DCT token partition.
    partitions: Vec<BoolReader>,
    num_partitions: u8,

    // Entropy state: `persistent` survives frames, `entropy` is the
    // working copy the current frame decodes with.
    persistent: EntropyState,
    entropy: EntropyState,
    token_probs_by_pos: Box<TokenProbsByPosition>,

    // Section 9.11
    prob_skip_false: Option<Prob>,

    // Section 9.10
    prob_intra: Prob,
    prob_last: Prob,
    prob_gf: Prob,

    // Section 9.7
    sign_bias: [bool; 4],
    refresh_last: bool,
    refresh_golden: bool,
    refresh_alt: bool,
    copy_to_golden: u8,
    copy_to_alt: u8,
    refresh_entropy: bool,

    // The reference store (section 9.2). Owned decoded frames, replaced
    // by clones of the frame in progress at the end of a decode.
    ref_last: Option<Frame>,
    ref_golden: Option<Frame>,
    ref_alt: Option<Frame>,

    top: Vec<PreviousMacroBlock>,
    left: PreviousMacroBlock,
    mv_ctx: MvContext,

    // The borders from the previous macroblock, used for predictions
    // See Section 12
    // Note that the left border contains the top left pixel
    top_border_y: Vec<u8>,
    left_border_y: Vec<u8>,

    top_border_u: Vec<u8>,
    left_border_u: Vec<u8>,

    top_border_v: Vec<u8>,
    left_border_v: Vec<u8>,

    // Reusable coefficient buffer for macroblock decoding.
    // Maintained as zeros between macroblocks; each 16-element block is
    // cleared again after its IDCT is applied.
    coeff_blocks: [i32; 384],

    stats: FrameStats,
}

impl Default for Vp8Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Vp8Decoder {
    /// Creates a decoder with default [`Limits`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    /// Creates a decoder with explicit decode limits.
    #[must_use]
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            frame_data: Vec::new(),
            data_pos: 0,
            b: BoolReader::new(),

            limits,

            mbwidth: 0,
            mbheight: 0,
            macroblocks: Vec::new(),

            frame: Frame::default(),
            keyframe: false,
            version: 0,
            show_frame: false,
            header_parsed: false,

            filter_type: false,
            filter_level: 0,
            sharpness_level: 0,

            segments_enabled: false,
            segments_update_map: false,
            segment: array::from_fn(|_| Segment::default()),
            segment_tree_nodes: SEGMENT_TREE_NODE_DEFAULTS,
            segment_map: Vec::new(),

            loop_filter_adjustments_enabled: false,
            ref_delta: [0; 4],
            mode_delta: [0; 4],

            partitions: Vec::new(),
            num_partitions: 1,

            persistent: EntropyState::defaults(),
            entropy: EntropyState::defaults(),
            token_probs_by_pos: Box::new([[[[TreeNode::UNINIT; 11]; 3]; 17]; 4]),

            prob_skip_false: None,

            prob_intra: 0,
            prob_last: 0,
            prob_gf: 0,

            sign_bias: [false; 4],
            refresh_last: true,
            refresh_golden: true,
            refresh_alt: true,
            copy_to_golden: 0,
            copy_to_alt: 0,
            refresh_entropy: true,

            ref_last: None,
            ref_golden: None,
            ref_alt: None,

            top: Vec::new(),
            left: PreviousMacroBlock::default(),
            mv_ctx: MvContext::new(),

            top_border_y: Vec::new(),
            left_border_y: Vec::new(),

            top_border_u: Vec::new(),
            left_border_u: Vec::new(),

            top_border_v: Vec::new(),
            left_border_v: Vec::new(),

            coeff_blocks: [0i32; 384],

            stats: FrameStats::default(),
        }
    }

    /// Binds a new compressed frame. `size` is the frame's length in
    /// bytes and must not exceed `data.len()`; the payload is copied so
    /// the caller may reuse its buffer.
    pub fn init(&mut self, data: &[u8], size: usize) -> Result<(), DecodeError> {
        if size > data.len() {
            return Err(DecodeError::InvalidParameter(
                "frame size exceeds the provided buffer".to_string(),
            ));
        }
        self.frame_data.clear();
        self.frame_data.extend_from_slice(&data[..size]);
        self.data_pos = 0;
        self.header_parsed = false;
        Ok(())
    }

    /// Diagnostics for the most recently decoded frame.
    #[must_use]
    pub fn frame_stats(&self) -> FrameStats {
        self.stats
    }

    fn take_bytes(&mut self, n: usize) -> Result<core::ops::Range<usize>, DecodeError> {
        if self.frame_data.len() - self.data_pos < n {
            return Err(DecodeError::NotEnoughInitData);
        }
        let range = self.data_pos..self.data_pos + n;
        self.data_pos += n;
        Ok(range)
    }

    fn read_segment_updates(&mut self) -> Result<(), DecodeError> {
        // Section 9.3
        self.segments_update_map = self.b.read_flag();
        let update_segment_feature_data = self.b.read_flag();

        if update_segment_feature_data {
            let segment_feature_mode = self.b.read_flag();

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].delta_values = !segment_feature_mode;
            }

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].quantizer_level = self.b.read_optional_signed_value(7) as i8;
            }

            for i in 0usize..MAX_SEGMENTS {
                self.segment[i].loopfilter_level = self.b.read_optional_signed_value(6) as i8;
            }
        }

        if self.segments_update_map {
            for i in 0usize..3 {
                let update = self.b.read_flag();

                let prob = if update { self.b.read_literal(8) } else { 255 };
                self.segment_tree_nodes[i].prob = prob;
            }
        }

        self.b.check(())
    }

    fn read_loop_filter_adjustments(&mut self) -> Result<(), DecodeError> {
        if self.b.read_flag() {
            for i in 0usize..4 {
                self.ref_delta[i] = self.b.read_optional_signed_value(6);
            }

            for i in 0usize..4 {
                self.mode_delta[i] = self.b.read_optional_signed_value(6);
            }
        }

        self.b.check(())
    }

    fn read_quantization_indices(&mut self) -> Result<(), DecodeError> {
        fn dc_quant(index: i32) -> i16 {
            DC_QUANT[index.clamp(0, 127) as usize]
        }

        fn ac_quant(index: i32) -> i16 {
            AC_QUANT[index.clamp(0, 127) as usize]
        }

        let yac_abs = self.b.read_literal(7);
        let ydc_delta = self.b.read_optional_signed_value(4);
        let y2dc_delta = self.b.read_optional_signed_value(4);
        let y2ac_delta = self.b.read_optional_signed_value(4);
        let uvdc_delta = self.b.read_optional_signed_value(4);
        let uvac_delta = self.b.read_optional_signed_value(4);

        let n = if self.segments_enabled {
            MAX_SEGMENTS
        } else {
            1
        };
        for i in 0usize..n {
            let base = i32::from(if self.segments_enabled {
                if self.segment[i].delta_values {
                    i16::from(self.segment[i].quantizer_level) + i16::from(yac_abs)
                } else {
                    i16::from(self.segment[i].quantizer_level)
                }
            } else {
                i16::from(yac_abs)
            });

            self.segment[i].ydc = dc_quant(base + ydc_delta);
            self.segment[i].yac = ac_quant(base);

            self.segment[i].y2dc = dc_quant(base + y2dc_delta) * 2;
            // The intermediate result (max `284*155`) can be larger than the `i16` range.
            self.segment[i].y2ac = (i32::from(ac_quant(base + y2ac_delta)) * 155 / 100) as i16;

            self.segment[i].uvdc = dc_quant(base + uvdc_delta);
            self.segment[i].uvac = ac_quant(base + uvac_delta);

            if self.segment[i].y2ac < 8 {
                self.segment[i].y2ac = 8;
            }

            if self.segment[i].uvdc > 132 {
                self.segment[i].uvdc = 132;
            }
        }

        self.b.check(())
    }

    fn update_token_probabilities(&mut self) -> Result<(), DecodeError> {
        for (i, is) in COEFF_UPDATE_PROBS.iter().enumerate() {
            for (j, js) in is.iter().enumerate() {
                for (k, ks) in js.iter().enumerate() {
                    for (t, prob) in ks.iter().enumerate().take(NUM_DCT_TOKENS - 1) {
                        if self.b.read_bool(*prob) {
                            let v = self.b.read_literal(8);
                            self.entropy.token_probs[i][j][k][t].prob = v;
                        }
                    }
                }
            }
        }
        self.b.check(())
    }

    /// Populate the position-indexed probability table from token_probs.
    /// This eliminates the COEFF_BANDS lookup in the coefficient reading hot path.
    fn populate_probs_by_position(&mut self) {
        for plane in 0..4 {
            for pos in 0..17 {
                // Position 16 uses band 7 (sentinel for n+1 lookahead)
                let band = if pos < 16 {
                    COEFF_BANDS[pos] as usize
                } else {
                    7
                };
                for ctx in 0..3 {
                    self.token_probs_by_pos[plane][pos][ctx] =
                        self.entropy.token_probs[plane][band][ctx];
                }
            }
        }
    }

    fn init_partitions(&mut self, n: usize) -> Result<(), DecodeError> {
        let mut partitions = Vec::with_capacity(n);

        if n > 1 {
            let sizes = self.take_bytes(3 * n - 3)?;
            let sizes: Vec<u8> = self.frame_data[sizes].to_vec();

            for s in sizes.chunks(3) {
                let size = LittleEndian::read_u24(s) as usize;

                let range = self.take_bytes(size)?;
                partitions.push(BoolReader::for_partition(self.frame_data[range].to_vec()));
            }
        }

        // Last partition runs to the end of the frame.
        let rest = self.frame_data[self.data_pos..].to_vec();
        self.data_pos = self.frame_data.len();
        partitions.push(BoolReader::for_partition(rest));

        self.partitions = partitions;

        Ok(())
    }

    fn allocate_frame(&mut self, width: u16, height: u16) {
        self.frame = Frame::new(width, height);
        self.mbwidth = width.div_ceil(16);
        self.mbheight = height.div_ceil(16);

        let mbw = usize::from(self.mbwidth);
        let mbh = usize::from(self.mbheight);

        self.segment_map = vec![0u8; mbw * mbh];
        self.top = vec![PreviousMacroBlock::default(); mbw];

        self.top_border_y = vec![127u8; mbw * 16 + 4];
        self.left_border_y = vec![129u8; 1 + 16];

        self.top_border_u = vec![127u8; mbw * 8];
        self.left_border_u = vec![129u8; 1 + 8];

        self.top_border_v = vec![127u8; mbw * 8];
        self.left_border_v = vec![129u8; 1 + 8];

        self.mv_ctx.resize(mbw);
    }

    /// Consumes the frame header via the boolean decoder
    /// (RFC 6386 sections 9.1 to 9.11).
    pub fn decode_frame_header(&mut self) -> Result<FrameHeader, DecodeError> {
        let range = self.take_bytes(3)?;
        let tag = LittleEndian::read_u24(&self.frame_data[range.clone()]);

        self.keyframe = tag & 1 == 0;
        self.version = ((tag >> 1) & 7) as u8;
        self.show_frame = (tag >> 4) & 1 != 0;

        let first_partition_size = (tag >> 5) as usize;

        if self.keyframe {
            let range = self.take_bytes(3)?;
            let magic: [u8; 3] = self.frame_data[range].try_into().unwrap();
            if magic != [0x9d, 0x01, 0x2a] {
                return Err(DecodeError::Vp8MagicInvalid(magic));
            }

            let range = self.take_bytes(4)?;
            let dims = &self.frame_data[range];
            let w_code = LittleEndian::read_u16(&dims[0..2]);
            let h_code = LittleEndian::read_u16(&dims[2..4]);
            let (w, h) = (w_code & 0x3FFF, h_code & 0x3FFF);

            // The top two bits of each dimension select an upscaling
            // ratio (section 9.1).
            if w_code >> 14 != 0 || h_code >> 14 != 0 {
                return Err(DecodeError::UnsupportedFeature(
                    "upscaled frame dimensions".to_string(),
                ));
            }

            if w == 0 || h == 0 {
                return Err(DecodeError::InvalidParameter(
                    "zero frame dimension".to_string(),
                ));
            }
            self.limits.check_dimensions(w, h)?;

            if self.frame.width != w || self.frame.height != h || self.mbwidth == 0 {
                self.allocate_frame(w, h);
            }

            // A keyframe resets the persistent entropy state and the
            // golden/altref sign biases, and implicitly refreshes every
            // reference (section 9.7).
            self.persistent = EntropyState::defaults();
            self.sign_bias = [false; 4];
            self.refresh_last = true;
            self.refresh_golden = true;
            self.refresh_alt = true;
            self.copy_to_golden = 0;
            self.copy_to_alt = 0;
        } else {
            if self.mbwidth == 0 {
                return Err(DecodeError::InvalidParameter(
                    "inter frame without a preceding keyframe".to_string(),
                ));
            }
        }

        let range = self.take_bytes(first_partition_size)?;
        let data = self.frame_data[range].to_vec();
        self.b.init(data)?;

        if self.keyframe {
            let color_space = self.b.read_literal(1);
            let _clamping_type = self.b.read_literal(1);

            if color_space != 0 {
                return Err(DecodeError::ColorSpaceInvalid(color_space));
            }
        }

        self.segments_enabled = self.b.read_flag();
        if self.segments_enabled {
            self.read_segment_updates()?;
        }

        self.filter_type = self.b.read_flag();
        self.filter_level = self.b.read_literal(6);
        self.sharpness_level = self.b.read_literal(3);

        self.loop_filter_adjustments_enabled = self.b.read_flag();
        if self.loop_filter_adjustments_enabled {
            self.read_loop_filter_adjustments()?;
        }

        let num_partitions = 1 << self.b.read_literal(2) as usize;
        self.b.check(())?;

        self.num_partitions = num_partitions as u8;
        self.init_partitions(num_partitions)?;

        self.read_quantization_indices()?;

        if self.keyframe {
            self.refresh_entropy = self.b.read_literal(1) == 1;
        } else {
            // Section 9.7: reference refresh, buffer copies and sign
            // biases, then the entropy refresh and last refresh bits.
            self.refresh_golden = self.b.read_flag();
            self.refresh_alt = self.b.read_flag();
            self.copy_to_golden = if self.refresh_golden {
                0
            } else {
                self.b.read_literal(2)
            };
            self.copy_to_alt = if self.refresh_alt {
                0
            } else {
                self.b.read_literal(2)
            };
            self.sign_bias[RefFrame::Golden as usize] = self.b.read_flag();
            self.sign_bias[RefFrame::Altref as usize] = self.b.read_flag();
            self.refresh_entropy = self.b.read_flag();
            self.refresh_last = self.b.read_flag();
        }

        self.entropy = self.persistent.clone();

        self.update_token_probabilities()?;
        self.populate_probs_by_position();

        let mb_no_skip_coeff = self.b.read_literal(1);
        self.prob_skip_false = if mb_no_skip_coeff == 1 {
            Some(self.b.read_literal(8))
        } else {
            None
        };

        if !self.keyframe {
            self.prob_intra = self.b.read_literal(8);
            self.prob_last = self.b.read_literal(8);
            self.prob_gf = self.b.read_literal(8);

            // Optional replacements of the intra mode probabilities.
            if self.b.read_flag() {
                for i in 0..4 {
                    self.entropy.ymode_probs[i] = self.b.read_literal(8);
                }
            }
            if self.b.read_flag() {
                for i in 0..3 {
                    self.entropy.uvmode_probs[i] = self.b.read_literal(8);
                }
            }

            update_mv_probs(&mut self.b, &mut self.entropy.mv_probs);
        }

        self.b.check(())?;

        if self.refresh_entropy {
            self.persistent = self.entropy.clone();
        }

        self.header_parsed = true;

        Ok(FrameHeader {
            key_frame: self.keyframe,
            width: self.frame.width,
            height: self.frame.height,
            show_frame: self.show_frame,
            version: self.version,
        })
    }

    /// Parses the macroblock header for a keyframe macroblock: intra
    /// modes with the keyframe trees and spatial contexts (section 11).
    fn read_keyframe_macroblock_header(
        &mut self,
        mb: &mut MacroBlock,
        mbx: usize,
    ) -> Result<(), DecodeError> {
        let luma = self.b.read_with_tree(&KEYFRAME_YMODE_NODES);
        mb.luma_mode =
            LumaMode::from_i8(luma).ok_or(DecodeError::LumaPredictionModeInvalid(luma))?;

        match mb.luma_mode.into_intra() {
            // `LumaMode::B` - This is predicted individually
            None => {
                for y in 0usize..4 {
                    for x in 0usize..4 {
                        let top = self.top[mbx].bpred[x];
                        let left = self.left.bpred[y];
                        let intra = self
                            .b
                            .read_with_tree(&KEYFRAME_BPRED_MODE_NODES[top as usize][left as usize]);
                        let bmode = IntraMode::from_i8(intra)
                            .ok_or(DecodeError::IntraPredictionModeInvalid(intra))?;
                        mb.bpred[x + y * 4] = bmode;

                        self.top[mbx].bpred[x] = bmode;
                        self.left.bpred[y] = bmode;
                    }
                }
            }
            Some(mode) => {
                for i in 0usize..4 {
                    mb.bpred[12 + i] = mode;
                    self.left.bpred[i] = mode;
                }
                self.top[mbx].bpred = [mode; 4];
            }
        }

        let chroma = self.b.read_with_tree(&KEYFRAME_UV_MODE_NODES);
        mb.chroma_mode =
            ChromaMode::from_i8(chroma).ok_or(DecodeError::ChromaPredictionModeInvalid(chroma))?;

        Ok(())
    }

    /// Parses the intra modes of an intra macroblock inside an inter
    /// frame. The context-free four-leaf luma chain matches the
    /// reference decoder; 4x4 B prediction is not coded here.
    fn read_inter_intra_modes(&mut self, mb: &mut MacroBlock, mbx: usize) {
        let p = &self.entropy.ymode_probs;
        let luma = if !self.b.read_bool(p[0]) {
            LumaMode::DC
        } else if !self.b.read_bool(p[1]) {
            LumaMode::V
        } else if !self.b.read_bool(p[2]) {
            LumaMode::H
        } else {
            LumaMode::TM
        };
        mb.luma_mode = luma;

        let mode = luma.into_intra().unwrap_or(IntraMode::DC);
        mb.bpred = [mode; 16];
        self.top[mbx].bpred = [mode; 4];
        self.left.bpred = [mode; 4];

        let p = &self.entropy.uvmode_probs;
        mb.chroma_mode = if !self.b.read_bool(p[0]) {
            ChromaMode::DC
        } else if !self.b.read_bool(p[1]) {
            ChromaMode::V
        } else if !self.b.read_bool(p[2]) {
            ChromaMode::H
        } else {
            ChromaMode::TM
        };
    }

    /// Reads one macroblock header. For inter frames this decides intra
    /// vs inter, decodes the reference frame and motion vectors, and
    /// returns the motion state for the prediction dispatcher.
    fn read_macroblock_header(
        &mut self,
        mbx: usize,
        mby: usize,
    ) -> Result<(MacroBlock, Option<InterMb>), DecodeError> {
        let mut mb = MacroBlock::default();

        if self.segments_enabled {
            let index = mby * usize::from(self.mbwidth) + mbx;
            if self.segments_update_map {
                mb.segmentid = self.b.read_with_tree(&self.segment_tree_nodes) as u8;
                self.segment_map[index] = mb.segmentid;
            } else {
                mb.segmentid = self.segment_map[index];
            }
        };

        mb.coeffs_skipped = if let Some(prob) = self.prob_skip_false {
            self.b.read_bool(prob)
        } else {
            false
        };

        let inter_mb = if self.keyframe {
            self.read_keyframe_macroblock_header(&mut mb, mbx)?;
            None
        } else if self.b.read_bool(self.prob_intra) {
            // Intra macroblock in an inter frame.
            self.read_inter_intra_modes(&mut mb, mbx);
            None
        } else {
            let params = InterParams {
                prob_last: self.prob_last,
                prob_gf: self.prob_gf,
                sign_bias: self.sign_bias,
                mv_probs: &self.entropy.mv_probs,
                mbw: usize::from(self.mbwidth),
                mbh: usize::from(self.mbheight),
            };
            let imb = parse_inter_mb(&mut self.b, &params, &self.mv_ctx, mbx, mby);

            mb.ref_frame = imb.ref_frame;
            mb.mv_mode = imb.mv_mode;

            // Inter macroblocks present a DC intra context to their
            // neighbours.
            self.top[mbx].bpred = [IntraMode::DC; 4];
            self.left.bpred = [IntraMode::DC; 4];

            Some(imb)
        };

        self.b.check((mb, inter_mb))
    }

    /// Read DCT coefficients for all blocks of one macroblock,
    /// maintaining the nonzero contexts (section 13).
    fn read_residual_data(
        &mut self,
        mb: &mut MacroBlock,
        mbx: usize,
        p: usize,
        has_y2: bool,
    ) -> Result<(), DecodeError> {
        let sindex = mb.segmentid as usize;

        let y2dc = self.segment[sindex].y2dc;
        let y2ac = self.segment[sindex].y2ac;
        let ydc = self.segment[sindex].ydc;
        let yac = self.segment[sindex].yac;
        let uvdc = self.segment[sindex].uvdc;
        let uvac = self.segment[sindex].uvac;

        // Split borrows: the partition reader and the probability tables
        // are distinct fields.
        let reader = &mut self.partitions[p];

        let probs = &*self.token_probs_by_pos;
        let coeff_blocks = &mut self.coeff_blocks;
        let top = &mut self.top[mbx];
        let left = &mut self.left;

        let mut plane = if has_y2 { Plane::Y2 } else { Plane::YCoeff0 };

        if plane == Plane::Y2 {
            let complexity = top.complexity[0] + left.complexity[0];
            let mut block = [0i32; 16];
            let n = read_coefficients(
                reader,
                &mut block,
                &probs[Plane::Y2 as usize],
                0, // first
                complexity as usize,
                y2dc,
                y2ac,
            )?;

            left.complexity[0] = if n { 1 } else { 0 };
            top.complexity[0] = if n { 1 } else { 0 };

            transform::iwht4x4(&mut block);

            for (k, &val) in block.iter().enumerate() {
                coeff_blocks[16 * k] = val;
            }

            plane = Plane::YCoeff1;
        }

        let first_y = if plane == Plane::YCoeff1 { 1 } else { 0 };

        for y in 0usize..4 {
            let mut left_ctx = left.complexity[y + 1];
            for x in 0usize..4 {
                let i = x + y * 4;
                let complexity = top.complexity[x + 1] + left_ctx;

                let block_slice = &mut coeff_blocks[i * 16..][..16];
                let n = read_coefficients(
                    reader,
                    block_slice,
                    &probs[plane as usize],
                    first_y,
                    complexity as usize,
                    ydc,
                    yac,
                )?;

                if block_slice[0] != 0 || n {
                    mb.non_zero_dct = true;
                }

                left_ctx = if n { 1 } else { 0 };
                top.complexity[x + 1] = if n { 1 } else { 0 };
            }

            left.complexity[y + 1] = left_ctx;
        }

        // Chroma
        let chroma_probs = &probs[Plane::Chroma as usize];

        for &j in &[5usize, 7usize] {
            for y in 0usize..2 {
                let mut left_ctx = left.complexity[y + j];

                for x in 0usize..2 {
                    let i = x + y * 2 + if j == 5 { 16 } else { 20 };
                    let complexity = top.complexity[x + j] + left_ctx;

                    let block_slice = &mut coeff_blocks[i * 16..][..16];
                    let n = read_coefficients(
                        reader,
                        block_slice,
                        chroma_probs,
                        0, // first
                        complexity as usize,
                        uvdc,
                        uvac,
                    )?;

                    if block_slice[0] != 0 || n {
                        mb.non_zero_dct = true;
                    }

                    left_ctx = if n { 1 } else { 0 };
                    top.complexity[x + j] = if n { 1 } else { 0 };
                }

                left.complexity[y + j] = left_ctx;
            }
        }

        Ok(())
    }

    fn intra_predict_luma(&mut self, ws: &mut Workspace, mbx: usize, mby: usize, mb: &MacroBlock) {
        let stride = WS_STRIDE;
        let mw = self.mbwidth as usize;
        update_border_luma(ws, mbx, mby, mw, &self.top_border_y, &self.left_border_y);

        match mb.luma_mode {
            LumaMode::V => predict_vpred(ws, 16, WS_Y_X, WS_Y_Y, stride),
            LumaMode::H => predict_hpred(ws, 16, WS_Y_X, WS_Y_Y, stride),
            LumaMode::TM => predict_tmpred(ws, 16, WS_Y_X, WS_Y_Y, stride),
            LumaMode::DC => predict_dcpred(ws, 16, WS_Y_X, WS_Y_Y, stride, mby != 0, mbx != 0),
            LumaMode::B => {
                // B-mode: predict and add residue per 4x4 sub-block, so
                // later sub-blocks see reconstructed neighbours.
                for sby in 0usize..4 {
                    for sbx in 0usize..4 {
                        let i = sbx + sby * 4;
                        let y0 = WS_Y_Y + sby * 4;
                        let x0 = WS_Y_X + sbx * 4;

                        match mb.bpred[i] {
                            IntraMode::TM => predict_tmpred(ws, 4, x0, y0, stride),
                            IntraMode::VE => predict_bvepred(ws, x0, y0, stride),
                            IntraMode::HE => predict_bhepred(ws, x0, y0, stride),
                            IntraMode::DC => predict_bdcpred(ws, x0, y0, stride),
                            IntraMode::LD => predict_bldpred(ws, x0, y0, stride),
                            IntraMode::RD => predict_brdpred(ws, x0, y0, stride),
                            IntraMode::VR => predict_bvrpred(ws, x0, y0, stride),
                            IntraMode::VL => predict_bvlpred(ws, x0, y0, stride),
                            IntraMode::HD => predict_bhdpred(ws, x0, y0, stride),
                            IntraMode::HU => predict_bhupred(ws, x0, y0, stride),
                        }

                        let rb: &mut [i32; 16] =
                            (&mut self.coeff_blocks[i * 16..][..16]).try_into().unwrap();
                        idct_add_residue_and_clear(ws, rb, y0, x0);
                    }
                }
            }
        }

        if mb.luma_mode != LumaMode::B {
            self.add_luma_residuals(ws);
        }
    }

    fn add_luma_residuals(&mut self, ws: &mut Workspace) {
        for y in 0usize..4 {
            for x in 0usize..4 {
                let i = x + y * 4;
                let rb: &mut [i32; 16] =
                    (&mut self.coeff_blocks[i * 16..][..16]).try_into().unwrap();
                idct_add_residue_and_clear(ws, rb, WS_Y_Y + y * 4, WS_Y_X + x * 4);
            }
        }
    }

    fn intra_predict_chroma(&mut self, ws: &mut Workspace, mbx: usize, mby: usize, mb: &MacroBlock) {
        let stride = WS_STRIDE;

        update_border_chroma(ws, mbx, mby, WS_B_X, &self.top_border_u, &self.left_border_u);
        update_border_chroma(ws, mbx, mby, WS_R_X, &self.top_border_v, &self.left_border_v);

        for x0 in [WS_B_X, WS_R_X] {
            match mb.chroma_mode {
                ChromaMode::DC => {
                    predict_dcpred(ws, 8, x0, WS_B_Y, stride, mby != 0, mbx != 0);
                }
                ChromaMode::V => predict_vpred(ws, 8, x0, WS_B_Y, stride),
                ChromaMode::H => predict_hpred(ws, 8, x0, WS_B_Y, stride),
                ChromaMode::TM => predict_tmpred(ws, 8, x0, WS_B_Y, stride),
            }
        }
    }

    fn add_chroma_residuals(&mut self, ws: &mut Workspace) {
        for y in 0usize..2 {
            for x in 0usize..2 {
                let i = x + y * 2;

                let rb: &mut [i32; 16] = (&mut self.coeff_blocks[(16 + i) * 16..][..16])
                    .try_into()
                    .unwrap();
                idct_add_residue_and_clear(ws, rb, WS_B_Y + y * 4, WS_B_X + x * 4);

                let rb: &mut [i32; 16] = (&mut self.coeff_blocks[(20 + i) * 16..][..16])
                    .try_into()
                    .unwrap();
                idct_add_residue_and_clear(ws, rb, WS_R_Y + y * 4, WS_R_X + x * 4);
            }
        }
    }

    /// Saves the workspace's right column and bottom row into the border
    /// buffers for the macroblocks to the right and below.
    fn save_borders(&mut self, ws: &Workspace, mbx: usize) {
        let stride = WS_STRIDE;

        self.left_border_y[0] = ws[WS_Y_X + 15];
        for (i, left) in self.left_border_y[1..][..16].iter_mut().enumerate() {
            *left = ws[(WS_Y_Y + i) * stride + WS_Y_X + 15];
        }
        self.top_border_y[mbx * 16..][..16]
            .copy_from_slice(&ws[16 * stride + WS_Y_X..][..16]);

        set_chroma_border(&mut self.left_border_u, &mut self.top_border_u, ws, mbx, WS_B_X);
        set_chroma_border(&mut self.left_border_v, &mut self.top_border_v, ws, mbx, WS_R_X);
    }

    /// Commits the workspace's pixels into the frame planes.
    fn output_macroblock(&mut self, ws: &Workspace, mbx: usize, mby: usize) {
        let y_stride = self.frame.luma_stride();
        let c_stride = self.frame.chroma_stride();

        for y in 0usize..16 {
            let dst = (mby * 16 + y) * y_stride + mbx * 16;
            self.frame.ybuf[dst..][..16]
                .copy_from_slice(&ws[(WS_Y_Y + y) * WS_STRIDE + WS_Y_X..][..16]);
        }
        for y in 0usize..8 {
            let dst = (mby * 8 + y) * c_stride + mbx * 8;
            self.frame.ubuf[dst..][..8]
                .copy_from_slice(&ws[(WS_B_Y + y) * WS_STRIDE + WS_B_X..][..8]);
            self.frame.vbuf[dst..][..8]
                .copy_from_slice(&ws[(WS_R_Y + y) * WS_STRIDE + WS_R_X..][..8]);
        }
    }

    fn reference(&self, tag: RefFrame) -> Option<&Frame> {
        match tag {
            RefFrame::Intra => None,
            RefFrame::Last => self.ref_last.as_ref(),
            RefFrame::Golden => self.ref_golden.as_ref(),
            RefFrame::Altref => self.ref_alt.as_ref(),
        }
    }

    /// Reconstructs one macroblock: prediction into the workspace,
    /// residual add, border bookkeeping and commit to the frame planes.
    fn reconstruct_macroblock(
        &mut self,
        mbx: usize,
        mby: usize,
        mb: &MacroBlock,
        inter_mb: Option<&InterMb>,
    ) {
        let mut ws = [0u8; WS_SIZE];

        match inter_mb {
            Some(imb) => {
                // The reference is borrowed only for the duration of this
                // macroblock's prediction.
                let found = predict_inter(&mut ws, self.reference(imb.ref_frame), imb, mbx, mby);
                if !found {
                    self.stats.missing_reference_mbs += 1;
                }

                self.add_luma_residuals(&mut ws);
                self.add_chroma_residuals(&mut ws);
            }
            None => {
                self.intra_predict_luma(&mut ws, mbx, mby, mb);
                self.intra_predict_chroma(&mut ws, mbx, mby, mb);
                self.add_chroma_residuals(&mut ws);
            }
        }

        self.save_borders(&ws, mbx);
        self.output_macroblock(&ws, mbx, mby);
    }

    //return values are the filter level, interior limit and hev threshold
    fn calculate_filter_parameters(&self, macroblock: &MacroBlock) -> (u8, u8, u8) {
        let segment = &self.segment[macroblock.segmentid as usize];
        let mut filter_level = i32::from(self.filter_level);

        // if frame level filter level is 0, we must skip loop filter
        if filter_level == 0 {
            return (0, 0, 0);
        }

        if self.segments_enabled {
            if segment.delta_values {
                filter_level += i32::from(segment.loopfilter_level);
            } else {
                filter_level = i32::from(segment.loopfilter_level);
            }
        }

        filter_level = filter_level.clamp(0, 63);

        if self.loop_filter_adjustments_enabled {
            filter_level += self.ref_delta[macroblock.ref_frame as usize];
            if macroblock.ref_frame == RefFrame::Intra {
                if macroblock.luma_mode == LumaMode::B {
                    filter_level += self.mode_delta[0];
                }
            } else {
                filter_level += match macroblock.mv_mode {
                    MvMode::Zero => self.mode_delta[1],
                    MvMode::Split => self.mode_delta[3],
                    _ => self.mode_delta[2],
                };
            }
        }

        let filter_level = filter_level.clamp(0, 63) as u8;

        //interior limit
        let mut interior_limit = filter_level;

        if self.sharpness_level > 0 {
            interior_limit >>= if self.sharpness_level > 4 { 2 } else { 1 };

            if interior_limit > 9 - self.sharpness_level {
                interior_limit = 9 - self.sharpness_level;
            }
        }

        if interior_limit == 0 {
            interior_limit = 1;
        }

        // high edge variance threshold, higher for inter frames
        let hev_threshold = if self.keyframe {
            if filter_level >= 40 {
                2
            } else if filter_level >= 15 {
                1
            } else {
                0
            }
        } else if filter_level >= 40 {
            3
        } else if filter_level >= 20 {
            2
        } else if filter_level >= 15 {
            1
        } else {
            0
        };

        (filter_level, interior_limit, hev_threshold)
    }

    /// Applies the in-loop deblocking filter to one macroblock
    /// (RFC 6386 section 15), in the frame's pixel buffers.
    fn filter_macroblock(&mut self, mbx: usize, mby: usize) {
        let mb = self.macroblocks[mby * usize::from(self.mbwidth) + mbx];
        let (filter_level, interior_limit, hev_threshold) =
            self.calculate_filter_parameters(&mb);

        if filter_level == 0 {
            return;
        }

        let mbedge_limit = (filter_level + 2) * 2 + interior_limit;
        let sub_bedge_limit = (filter_level * 2) + interior_limit;

        // Interior edges are skipped for macroblocks that coded no
        // coefficients, unless the mode itself is subdivided.
        let do_subblock_filtering = mb.luma_mode == LumaMode::B
            || (mb.ref_frame != RefFrame::Intra && mb.mv_mode == MvMode::Split)
            || (!mb.coeffs_skipped && mb.non_zero_dct);

        let y_stride = self.frame.luma_stride();
        let c_stride = self.frame.chroma_stride();

        if self.filter_type {
            // Simple filter: luma only.
            let ybuf = &mut self.frame.ybuf;

            if mbx > 0 {
                for y in 0..16 {
                    let pos = (mby * 16 + y) * y_stride + mbx * 16;
                    loop_filter::simple_filter(ybuf, pos, 1, mbedge_limit);
                }
            }
            if do_subblock_filtering {
                for x in (4..16).step_by(4) {
                    for y in 0..16 {
                        let pos = (mby * 16 + y) * y_stride + mbx * 16 + x;
                        loop_filter::simple_filter(ybuf, pos, 1, sub_bedge_limit);
                    }
                }
            }
            if mby > 0 {
                for x in 0..16 {
                    let pos = mby * 16 * y_stride + mbx * 16 + x;
                    loop_filter::simple_filter(ybuf, pos, y_stride, mbedge_limit);
                }
            }
            if do_subblock_filtering {
                for y in (4..16).step_by(4) {
                    for x in 0..16 {
                        let pos = (mby * 16 + y) * y_stride + mbx * 16 + x;
                        loop_filter::simple_filter(ybuf, pos, y_stride, sub_bedge_limit);
                    }
                }
            }
            return;
        }

        // Normal filter: luma and both chroma planes.
        if mbx > 0 {
            for y in 0..16 {
                let pos = (mby * 16 + y) * y_stride + mbx * 16;
                loop_filter::macroblock_filter(
                    &mut self.frame.ybuf,
                    pos,
                    1,
                    hev_threshold,
                    interior_limit,
                    mbedge_limit,
                );
            }
            for y in 0..8 {
                let pos = (mby * 8 + y) * c_stride + mbx * 8;
                for buf in [&mut self.frame.ubuf, &mut self.frame.vbuf] {
                    loop_filter::macroblock_filter(
                        buf,
                        pos,
                        1,
                        hev_threshold,
                        interior_limit,
                        mbedge_limit,
                    );
                }
            }
        }

        if do_subblock_filtering {
            for x in (4..16).step_by(4) {
                for y in 0..16 {
                    let pos = (mby * 16 + y) * y_stride + mbx * 16 + x;
                    loop_filter::subblock_filter(
                        &mut self.frame.ybuf,
                        pos,
                        1,
                        hev_threshold,
                        interior_limit,
                        sub_bedge_limit,
                    );
                }
            }
            for y in 0..8 {
                let pos = (mby * 8 + y) * c_stride + mbx * 8 + 4;
                for buf in [&mut self.frame.ubuf, &mut self.frame.vbuf] {
                    loop_filter::subblock_filter(
                        buf,
                        pos,
                        1,
                        hev_threshold,
                        interior_limit,
                        sub_bedge_limit,
                    );
                }
            }
        }

        if mby > 0 {
            for x in 0..16 {
                let pos = mby * 16 * y_stride + mbx * 16 + x;
                loop_filter::macroblock_filter(
                    &mut self.frame.ybuf,
                    pos,
                    y_stride,
                    hev_threshold,
                    interior_limit,
                    mbedge_limit,
                );
            }
            for x in 0..8 {
                let pos = mby * 8 * c_stride + mbx * 8 + x;
                for buf in [&mut self.frame.ubuf, &mut self.frame.vbuf] {
                    loop_filter::macroblock_filter(
                        buf,
                        pos,
                        c_stride,
                        hev_threshold,
                        interior_limit,
                        mbedge_limit,
                    );
                }
            }
        }

        if do_subblock_filtering {
            for y in (4..16).step_by(4) {
                for x in 0..16 {
                    let pos = (mby * 16 + y) * y_stride + mbx * 16 + x;
                    loop_filter::subblock_filter(
                        &mut self.frame.ybuf,
                        pos,
                        y_stride,
                        hev_threshold,
                        interior_limit,
                        sub_bedge_limit,
                    );
                }
            }
            for x in 0..8 {
                let pos = (mby * 8 + 4) * c_stride + mbx * 8 + x;
                for buf in [&mut self.frame.ubuf, &mut self.frame.vbuf] {
                    loop_filter::subblock_filter(
                        buf,
                        pos,
                        c_stride,
                        hev_threshold,
                        interior_limit,
                        sub_bedge_limit,
                    );
                }
            }
        }
    }

    /// Applies the reference refresh decision (RFC 6386 section 9.2).
    /// Buffer copies resolve against the pre-frame reference set, then
    /// the refresh flags replace targets with the just-decoded frame.
    fn refresh_references(&mut self) {
        if self.keyframe {
            self.ref_last = Some(self.frame.clone());
            self.ref_golden = Some(self.frame.clone());
            self.ref_alt = Some(self.frame.clone());
            return;
        }

        let new_golden = if self.refresh_golden {
            Some(self.frame.clone())
        } else {
            match self.copy_to_golden {
                1 => self.ref_last.clone(),
                2 => self.ref_alt.clone(),
                _ => self.ref_golden.clone(),
            }
        };

        let new_alt = if self.refresh_alt {
            Some(self.frame.clone())
        } else {
            match self.copy_to_alt {
                1 => self.ref_last.clone(),
                2 => self.ref_golden.clone(),
                _ => self.ref_alt.clone(),
            }
        };

        let new_last = if self.refresh_last {
            Some(self.frame.clone())
        } else {
            self.ref_last.clone()
        };

        self.ref_golden = new_golden;
        self.ref_alt = new_alt;
        self.ref_last = new_last;
    }

    /// Fully decodes the current frame. Must be called after
    /// [`decode_frame_header`](Self::decode_frame_header).
    ///
    /// The returned reference borrows the decoder's frame in progress and
    /// is valid until the next [`init`](Self::init); clone it to keep it
    /// longer. On error no partial frame is returned and the reference
    /// store is left untouched.
    pub fn decode_frame(&mut self) -> Result<&Frame, DecodeError> {
        if !self.header_parsed {
            return Err(DecodeError::InvalidParameter(
                "decode_frame called before decode_frame_header".to_string(),
            ));
        }
        self.header_parsed = false;

        let mbw = usize::from(self.mbwidth);
        let mbh = usize::from(self.mbheight);

        self.stats = FrameStats::default();
        self.macroblocks.clear();
        self.macroblocks.reserve(mbw * mbh);

        self.top.fill(PreviousMacroBlock::default());
        self.top_border_y.fill(127);
        self.top_border_u.fill(127);
        self.top_border_v.fill(127);

        self.mv_ctx.resize(mbw);

        for mby in 0..mbh {
            let p = mby % usize::from(self.num_partitions);
            self.left = PreviousMacroBlock::default();
            self.left_border_y.fill(129);
            self.left_border_u.fill(129);
            self.left_border_v.fill(129);

            for mbx in 0..mbw {
                let (mut mb, inter_mb) = self.read_macroblock_header(mbx, mby)?;

                let has_y2 = match &inter_mb {
                    Some(imb) => imb.mv_mode != MvMode::Split,
                    None => mb.luma_mode != LumaMode::B,
                };

                if !mb.coeffs_skipped {
                    self.read_residual_data(&mut mb, mbx, p, has_y2)?;
                } else {
                    // self.coeff_blocks is already zeros. The Y2 context
                    // is preserved for modes without a Y2 block.
                    if has_y2 {
                        self.left.complexity[0] = 0;
                        self.top[mbx].complexity[0] = 0;
                    }

                    for i in 1usize..9 {
                        self.left.complexity[i] = 0;
                        self.top[mbx].complexity[i] = 0;
                    }
                }

                self.reconstruct_macroblock(mbx, mby, &mb, inter_mb.as_ref());

                // Commit the motion state so the next macroblock and the
                // row below see this one as a neighbour.
                match &inter_mb {
                    Some(imb) => {
                        self.stats.inter_mbs += 1;
                        self.stats.mv_modes[imb.mv_mode as usize] += 1;
                        self.mv_ctx.commit(mbx, imb);
                    }
                    None => {
                        self.stats.intra_mbs += 1;
                        self.mv_ctx.commit(
                            mbx,
                            &InterMb {
                                ref_frame: RefFrame::Intra,
                                mv_mode: MvMode::Zero,
                                mv: MotionVector::ZERO,
                                sub_mvs: [MotionVector::ZERO; 16],
                            },
                        );
                    }
                }

                self.macroblocks.push(mb);
            }

            self.mv_ctx.end_row();
        }

        if self.filter_level > 0 {
            for mby in 0..mbh {
                for mbx in 0..mbw {
                    self.filter_macroblock(mbx, mby);
                }
            }
        }

        self.refresh_references();

        Ok(&self.frame)
    }
}
