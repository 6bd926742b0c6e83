//! Motion-vector decoding and prediction for inter frames
//! (RFC 6386 sections 16 and 17).
//!
//! This module covers everything between the boolean decoder and motion
//! compensation: per-frame MV probability updates, decoding of single MV
//! components, the left/above/above-left neighbour context, nearest/near
//! candidate selection with sign-bias correction, and the per-macroblock
//! inter mode parse including SPLITMV partitioning.

use alloc::vec;
use alloc::vec::Vec;

use super::bit_reader::BoolReader;
use crate::common::types::Prob;

/// Reference frame tag carried by every inter macroblock.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefFrame {
    /// Intra-coded; no motion vector is associated.
    #[default]
    Intra = 0,
    /// The previously decoded frame.
    Last = 1,
    /// The golden reference frame.
    Golden = 2,
    /// The alternate reference frame.
    Altref = 3,
}

/// Macroblock-level motion-vector mode (RFC 6386 section 16.1).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MvMode {
    /// Use the nearest candidate motion vector.
    Nearest = 0,
    /// Use the near candidate motion vector.
    Near = 1,
    /// Use the zero motion vector.
    Zero = 2,
    /// Read a new motion vector from the bitstream.
    New = 3,
    /// Split mode: 4x4 sub-blocks carry individual motion vectors.
    Split = 4,
}

/// A motion vector in quarter-pixel luma units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MotionVector {
    /// Horizontal displacement.
    pub x: i16,
    /// Vertical displacement.
    pub y: i16,
}

impl MotionVector {
    /// The zero motion vector.
    pub const ZERO: MotionVector = MotionVector { x: 0, y: 0 };

    /// True for the zero motion vector.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }
}

impl core::ops::Add for MotionVector {
    type Output = MotionVector;

    fn add(self, rhs: MotionVector) -> MotionVector {
        // Hostile streams can push the sum past i16.
        MotionVector {
            x: self.x.saturating_add(rhs.x),
            y: self.y.saturating_add(rhs.y),
        }
    }
}

impl core::ops::Neg for MotionVector {
    type Output = MotionVector;

    fn neg(self) -> MotionVector {
        MotionVector {
            x: -self.x,
            y: -self.y,
        }
    }
}

// Section 17.2
// Default probabilities for the two MV components; entry 0 is the
// short/long selector, entry 1 the sign, 2..=8 the short tree and
// 9..=18 the long-path bits.
#[doc(hidden)]
pub static DEFAULT_MV_PROBS: [[Prob; 19]; 2] = [
    // Vertical (row) component
    [
        162, 128, 225, 146, 172, 147, 214, 39, 156, 128, 129, 132, 75, 145, 178, 206, 239, 254,
        254,
    ],
    // Horizontal (column) component
    [
        164, 128, 204, 170, 119, 235, 140, 230, 228, 128, 130, 130, 74, 148, 180, 203, 236, 254,
        254,
    ],
];

// Probability that each MV probability is replaced this frame.
#[doc(hidden)]
pub static MV_UPDATE_PROBS: [[Prob; 19]; 2] = [
    [
        237, 246, 253, 253, 254, 254, 254, 254, 254, 254, 254, 254, 254, 254, 250, 250, 252, 254,
        254,
    ],
    [
        231, 243, 245, 253, 254, 254, 254, 254, 254, 254, 254, 254, 254, 254, 251, 251, 254, 254,
        254,
    ],
];

// Indices into an MV probability vector.
const MVP_IS_SHORT: usize = 0;
const MVP_SIGN: usize = 1;
const MVP_SHORT: usize = 2;
const MVP_BITS: usize = 9;

// Section 16.1
// MV mode probabilities, indexed by [nearest is zero][near is zero].
static MV_MODE_PROBS: [[[Prob; 4]; 2]; 2] = [
    [[7, 1, 1, 143], [14, 18, 14, 107]],
    [[135, 145, 67, 106], [8, 75, 40, 155]],
];

// Sub-MV mode probabilities, indexed by the left/above context.
static SUB_MV_REF_PROBS: [[Prob; 3]; 5] = [
    [147, 136, 18],
    [106, 145, 1],
    [179, 121, 1],
    [223, 1, 34],
    [208, 1, 1],
];

// SPLITMV partition-type probabilities.
static MB_SPLIT_PROBS: [Prob; 3] = [110, 111, 150];

// SPLITMV partition shapes. For each shape, the 4x4 luma blocks covered
// by each partition, in raster order.
static MB_SPLIT_BLOCKS: [&[&[usize]]; 4] = [
    // 16x8: top half, bottom half
    &[&[0, 1, 2, 3, 4, 5, 6, 7], &[8, 9, 10, 11, 12, 13, 14, 15]],
    // 8x16: left half, right half
    &[&[0, 1, 4, 5, 8, 9, 12, 13], &[2, 3, 6, 7, 10, 11, 14, 15]],
    // 8x8 quadrants
    &[&[0, 1, 4, 5], &[2, 3, 6, 7], &[8, 9, 12, 13], &[10, 11, 14, 15]],
    // 4x4: each block individually
    &[
        &[0],
        &[1],
        &[2],
        &[3],
        &[4],
        &[5],
        &[6],
        &[7],
        &[8],
        &[9],
        &[10],
        &[11],
        &[12],
        &[13],
        &[14],
        &[15],
    ],
];

const SPLIT_16X8: usize = 0;
const SPLIT_8X16: usize = 1;
const SPLIT_8X8: usize = 2;
const SPLIT_4X4: usize = 3;

/// Parses the per-frame MV probability updates (RFC 6386 section 17.2).
/// A decoded replacement of zero is promoted to one; probabilities of
/// zero are forbidden.
pub(crate) fn update_mv_probs(b: &mut BoolReader, mv_probs: &mut [[Prob; 19]; 2]) {
    for (probs, update_probs) in mv_probs.iter_mut().zip(MV_UPDATE_PROBS.iter()) {
        for (prob, &update_prob) in probs.iter_mut().zip(update_probs.iter()) {
            if b.read_bool(update_prob) {
                let v = (b.read_uint(128, 7) as u8) << 1;
                *prob = if v == 0 { 1 } else { v };
            }
        }
    }
}

/// Reads a single motion vector component in whole-pixel units
/// (RFC 6386 section 17.1).
fn read_mv_component(b: &mut BoolReader, p: &[Prob; 19]) -> i16 {
    let mut mag: i16;

    if b.read_bool(p[MVP_IS_SHORT]) {
        // Long path: three high bits at positions 9, 8, 7, then seven low
        // bits at positions 6 down to 0, then the minimum long magnitude.
        mag = 0;
        for i in 0..3 {
            if b.read_bool(p[MVP_BITS + i]) {
                mag |= 1 << (9 - i);
            }
        }
        for i in 0..7 {
            if b.read_bool(p[MVP_BITS + 3 + i]) {
                mag |= 1 << (6 - i);
            }
        }
        mag += 8;
    } else {
        // Short path: tree over magnitudes 0..=7.
        if b.read_bool(p[MVP_SHORT]) {
            if b.read_bool(p[MVP_SHORT + 2]) {
                mag = 6 + b.read_bool(p[MVP_SHORT + 4]) as i16;
            } else {
                mag = 4 + b.read_bool(p[MVP_SHORT + 3]) as i16;
            }
        } else if b.read_bool(p[MVP_SHORT + 1]) {
            mag = 2 + b.read_bool(p[MVP_SHORT + 5]) as i16;
        } else {
            mag = b.read_bool(p[MVP_SHORT + 6]) as i16;
        }
    }

    if mag != 0 && b.read_bool(p[MVP_SIGN]) {
        mag = -mag;
    }
    mag
}

/// Reads a full motion vector. Component 0 is vertical, component 1
/// horizontal; whole-pixel magnitudes are scaled to quarter-pixel units.
pub(crate) fn read_mv(b: &mut BoolReader, mv_probs: &[[Prob; 19]; 2]) -> MotionVector {
    let y = read_mv_component(b, &mv_probs[0]) * 4;
    let x = read_mv_component(b, &mv_probs[1]) * 4;
    MotionVector { x, y }
}

/// Clamps a motion vector so the reference block stays within one
/// macroblock plus a 16-pixel margin of the frame (RFC 6386 section
/// 16.2). All arithmetic is done in i32 before narrowing.
pub(crate) fn clamp_mv(
    mv: MotionVector,
    mbx: usize,
    mby: usize,
    mbw: usize,
    mbh: usize,
) -> MotionVector {
    let margin = 16 * 4;

    let min_x = (-(mbx as i32) * 16 - 16) * 4 - margin;
    let max_x = (mbw as i32 - mbx as i32) * 16 * 4 + margin;
    let min_y = (-(mby as i32) * 16 - 16) * 4 - margin;
    let max_y = (mbh as i32 - mby as i32) * 16 * 4 + margin;

    MotionVector {
        x: i32::from(mv.x).clamp(min_x, max_x) as i16,
        y: i32::from(mv.y).clamp(min_y, max_y) as i16,
    }
}

/// Per-macroblock motion state committed to the neighbour context and
/// consumed by the inter-prediction dispatcher.
#[derive(Clone, Copy, Debug)]
pub(crate) struct InterMb {
    pub ref_frame: RefFrame,
    pub mv_mode: MvMode,
    /// The macroblock-level motion vector; for SPLITMV this is the
    /// bottom-right sub-block's vector.
    pub mv: MotionVector,
    /// One vector per 4x4 luma block in raster order. For non-split
    /// modes every entry equals `mv`.
    pub sub_mvs: [MotionVector; 16],
}

/// Spatial neighbour state feeding MV prediction: one slot per column for
/// the row above, a single slot for the macroblock to the left, and the
/// stale above row serving as the above-left neighbour.
pub(crate) struct MvContext {
    above_ref: Vec<RefFrame>,
    above_mv: Vec<MotionVector>,
    above_sub: Vec<[MotionVector; 16]>,

    left_ref: RefFrame,
    left_mv: MotionVector,
    left_sub: [MotionVector; 16],

    up_ref: Vec<RefFrame>,
    up_mv: Vec<MotionVector>,
}

impl MvContext {
    pub(crate) fn new() -> Self {
        Self {
            above_ref: Vec::new(),
            above_mv: Vec::new(),
            above_sub: Vec::new(),
            left_ref: RefFrame::Intra,
            left_mv: MotionVector::ZERO,
            left_sub: [MotionVector::ZERO; 16],
            up_ref: Vec::new(),
            up_mv: Vec::new(),
        }
    }

    /// Sizes the per-column arrays for a frame `mbw` macroblocks wide,
    /// zeroing them. Out-of-frame neighbours always read as intra, so
    /// stale state from a previous frame of the same size is harmless.
    pub(crate) fn resize(&mut self, mbw: usize) {
        if self.above_ref.len() != mbw {
            self.above_ref = vec![RefFrame::Intra; mbw];
            self.above_mv = vec![MotionVector::ZERO; mbw];
            self.above_sub = vec![[MotionVector::ZERO; 16]; mbw];
            self.up_ref = vec![RefFrame::Intra; mbw];
            self.up_mv = vec![MotionVector::ZERO; mbw];
        }
        self.left_ref = RefFrame::Intra;
        self.left_mv = MotionVector::ZERO;
        self.left_sub = [MotionVector::ZERO; 16];
    }

    /// Commits a decoded macroblock's motion state so the next macroblock
    /// (and the row below) see it as a neighbour. Intra macroblocks commit
    /// `RefFrame::Intra` with zero vectors.
    pub(crate) fn commit(&mut self, mbx: usize, mb: &InterMb) {
        self.above_ref[mbx] = mb.ref_frame;
        self.above_mv[mbx] = mb.mv;
        self.above_sub[mbx] = mb.sub_mvs;

        self.left_ref = mb.ref_frame;
        self.left_mv = mb.mv;
        self.left_sub = mb.sub_mvs;
    }

    /// Called after the last macroblock of a row: resets the left slot and
    /// rotates the now-stale above row into the above-left slots.
    pub(crate) fn end_row(&mut self) {
        self.left_ref = RefFrame::Intra;
        self.left_mv = MotionVector::ZERO;
        self.left_sub = [MotionVector::ZERO; 16];

        self.up_ref.copy_from_slice(&self.above_ref);
        self.up_mv.copy_from_slice(&self.above_mv);
    }

    /// Produces the (nearest, near) candidate pair for the macroblock at
    /// `(mbx, mby)` predicting from `ref_frame`.
    ///
    /// Neighbours are inspected in the order left, above, above-left;
    /// intra neighbours are skipped, and a candidate whose reference has
    /// the opposite sign bias is negated. `nearest` is the first non-zero
    /// candidate and `near` the first subsequent non-zero candidate that
    /// differs from it; unset outputs stay zero. This is the simplified
    /// first-match rule rather than the RFC 6386 section 16.2 counting
    /// tree.
    pub(crate) fn find_best_mv(
        &self,
        mbx: usize,
        mby: usize,
        ref_frame: RefFrame,
        sign_bias: &[bool; 4],
    ) -> (MotionVector, MotionVector) {
        let mut candidates = [(MotionVector::ZERO, RefFrame::Intra); 3];
        let mut n = 0;

        if mbx > 0 && self.left_ref != RefFrame::Intra {
            candidates[n] = (self.left_mv, self.left_ref);
            n += 1;
        }
        if mby > 0 && self.above_ref[mbx] != RefFrame::Intra {
            candidates[n] = (self.above_mv[mbx], self.above_ref[mbx]);
            n += 1;
        }
        if mbx > 0 && mby > 0 && self.up_ref[mbx - 1] != RefFrame::Intra {
            candidates[n] = (self.up_mv[mbx - 1], self.up_ref[mbx - 1]);
            n += 1;
        }

        let ref_bias = sign_bias[ref_frame as usize];
        let mut nearest = MotionVector::ZERO;
        let mut near = MotionVector::ZERO;

        for &(mut mv, cand_ref) in &candidates[..n] {
            if sign_bias[cand_ref as usize] != ref_bias {
                mv = -mv;
            }
            if mv.is_zero() {
                continue;
            }
            if nearest.is_zero() {
                nearest = mv;
            } else if near.is_zero() && mv != nearest {
                near = mv;
            }
        }

        (nearest, near)
    }

    /// The sub-MVs along the right edge of the left macroblock (blocks
    /// 3, 7, 11, 15), or zeros when that macroblock is intra or outside
    /// the frame.
    fn left_edge_sub_mvs(&self, mbx: usize) -> [MotionVector; 4] {
        let mut edge = [MotionVector::ZERO; 4];
        if mbx > 0 && self.left_ref != RefFrame::Intra {
            for (row, mv) in edge.iter_mut().enumerate() {
                *mv = self.left_sub[row * 4 + 3];
            }
        }
        edge
    }

    /// The sub-MVs along the bottom edge of the above macroblock (blocks
    /// 12..=15), or zeros when that macroblock is intra or outside the
    /// frame.
    fn above_edge_sub_mvs(&self, mbx: usize, mby: usize) -> [MotionVector; 4] {
        let mut edge = [MotionVector::ZERO; 4];
        if mby > 0 && self.above_ref[mbx] != RefFrame::Intra {
            edge.copy_from_slice(&self.above_sub[mbx][12..16]);
        }
        edge
    }
}

/// Frame-level parameters the inter mode parser needs.
pub(crate) struct InterParams<'a> {
    pub prob_last: Prob,
    pub prob_gf: Prob,
    pub sign_bias: [bool; 4],
    pub mv_probs: &'a [[Prob; 19]; 2],
    pub mbw: usize,
    pub mbh: usize,
}

/// Parses the mode of an inter-coded macroblock: reference frame, MV mode
/// and the macroblock MV (or the 16 sub-block MVs for SPLITMV). The
/// caller has already consumed the intra/inter bit.
pub(crate) fn parse_inter_mb(
    b: &mut BoolReader,
    params: &InterParams<'_>,
    ctx: &MvContext,
    mbx: usize,
    mby: usize,
) -> InterMb {
    // Reference frame tree: LAST, then GOLDEN vs ALTREF.
    let ref_frame = if !b.read_bool(params.prob_last) {
        RefFrame::Last
    } else if !b.read_bool(params.prob_gf) {
        RefFrame::Golden
    } else {
        RefFrame::Altref
    };

    let (nearest, near) = ctx.find_best_mv(mbx, mby, ref_frame, &params.sign_bias);

    let prob = MV_MODE_PROBS[nearest.is_zero() as usize][near.is_zero() as usize];

    let (mv_mode, mv) = if !b.read_bool(prob[0]) {
        (MvMode::Zero, MotionVector::ZERO)
    } else if !b.read_bool(prob[1]) {
        (
            MvMode::Nearest,
            clamp_mv(nearest, mbx, mby, params.mbw, params.mbh),
        )
    } else if !b.read_bool(prob[2]) {
        (
            MvMode::Near,
            clamp_mv(near, mbx, mby, params.mbw, params.mbh),
        )
    } else if !b.read_bool(prob[3]) {
        let delta = read_mv(b, params.mv_probs);
        (
            MvMode::New,
            clamp_mv(nearest + delta, mbx, mby, params.mbw, params.mbh),
        )
    } else {
        let sub_mvs = parse_split_mv(b, params, ctx, nearest, mbx, mby);
        return InterMb {
            ref_frame,
            mv_mode: MvMode::Split,
            // Neighbour prediction uses the bottom-right sub-block as the
            // macroblock's representative vector.
            mv: sub_mvs[15],
            sub_mvs,
        };
    };

    InterMb {
        ref_frame,
        mv_mode,
        mv,
        sub_mvs: [mv; 16],
    }
}

/// Context for the sub-MV mode probabilities: 4 if left and above agree,
/// 3 if both are zero, 2 if above is zero, 1 if left is zero, 0 otherwise.
fn sub_mv_context(left: MotionVector, above: MotionVector) -> usize {
    if left == above {
        4
    } else if left.is_zero() && above.is_zero() {
        3
    } else if above.is_zero() {
        2
    } else if left.is_zero() {
        1
    } else {
        0
    }
}

/// Parses SPLITMV: partition shape, then one MV mode per partition, each
/// assigned to every 4x4 block the partition covers.
fn parse_split_mv(
    b: &mut BoolReader,
    params: &InterParams<'_>,
    ctx: &MvContext,
    nearest: MotionVector,
    mbx: usize,
    mby: usize,
) -> [MotionVector; 16] {
    let split_type = if !b.read_bool(MB_SPLIT_PROBS[0]) {
        SPLIT_4X4
    } else if !b.read_bool(MB_SPLIT_PROBS[1]) {
        SPLIT_8X8
    } else if !b.read_bool(MB_SPLIT_PROBS[2]) {
        SPLIT_16X8
    } else {
        SPLIT_8X16
    };

    let left_edge = ctx.left_edge_sub_mvs(mbx);
    let above_edge = ctx.above_edge_sub_mvs(mbx, mby);

    let mut sub_mvs = [MotionVector::ZERO; 16];

    for blocks in MB_SPLIT_BLOCKS[split_type] {
        let first = blocks[0];
        let block_row = first / 4;
        let block_col = first % 4;

        let left_mv = if block_col == 0 {
            left_edge[block_row]
        } else {
            sub_mvs[first - 1]
        };
        let above_mv = if block_row == 0 {
            above_edge[block_col]
        } else {
            sub_mvs[first - 4]
        };

        let prob = SUB_MV_REF_PROBS[sub_mv_context(left_mv, above_mv)];

        let mv = if !b.read_bool(prob[0]) {
            left_mv
        } else if !b.read_bool(prob[1]) {
            above_mv
        } else if !b.read_bool(prob[2]) {
            MotionVector::ZERO
        } else {
            nearest + read_mv(b, params.mv_probs)
        };

        let mv = clamp_mv(mv, mbx, mby, params.mbw, params.mbh);
        for &block in blocks.iter() {
            sub_mvs[block] = mv;
        }
    }

    sub_mvs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(x: i16, y: i16) -> MotionVector {
        MotionVector { x, y }
    }

    fn inter_mb(ref_frame: RefFrame, v: MotionVector) -> InterMb {
        InterMb {
            ref_frame,
            mv_mode: MvMode::New,
            mv: v,
            sub_mvs: [v; 16],
        }
    }

    #[test]
    fn test_clamp_mv_bounds() {
        // Top-left macroblock of an 8x8-MB frame.
        let clamped = clamp_mv(mv(i16::MIN, i16::MAX), 0, 0, 8, 8);
        assert_eq!(clamped.x, (-16 * 4 - 64) as i16);
        assert_eq!(clamped.y, (8 * 16 * 4 + 64) as i16);

        // An in-range vector is untouched.
        assert_eq!(clamp_mv(mv(12, -8), 3, 3, 8, 8), mv(12, -8));
    }

    #[test]
    fn test_no_inter_neighbours_yields_zero_candidates() {
        let mut ctx = MvContext::new();
        ctx.resize(4);
        let (nearest, near) = ctx.find_best_mv(2, 2, RefFrame::Last, &[false; 4]);
        assert!(nearest.is_zero());
        assert!(near.is_zero());
    }

    #[test]
    fn test_sign_bias_inverts_candidate() {
        // The above neighbour references golden with an opposite sign
        // bias; its vector must be negated, and near stays zero.
        let mut ctx = MvContext::new();
        ctx.resize(4);
        ctx.commit(1, &inter_mb(RefFrame::Golden, mv(8, 0)));
        ctx.end_row();

        let sign_bias = [false, false, true, false];
        let (nearest, near) = ctx.find_best_mv(1, 1, RefFrame::Last, &sign_bias);
        assert_eq!(nearest, mv(-8, 0));
        assert!(near.is_zero());
    }

    #[test]
    fn test_matching_sign_bias_keeps_candidate() {
        let mut ctx = MvContext::new();
        ctx.resize(4);
        ctx.commit(1, &inter_mb(RefFrame::Golden, mv(8, 4)));
        ctx.end_row();

        let (nearest, _) = ctx.find_best_mv(1, 1, RefFrame::Last, &[false; 4]);
        assert_eq!(nearest, mv(8, 4));
    }

    #[test]
    fn test_near_requires_distinct_nonzero() {
        let mut ctx = MvContext::new();
        ctx.resize(4);

        // Row 0: above neighbour for (1, 1).
        ctx.commit(1, &inter_mb(RefFrame::Last, mv(8, 0)));
        ctx.end_row();
        // Row 1: left neighbour of (1, 1).
        ctx.commit(0, &inter_mb(RefFrame::Last, mv(4, 0)));

        let (nearest, near) = ctx.find_best_mv(1, 1, RefFrame::Last, &[false; 4]);
        assert_eq!(nearest, mv(4, 0));
        assert_eq!(near, mv(8, 0));
    }

    #[test]
    fn test_duplicate_candidates_leave_near_zero() {
        let mut ctx = MvContext::new();
        ctx.resize(4);
        ctx.commit(1, &inter_mb(RefFrame::Last, mv(4, 0)));
        ctx.end_row();
        ctx.commit(0, &inter_mb(RefFrame::Last, mv(4, 0)));

        let (nearest, near) = ctx.find_best_mv(1, 1, RefFrame::Last, &[false; 4]);
        assert_eq!(nearest, mv(4, 0));
        assert!(near.is_zero());
    }

    #[test]
    fn test_neighbour_coherence_after_commit() {
        let mut ctx = MvContext::new();
        ctx.resize(4);
        let mb = inter_mb(RefFrame::Golden, mv(-12, 20));
        ctx.commit(2, &mb);

        assert_eq!(ctx.above_ref[2], RefFrame::Golden);
        assert_eq!(ctx.above_mv[2], mv(-12, 20));
        assert_eq!(ctx.left_mv, mv(-12, 20));
        assert_eq!(ctx.left_ref, RefFrame::Golden);

        ctx.end_row();
        assert_eq!(ctx.left_ref, RefFrame::Intra);
        assert_eq!(ctx.up_ref[2], RefFrame::Golden);
        assert_eq!(ctx.up_mv[2], mv(-12, 20));
    }

    #[test]
    fn test_sub_mv_context_ordering() {
        assert_eq!(sub_mv_context(mv(1, 1), mv(1, 1)), 4);
        assert_eq!(sub_mv_context(MotionVector::ZERO, MotionVector::ZERO), 4);
        assert_eq!(sub_mv_context(mv(1, 0), MotionVector::ZERO), 2);
        assert_eq!(sub_mv_context(MotionVector::ZERO, mv(1, 0)), 1);
        assert_eq!(sub_mv_context(mv(1, 0), mv(0, 1)), 0);
    }

    #[test]
    fn test_mv_component_roundtrip() {
        use super::super::bit_reader::test_encoder::BoolEncoder;
        use super::super::bit_reader::BoolReader;

        // Mirror of read_mv_component's layout: short tree for
        // magnitudes 0..=7, otherwise the long path's ten bit positions.
        fn write_component(e: &mut BoolEncoder, value: i16, p: &[Prob; 19]) {
            let mag = value.unsigned_abs();
            if mag <= 7 {
                e.write_bool(false, p[MVP_IS_SHORT]);
                let bits: [(bool, usize); 3] = match mag {
                    0 => [(false, 2), (false, 3), (false, 8)],
                    1 => [(false, 2), (false, 3), (true, 8)],
                    2 => [(false, 2), (true, 3), (false, 7)],
                    3 => [(false, 2), (true, 3), (true, 7)],
                    4 => [(true, 2), (false, 4), (false, 5)],
                    5 => [(true, 2), (false, 4), (true, 5)],
                    6 => [(true, 2), (true, 4), (false, 6)],
                    _ => [(true, 2), (true, 4), (true, 6)],
                };
                for (bit, idx) in bits {
                    e.write_bool(bit, p[idx]);
                }
            } else {
                e.write_bool(true, p[MVP_IS_SHORT]);
                let field = mag - 8;
                for i in 0..3 {
                    e.write_bool(field & (1 << (9 - i)) != 0, p[MVP_BITS + i]);
                }
                for i in 0..7 {
                    e.write_bool(field & (1 << (6 - i)) != 0, p[MVP_BITS + 3 + i]);
                }
            }
            if mag != 0 {
                e.write_bool(value < 0, p[MVP_SIGN]);
            }
        }

        let cases: &[(i16, i16)] = &[
            (0, 0),
            (1, 0),
            (0, -1),
            (7, -7),
            (8, 8),
            (-15, 33),
            (255, -255),
            (1031, -1031),
        ];

        let mut enc = BoolEncoder::new();
        for &(x, y) in cases {
            write_component(&mut enc, y, &DEFAULT_MV_PROBS[0]);
            write_component(&mut enc, x, &DEFAULT_MV_PROBS[1]);
        }

        let mut dec = BoolReader::new();
        dec.init(enc.flush()).unwrap();
        for &(x, y) in cases {
            let decoded = read_mv(&mut dec, &DEFAULT_MV_PROBS);
            // Components decode in whole pixels and scale to quarter-pel.
            assert_eq!(decoded, mv(x * 4, y * 4), "case ({x}, {y})");
        }
        assert!(dec.check(()).is_ok());
    }

    #[test]
    fn test_mv_prob_update_promotes_zero() {
        use super::super::bit_reader::test_encoder::BoolEncoder;
        use super::super::bit_reader::BoolReader;

        let mut enc = BoolEncoder::new();
        for (i, row) in MV_UPDATE_PROBS.iter().enumerate() {
            for (j, &update_prob) in row.iter().enumerate() {
                if i == 0 && j == 0 {
                    // Replace the first entry with a decoded zero, which
                    // must be promoted to one.
                    enc.write_bool(true, update_prob);
                    for _ in 0..7 {
                        enc.write_flag(false);
                    }
                } else if i == 1 && j == 2 {
                    // Replace another entry with 77 -> stored as 77 << 1.
                    enc.write_bool(true, update_prob);
                    enc.write_literal(7, 77);
                } else {
                    enc.write_bool(false, update_prob);
                }
            }
        }

        let mut dec = BoolReader::new();
        dec.init(enc.flush()).unwrap();

        let mut probs = DEFAULT_MV_PROBS;
        update_mv_probs(&mut dec, &mut probs);

        assert_eq!(probs[0][0], 1);
        assert_eq!(probs[1][2], 77 << 1);
        assert_eq!(probs[0][5], DEFAULT_MV_PROBS[0][5]);
        for row in &probs {
            for &p in row {
                assert!(p >= 1, "probability must stay in [1, 255]");
            }
        }
    }

    #[test]
    fn test_split_edge_sub_mvs() {
        let mut ctx = MvContext::new();
        ctx.resize(4);

        let mut mb = inter_mb(RefFrame::Last, mv(4, 0));
        mb.sub_mvs[3] = mv(16, 0);
        mb.sub_mvs[15] = mv(-16, 4);
        ctx.commit(0, &mb);

        let left = ctx.left_edge_sub_mvs(1);
        assert_eq!(left[0], mv(16, 0));
        assert_eq!(left[3], mv(-16, 4));

        // Column 0 has no left macroblock: all zero.
        let left0 = ctx.left_edge_sub_mvs(0);
        assert!(left0.iter().all(|m| m.is_zero()));
    }
}
