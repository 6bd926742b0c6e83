//! Motion-compensated inter prediction (RFC 6386 section 14).
//!
//! Prediction is written into the reconstruction workspace regions
//! described in [`crate::common::prediction`]; residuals are added on top
//! afterwards. Luma uses the six-tap separable sub-pixel filter at
//! quarter-pixel precision, chroma the bilinear filter at eighth-pixel
//! precision.

#![allow(clippy::too_many_arguments)]

use super::motion::{InterMb, MotionVector, MvMode};
use super::vp8::Frame;
use crate::common::prediction::{
    Workspace, WS_B_X, WS_B_Y, WS_R_X, WS_R_Y, WS_STRIDE, WS_Y_X, WS_Y_Y,
};

// Section 14.4
// Six-tap filter coefficients for each eighth-pixel position. Quarter-pel
// motion only ever selects the even phases.
static SUBPEL_FILTER: [[i16; 6]; 8] = [
    [0, 0, 128, 0, 0, 0],
    [0, -6, 123, 12, -1, 0],
    [2, -11, 108, 36, -8, 1],
    [0, -9, 93, 50, -6, 0],
    [3, -16, 77, 77, -16, 3],
    [0, -6, 50, 93, -9, 0],
    [1, -8, 36, 108, -11, 2],
    [0, -1, 12, 123, -6, 0],
];

// Section 14.5
// Bilinear filter pairs for each eighth-pixel position.
static BILINEAR_FILTER: [[i16; 2]; 8] = [
    [128, 0],
    [112, 16],
    [96, 32],
    [80, 48],
    [64, 64],
    [48, 80],
    [32, 96],
    [16, 112],
];

fn clip255(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Splits a quarter-pixel displacement into a floored whole-pixel offset
/// and a fraction in 0..=3. Arithmetic shift right gives the floor, and
/// the two's-complement mask leaves the fraction positive for negative
/// displacements.
fn split_qpel(v: i32) -> (i32, i32) {
    (v >> 2, v & 3)
}

/// Same decomposition in eighth-pixel units, for chroma.
fn split_epel(v: i32) -> (i32, i32) {
    (v >> 3, v & 7)
}

/// Six-tap sub-pixel luma prediction for a `size` x `size` block
/// (16 for whole macroblocks, 4 for SPLITMV sub-blocks).
///
/// `base_x`/`base_y` is the block's position in the luma plane before the
/// motion vector is applied, `dst_x`/`dst_y` its top-left corner in the
/// workspace. Out-of-bounds source coordinates clamp to the frame
/// rectangle, not the padded stride.
pub(crate) fn predict_subpel_luma(
    ws: &mut Workspace,
    reference: &Frame,
    base_x: i32,
    base_y: i32,
    mv: MotionVector,
    dst_x: usize,
    dst_y: usize,
    size: usize,
) {
    let stride = reference.luma_stride();
    let max_x = i32::from(reference.width) - 1;
    let max_y = i32::from(reference.height) - 1;

    let (dx, frac_x) = split_qpel(i32::from(mv.x));
    let (dy, frac_y) = split_qpel(i32::from(mv.y));
    let src_x = base_x + dx;
    let src_y = base_y + dy;

    // Map the quarter-pel fraction onto the eighth-pel filter table.
    let filter_x = (frac_x * 2) as usize;
    let filter_y = (frac_y * 2) as usize;

    // Horizontal pass into 16-bit intermediates scaled by 128, with five
    // extra rows for the vertical taps.
    let mut temp = [[0i16; 16]; 21];

    for row in -2..size as i32 + 3 {
        let sy = (src_y + row).clamp(0, max_y) as usize;
        let src_row = &reference.ybuf[sy * stride..][..stride];

        for col in 0..size {
            let value = if filter_x == 0 {
                let sx = (src_x + col as i32).clamp(0, max_x) as usize;
                i32::from(src_row[sx]) << 7
            } else {
                let flt = &SUBPEL_FILTER[filter_x];
                let mut sum = 0i32;
                for (t, &coeff) in flt.iter().enumerate() {
                    let sx = (src_x + col as i32 + t as i32 - 2).clamp(0, max_x) as usize;
                    sum += i32::from(coeff) * i32::from(src_row[sx]);
                }
                sum
            };
            temp[(row + 2) as usize][col] = value as i16;
        }
    }

    // Vertical pass.
    for row in 0..size {
        for col in 0..size {
            let val = if filter_y == 0 {
                (i32::from(temp[row + 2][col]) + 64) >> 7
            } else {
                let flt = &SUBPEL_FILTER[filter_y];
                let mut sum = 0i32;
                for (t, &coeff) in flt.iter().enumerate() {
                    sum += i32::from(coeff) * i32::from(temp[row + t][col]);
                }
                (sum + 8192) >> 14
            };
            ws[(dst_y + row) * WS_STRIDE + dst_x + col] = clip255(val);
        }
    }
}

/// Bilinear prediction of a `size` x `size` block in one chroma plane.
/// The x clamp uses the padded plane stride and the y clamp the padded
/// plane height, matching the layout the planes are stored with.
fn predict_bilinear_chroma_plane(
    ws: &mut Workspace,
    plane: &[u8],
    stride: usize,
    src_x: i32,
    src_y: i32,
    frac_x: usize,
    frac_y: usize,
    dst_x: usize,
    dst_y: usize,
    size: usize,
) {
    let plane_height = plane.len() / stride;
    let max_x = (stride - 1) as i32;
    let max_y = (plane_height - 1) as i32;

    let flt_x = &BILINEAR_FILTER[frac_x];
    let flt_y = &BILINEAR_FILTER[frac_y];

    for row in 0..size {
        let y0 = (src_y + row as i32).clamp(0, max_y) as usize;
        let y1 = (src_y + row as i32 + 1).clamp(0, max_y) as usize;

        for col in 0..size {
            let x0 = (src_x + col as i32).clamp(0, max_x) as usize;
            let x1 = (src_x + col as i32 + 1).clamp(0, max_x) as usize;

            let p00 = i32::from(plane[y0 * stride + x0]);
            let p01 = i32::from(plane[y0 * stride + x1]);
            let p10 = i32::from(plane[y1 * stride + x0]);
            let p11 = i32::from(plane[y1 * stride + x1]);

            let h0 = (p00 * i32::from(flt_x[0]) + p01 * i32::from(flt_x[1]) + 64) >> 7;
            let h1 = (p10 * i32::from(flt_x[0]) + p11 * i32::from(flt_x[1]) + 64) >> 7;
            let val = (h0 * i32::from(flt_y[0]) + h1 * i32::from(flt_y[1]) + 64) >> 7;

            ws[(dst_y + row) * WS_STRIDE + dst_x + col] = clip255(val);
        }
    }
}

/// Bilinear chroma prediction for both planes of one block. The luma MV
/// is reinterpreted: halving a quarter-pel luma vector gives an
/// eighth-pel chroma vector on the subsampled plane.
pub(crate) fn predict_chroma_block(
    ws: &mut Workspace,
    reference: &Frame,
    base_x: i32,
    base_y: i32,
    mv: MotionVector,
    dst_col: usize,
    dst_row: usize,
    size: usize,
) {
    let stride = reference.chroma_stride();

    let (dx, frac_x) = split_epel(i32::from(mv.x));
    let (dy, frac_y) = split_epel(i32::from(mv.y));
    let src_x = base_x + dx;
    let src_y = base_y + dy;

    predict_bilinear_chroma_plane(
        ws,
        &reference.ubuf,
        stride,
        src_x,
        src_y,
        frac_x as usize,
        frac_y as usize,
        WS_B_X + dst_col,
        WS_B_Y + dst_row,
        size,
    );
    predict_bilinear_chroma_plane(
        ws,
        &reference.vbuf,
        stride,
        src_x,
        src_y,
        frac_x as usize,
        frac_y as usize,
        WS_R_X + dst_col,
        WS_R_Y + dst_row,
        size,
    );
}

/// Copies the macroblock's 16x16 luma and 8x8 chroma regions from the
/// reference with a whole-pixel offset, clamping to the frame edges.
fn copy_ref_block(
    ws: &mut Workspace,
    reference: &Frame,
    mbx: usize,
    mby: usize,
    offset_x: i32,
    offset_y: i32,
) {
    let y_stride = reference.luma_stride();
    let max_x = i32::from(reference.width) - 1;
    let max_y = i32::from(reference.height) - 1;

    for row in 0..16 {
        let sy = (mby as i32 * 16 + row as i32 + offset_y).clamp(0, max_y) as usize;
        for col in 0..16 {
            let sx = (mbx as i32 * 16 + col as i32 + offset_x).clamp(0, max_x) as usize;
            ws[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X + col] = reference.ybuf[sy * y_stride + sx];
        }
    }

    let c_stride = reference.chroma_stride();
    let max_cx = i32::from(reference.width) / 2 - 1;
    let max_cy = i32::from(reference.height) / 2 - 1;
    let c_offset_x = offset_x / 2;
    let c_offset_y = offset_y / 2;

    for row in 0..8 {
        let sy = (mby as i32 * 8 + row as i32 + c_offset_y).clamp(0, max_cy.max(0)) as usize;
        for col in 0..8 {
            let sx = (mbx as i32 * 8 + col as i32 + c_offset_x).clamp(0, max_cx.max(0)) as usize;
            ws[(WS_B_Y + row) * WS_STRIDE + WS_B_X + col] = reference.ubuf[sy * c_stride + sx];
            ws[(WS_R_Y + row) * WS_STRIDE + WS_R_X + col] = reference.vbuf[sy * c_stride + sx];
        }
    }
}

/// Fills the prediction regions with the midpoint value. Used when an
/// inter macroblock names a reference frame that was never stored.
fn fill_midpoint(ws: &mut Workspace) {
    for row in 0..16 {
        ws[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X..][..16].fill(128);
    }
    for row in 0..8 {
        ws[(WS_B_Y + row) * WS_STRIDE + WS_B_X..][..8].fill(128);
        ws[(WS_R_Y + row) * WS_STRIDE + WS_R_X..][..8].fill(128);
    }
}

/// SPLITMV prediction: sixteen 4x4 luma blocks with individual vectors,
/// and four 4x4 chroma blocks whose vectors are the rounded average of
/// the four luma sub-blocks they cover.
fn predict_split(ws: &mut Workspace, reference: &Frame, mb: &InterMb, mbx: usize, mby: usize) {
    for (block, &mv) in mb.sub_mvs.iter().enumerate() {
        let block_row = block / 4;
        let block_col = block % 4;

        predict_subpel_luma(
            ws,
            reference,
            (mbx * 16 + block_col * 4) as i32,
            (mby * 16 + block_row * 4) as i32,
            mv,
            WS_Y_X + block_col * 4,
            WS_Y_Y + block_row * 4,
            4,
        );
    }

    for chroma_row in 0..2 {
        for chroma_col in 0..2 {
            let mut sum_x = 0i32;
            let mut sum_y = 0i32;
            for dy in 0..2 {
                for dx in 0..2 {
                    let block = (chroma_row * 2 + dy) * 4 + chroma_col * 2 + dx;
                    sum_x += i32::from(mb.sub_mvs[block].x);
                    sum_y += i32::from(mb.sub_mvs[block].y);
                }
            }
            let avg = MotionVector {
                x: ((sum_x + 2) >> 2) as i16,
                y: ((sum_y + 2) >> 2) as i16,
            };

            predict_chroma_block(
                ws,
                reference,
                (mbx * 8 + chroma_col * 4) as i32,
                (mby * 8 + chroma_row * 4) as i32,
                avg,
                chroma_col * 4,
                chroma_row * 4,
                4,
            );
        }
    }
}

/// Motion-compensated prediction for one macroblock, written into the
/// workspace. Returns false when the reference frame is missing and the
/// prediction was substituted with the midpoint constant.
pub(crate) fn predict_inter(
    ws: &mut Workspace,
    reference: Option<&Frame>,
    mb: &InterMb,
    mbx: usize,
    mby: usize,
) -> bool {
    let Some(reference) = reference else {
        fill_midpoint(ws);
        return false;
    };

    if mb.mv_mode == MvMode::Split {
        predict_split(ws, reference, mb, mbx, mby);
        return true;
    }

    let mv = mb.mv;
    if mv.is_zero() {
        copy_ref_block(ws, reference, mbx, mby, 0, 0);
    } else if mv.x & 3 == 0 && mv.y & 3 == 0 {
        copy_ref_block(
            ws,
            reference,
            mbx,
            mby,
            i32::from(mv.x) >> 2,
            i32::from(mv.y) >> 2,
        );
    } else {
        predict_subpel_luma(
            ws,
            reference,
            (mbx * 16) as i32,
            (mby * 16) as i32,
            mv,
            WS_Y_X,
            WS_Y_Y,
            16,
        );
        predict_chroma_block(
            ws,
            reference,
            (mbx * 8) as i32,
            (mby * 8) as i32,
            mv,
            0,
            0,
            8,
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::prediction::WS_SIZE;

    fn gradient_frame(width: u16, height: u16) -> Frame {
        let mut frame = Frame::new(width, height);
        let stride = frame.luma_stride();
        for y in 0..frame.buffer_height() {
            for x in 0..stride {
                frame.ybuf[y * stride + x] = ((x * 7 + y * 3) % 251) as u8;
            }
        }
        let c_stride = frame.chroma_stride();
        for y in 0..frame.buffer_height() / 2 {
            for x in 0..c_stride {
                frame.ubuf[y * c_stride + x] = ((x * 5 + y) % 241) as u8;
                frame.vbuf[y * c_stride + x] = ((x + y * 11) % 239) as u8;
            }
        }
        frame
    }

    fn mv(x: i16, y: i16) -> MotionVector {
        MotionVector { x, y }
    }

    #[test]
    fn test_filter_identity_phase() {
        // Phase 0 is (0, 0, 128, 0, 0, 0): convolving and shifting by 7
        // must reproduce the input exactly.
        assert_eq!(SUBPEL_FILTER[0], [0, 0, 128, 0, 0, 0]);
        assert_eq!(BILINEAR_FILTER[0], [128, 0]);

        for v in [0u8, 1, 127, 128, 254, 255] {
            let shifted = i32::from(v) << 7;
            assert_eq!((shifted + 64) >> 7, i32::from(v));
        }
    }

    #[test]
    fn test_integer_mv_matches_copy() {
        let reference = gradient_frame(64, 48);
        let mut by_filter = [0u8; WS_SIZE];
        let mut by_copy = [0u8; WS_SIZE];

        // (-8, 4) quarter-pel = (-2, 1) whole-pel.
        predict_subpel_luma(&mut by_filter, &reference, 16, 16, mv(-8, 4), WS_Y_X, WS_Y_Y, 16);
        copy_ref_block(&mut by_copy, &reference, 1, 1, -2, 1);

        for row in 0..16 {
            let a = &by_filter[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X..][..16];
            let b = &by_copy[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X..][..16];
            assert_eq!(a, b, "row {row}");
        }
    }

    #[test]
    fn test_quarter_pel_applies_filter() {
        // A constant-gradient row: every output pixel must equal the
        // six-tap filter applied to the neighbourhood with phase 2
        // (mvx = 1 quarter-pel).
        let mut reference = Frame::new(64, 48);
        let stride = reference.luma_stride();
        for y in 0..reference.buffer_height() {
            for x in 0..stride {
                reference.ybuf[y * stride + x] = (40 + x * 2) as u8;
            }
        }

        let mut ws = [0u8; WS_SIZE];
        predict_subpel_luma(&mut ws, &reference, 16, 16, mv(1, 0), WS_Y_X, WS_Y_Y, 16);

        let flt = &SUBPEL_FILTER[2];
        for col in 0..16 {
            let mut sum = 0i32;
            for (t, &coeff) in flt.iter().enumerate() {
                let x = 16 + col + t - 2;
                sum += i32::from(coeff) * i32::from(reference.ybuf[16 * stride + x]);
            }
            let expected = ((sum + 64) >> 7).clamp(0, 255) as u8;
            assert_eq!(ws[WS_Y_Y * WS_STRIDE + WS_Y_X + col], expected, "col {col}");
        }
    }

    #[test]
    fn test_zero_mv_copy_roundtrip() {
        let reference = gradient_frame(32, 32);
        let mut ws = [0u8; WS_SIZE];
        copy_ref_block(&mut ws, &reference, 1, 1, 0, 0);

        let stride = reference.luma_stride();
        for row in 0..16 {
            for col in 0..16 {
                assert_eq!(
                    ws[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X + col],
                    reference.ybuf[(16 + row) * stride + 16 + col]
                );
            }
        }
    }

    #[test]
    fn test_edge_clamp_extends_border() {
        let reference = gradient_frame(32, 32);
        let mut ws = [0u8; WS_SIZE];

        // Large negative offset: every source coordinate clamps to (0, 0).
        copy_ref_block(&mut ws, &reference, 0, 0, -64, -64);
        let corner = reference.ybuf[0];
        for row in 0..16 {
            for col in 0..16 {
                assert_eq!(ws[(WS_Y_Y + row) * WS_STRIDE + WS_Y_X + col], corner);
            }
        }
    }

    #[test]
    fn test_missing_reference_fills_midpoint() {
        let mb = InterMb {
            ref_frame: super::super::motion::RefFrame::Golden,
            mv_mode: MvMode::Zero,
            mv: MotionVector::ZERO,
            sub_mvs: [MotionVector::ZERO; 16],
        };
        let mut ws = [0u8; WS_SIZE];
        assert!(!predict_inter(&mut ws, None, &mb, 0, 0));
        assert_eq!(ws[WS_Y_Y * WS_STRIDE + WS_Y_X], 128);
        assert_eq!(ws[(WS_B_Y + 7) * WS_STRIDE + WS_B_X + 7], 128);
        assert_eq!(ws[(WS_R_Y + 7) * WS_STRIDE + WS_R_X + 7], 128);
    }

    #[test]
    fn test_chroma_average_of_equal_sub_mvs_is_identity() {
        // If all four luma sub-MVs in a quadrant equal M, the averaged
        // chroma MV equals M.
        let m = mv(-10, 6);
        let sum_x = 4 * i32::from(m.x);
        let sum_y = 4 * i32::from(m.y);
        assert_eq!(((sum_x + 2) >> 2) as i16, m.x);
        assert_eq!(((sum_y + 2) >> 2) as i16, m.y);
    }

    #[test]
    fn test_split_representative_uses_last_block() {
        let reference = gradient_frame(64, 48);
        let mut sub_mvs = [mv(4, 0); 16];
        sub_mvs[15] = mv(8, 4);
        let mb = InterMb {
            ref_frame: super::super::motion::RefFrame::Last,
            mv_mode: MvMode::Split,
            mv: sub_mvs[15],
            sub_mvs,
        };
        let mut ws = [0u8; WS_SIZE];
        assert!(predict_inter(&mut ws, Some(&reference), &mb, 1, 1));
        assert_eq!(mb.mv, mb.sub_mvs[15]);
    }
}
