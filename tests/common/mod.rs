//! Shared support for the end-to-end decoder tests.
//!
//! No encoded fixtures ship with this repository, so the tests author
//! their own bitstreams: a boolean arithmetic encoder (a transcription of
//! the encoder given in RFC 6386 section 7.3) plus helpers that write
//! well-formed key and inter frame headers, macroblock modes, motion
//! vectors and DCT tokens.

#![allow(dead_code)]

use zenvp8::decoder::{COEFF_UPDATE_PROBS, DEFAULT_MV_PROBS, MV_UPDATE_PROBS, PROB_DCT_CAT};

/// The per-macroblock skip probability the inter-frame helpers write.
pub const P_SKIP: u8 = 200;

/// MV mode probabilities for a macroblock whose nearest and near
/// candidates are both zero.
pub const MV_MODE_PROBS_BOTH_ZERO: [u8; 4] = [8, 75, 40, 155];

/// MV mode probabilities when nearest is non-zero and near is zero.
pub const MV_MODE_PROBS_NEAR_ZERO: [u8; 4] = [14, 18, 14, 107];

/// SPLITMV partition-type probabilities.
pub const MB_SPLIT_PROBS: [u8; 3] = [110, 111, 150];

/// Sub-MV mode probabilities for the left==above context.
pub const SUB_MV_REF_PROBS_SAME: [u8; 3] = [208, 1, 1];

/// Boolean arithmetic encoder (RFC 6386 section 7.3).
pub struct BoolEncoder {
    writer: Vec<u8>,
    bottom: u32,
    range: u32,
    bit_num: i32,
}

impl Default for BoolEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BoolEncoder {
    pub fn new() -> Self {
        Self {
            writer: Vec::new(),
            bottom: 0,
            range: 255,
            bit_num: 24,
        }
    }

    // Carry propagation: add one to the output, handling 0xFF chains.
    fn add_one_to_output(&mut self) {
        let mut i = self.writer.len();
        while i > 0 {
            i -= 1;
            if self.writer[i] < 255 {
                self.writer[i] += 1;
                return;
            }
            self.writer[i] = 0;
        }
        self.writer.insert(0, 1);
    }

    pub fn write_bool(&mut self, value: bool, probability: u8) {
        let split = 1 + (((self.range - 1) * u32::from(probability)) >> 8);

        if value {
            self.bottom += split;
            self.range -= split;
        } else {
            self.range = split;
        }

        while self.range < 128 {
            self.range <<= 1;

            if self.bottom & (1 << 31) != 0 {
                self.add_one_to_output();
            }
            self.bottom <<= 1;

            self.bit_num -= 1;
            if self.bit_num == 0 {
                self.writer.push((self.bottom >> 24) as u8);
                self.bottom &= (1 << 24) - 1;
                self.bit_num = 8;
            }
        }
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bool(flag, 128);
    }

    pub fn write_literal(&mut self, num_bits: u8, value: u8) {
        for bit in (0..num_bits).rev() {
            self.write_bool((value >> bit) & 1 != 0, 128);
        }
    }

    /// Flushes any remaining bits and returns the encoded buffer.
    pub fn flush(mut self) -> Vec<u8> {
        let mut c = self.bit_num;
        let mut v = self.bottom;
        if self.bottom & (1 << (32 - self.bit_num)) != 0 {
            self.add_one_to_output();
        }
        v <<= c & 0b111;
        c = (c >> 3) - 1;
        while c >= 0 {
            v <<= 8;
            c -= 1;
        }
        c = 3;
        while c >= 0 {
            self.writer.push((v >> 24) as u8);
            v <<= 8;
            c -= 1;
        }
        self.writer
    }
}

/// Writes the "no update" bit for every token probability.
pub fn write_no_token_updates(e: &mut BoolEncoder) {
    for i in COEFF_UPDATE_PROBS.iter() {
        for j in i.iter() {
            for k in j.iter() {
                for &prob in k.iter() {
                    e.write_bool(false, prob);
                }
            }
        }
    }
}

/// Writes the "no update" bit for every MV probability.
pub fn write_no_mv_updates(e: &mut BoolEncoder) {
    for row in MV_UPDATE_PROBS.iter() {
        for &prob in row.iter() {
            e.write_bool(false, prob);
        }
    }
}

/// Quantizer block: y_ac index 0, no deltas.
pub fn write_quant_defaults(e: &mut BoolEncoder) {
    e.write_literal(7, 0);
    for _ in 0..5 {
        e.write_flag(false);
    }
}

/// The boolean-coded keyframe header used by every test stream: no
/// segmentation, loop filter off, one token partition, default
/// quantizers, no probability updates and no macroblock skipping.
/// Macroblock mode records follow directly.
pub fn write_keyframe_header(e: &mut BoolEncoder) {
    e.write_literal(1, 0); // colour space
    e.write_literal(1, 0); // clamping type
    e.write_flag(false); // segmentation disabled
    e.write_flag(false); // normal filter
    e.write_literal(6, 0); // filter level 0
    e.write_literal(3, 0); // sharpness
    e.write_flag(false); // no loop-filter adjustments
    e.write_literal(2, 0); // one DCT partition
    write_quant_defaults(e);
    e.write_literal(1, 0); // refresh entropy probs off
    write_no_token_updates(e);
    e.write_literal(1, 0); // mb_no_coeff_skip disabled
}

/// The boolean-coded inter-frame header used by the test streams: zero
/// sign biases, skipping enabled with [`P_SKIP`], and uniform
/// probabilities for the intra/last/golden decisions. Macroblock mode
/// records follow directly.
fn write_inter_header_with_refresh(e: &mut BoolEncoder, golden: bool, altref: bool) {
    e.write_flag(false); // segmentation disabled
    e.write_flag(false); // normal filter
    e.write_literal(6, 0); // filter level 0
    e.write_literal(3, 0); // sharpness
    e.write_flag(false); // no loop-filter adjustments
    e.write_literal(2, 0); // one DCT partition
    write_quant_defaults(e);
    e.write_flag(golden); // refresh golden
    e.write_flag(altref); // refresh altref
    if !golden {
        e.write_literal(2, 0); // keep golden as is
    }
    if !altref {
        e.write_literal(2, 0); // keep altref as is
    }
    e.write_flag(false); // sign bias golden
    e.write_flag(false); // sign bias altref
    e.write_flag(true); // refresh entropy probs
    e.write_flag(true); // refresh last
    write_no_token_updates(e);
    e.write_literal(1, 1); // mb_no_coeff_skip enabled
    e.write_literal(8, P_SKIP);
    e.write_literal(8, 128); // prob_intra
    e.write_literal(8, 128); // prob_last
    e.write_literal(8, 128); // prob_gf
    e.write_flag(false); // keep intra 16x16 mode probs
    e.write_flag(false); // keep intra chroma mode probs
    write_no_mv_updates(e);
}

/// Inter-frame header refreshing every reference.
pub fn write_inter_header(e: &mut BoolEncoder) {
    write_inter_header_with_refresh(e, true, true);
}

/// Inter-frame header refreshing only the LAST reference.
pub fn write_inter_header_refresh_last_only(e: &mut BoolEncoder) {
    write_inter_header_with_refresh(e, false, false);
}

/// Keyframe macroblock modes: 16x16 DC luma, DC chroma.
pub fn write_keyframe_mb_modes_dc(e: &mut BoolEncoder) {
    // Keyframe luma tree: B, then DC on the second branch.
    e.write_bool(true, 145);
    e.write_bool(false, 156);
    e.write_bool(false, 163);
    // Chroma DC.
    e.write_bool(false, 142);
}

/// Writes the end-of-block token under the given 11-probability set.
pub fn write_eob(e: &mut BoolEncoder, probs: &[u8; 11]) {
    e.write_bool(false, probs[0]);
}

/// Writes one signed DCT coefficient token (|value| up to 2048),
/// mirroring the decoder's token chain bit for bit.
pub fn write_coeff(e: &mut BoolEncoder, value: i32, probs: &[u8; 11]) {
    let v = value.unsigned_abs() as i32;
    assert!(v > 0 && v <= 2048);

    e.write_bool(true, probs[0]);
    e.write_bool(true, probs[1]);

    if v == 1 {
        e.write_bool(false, probs[2]);
    } else {
        e.write_bool(true, probs[2]);
        if v <= 4 {
            e.write_bool(false, probs[3]);
            if v == 2 {
                e.write_bool(false, probs[4]);
            } else {
                e.write_bool(true, probs[4]);
                e.write_bool(v == 4, probs[5]);
            }
        } else {
            e.write_bool(true, probs[3]);
            if v <= 10 {
                e.write_bool(false, probs[6]);
                if v <= 6 {
                    e.write_bool(false, probs[7]);
                    e.write_bool(v == 6, 159);
                } else {
                    e.write_bool(true, probs[7]);
                    let x = v - 7;
                    e.write_bool(x >= 2, 165);
                    e.write_bool(x & 1 == 1, 145);
                }
            } else {
                e.write_bool(true, probs[6]);
                let (cat, base) = if v <= 18 {
                    (0usize, 11)
                } else if v <= 34 {
                    (1, 19)
                } else if v <= 66 {
                    (2, 35)
                } else {
                    (3, 67)
                };
                let bit1 = cat >> 1;
                let bit0 = cat & 1;
                e.write_bool(bit1 == 1, probs[8]);
                e.write_bool(bit0 == 1, probs[9 + bit1]);

                let cat_probs = &PROB_DCT_CAT[2 + cat];
                let nbits = cat_probs.iter().take_while(|&&p| p != 0).count();
                let extra = v - base;
                for i in (0..nbits).rev() {
                    e.write_bool(extra & (1 << i) != 0, cat_probs[nbits - 1 - i]);
                }
            }
        }
    }

    e.write_bool(value < 0, 128);
}

/// Writes one motion vector component in whole-pixel units, mirroring
/// the decoder's short/long layout.
fn write_mv_component(e: &mut BoolEncoder, value: i16, p: &[u8; 19]) {
    let mag = value.unsigned_abs();
    if mag <= 7 {
        e.write_bool(false, p[0]);
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
        e.write_bool(true, p[0]);
        let field = mag - 8;
        for i in 0..3 {
            e.write_bool(field & (1 << (9 - i)) != 0, p[9 + i]);
        }
        for i in 0..7 {
            e.write_bool(field & (1 << (6 - i)) != 0, p[12 + i]);
        }
    }
    if mag != 0 {
        e.write_bool(value < 0, p[1]);
    }
}

/// Writes a motion vector in whole-pixel units (vertical component
/// first) under the default MV probabilities.
pub fn write_mv(e: &mut BoolEncoder, x_px: i16, y_px: i16) {
    write_mv_component(e, y_px, &DEFAULT_MV_PROBS[0]);
    write_mv_component(e, x_px, &DEFAULT_MV_PROBS[1]);
}

/// Skip flag, "not intra" and "reference = LAST" for one macroblock of
/// the inter test frames.
pub fn write_inter_mb_prefix(e: &mut BoolEncoder) {
    e.write_bool(true, P_SKIP); // coefficients skipped
    e.write_bool(false, 128); // inter macroblock
    e.write_bool(false, 128); // LAST frame
}

/// ZERO motion-vector mode.
pub fn write_mode_zero(e: &mut BoolEncoder, probs: &[u8; 4]) {
    e.write_bool(false, probs[0]);
}

/// NEAREST motion-vector mode.
pub fn write_mode_nearest(e: &mut BoolEncoder, probs: &[u8; 4]) {
    e.write_bool(true, probs[0]);
    e.write_bool(false, probs[1]);
}

/// NEW motion-vector mode with the given whole-pixel delta.
pub fn write_mode_new(e: &mut BoolEncoder, probs: &[u8; 4], dx_px: i16, dy_px: i16) {
    e.write_bool(true, probs[0]);
    e.write_bool(true, probs[1]);
    e.write_bool(true, probs[2]);
    e.write_bool(false, probs[3]);
    write_mv(e, dx_px, dy_px);
}

/// Enters SPLITMV mode (the caller writes the partition records).
pub fn write_mode_split(e: &mut BoolEncoder, probs: &[u8; 4]) {
    e.write_bool(true, probs[0]);
    e.write_bool(true, probs[1]);
    e.write_bool(true, probs[2]);
    e.write_bool(true, probs[3]);
}

/// Wraps boolean-coded partitions into a full VP8 frame: the
/// three-byte tag, the keyframe start code and dimensions, the first
/// partition and the single token partition.
pub fn assemble_frame(
    keyframe: bool,
    width: u16,
    height: u16,
    part0: &[u8],
    part1: &[u8],
) -> Vec<u8> {
    let tag: u32 = u32::from(!keyframe) | (1 << 4) | ((part0.len() as u32) << 5);

    let mut data = Vec::new();
    data.extend_from_slice(&tag.to_le_bytes()[..3]);
    if keyframe {
        data.extend_from_slice(&[0x9d, 0x01, 0x2a]);
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
    }
    data.extend_from_slice(part0);
    data.extend_from_slice(part1);
    data
}

/// A 32x16 keyframe (two macroblocks) whose left macroblock is coded two
/// steps brighter than the right one: luma 130 in columns 0..16 and 128
/// elsewhere, chroma flat 128. The brightness is carried entirely by the
/// second-order (Y2) blocks.
pub fn keyframe_two_mbs() -> Vec<u8> {
    use zenvp8::decoder::COEFF_PROBS;

    let mut e0 = BoolEncoder::new();
    write_keyframe_header(&mut e0);
    write_keyframe_mb_modes_dc(&mut e0);
    write_keyframe_mb_modes_dc(&mut e0);
    let part0 = e0.flush();

    let mut e1 = BoolEncoder::new();

    // Macroblock 0: Y2 carries +16 (all neighbour contexts are zero),
    // every first-order block is empty.
    write_coeff(&mut e1, 16, &COEFF_PROBS[1][0][0]);
    write_eob(&mut e1, &COEFF_PROBS[1][1][2]);
    for _ in 0..16 {
        write_eob(&mut e1, &COEFF_PROBS[0][1][0]);
    }
    for _ in 0..8 {
        write_eob(&mut e1, &COEFF_PROBS[2][0][0]);
    }

    // Macroblock 1: Y2 carries -16; its Y2 context is 1 because the
    // previous macroblock's Y2 block was non-empty.
    write_coeff(&mut e1, -16, &COEFF_PROBS[1][0][1]);
    write_eob(&mut e1, &COEFF_PROBS[1][1][2]);
    for _ in 0..16 {
        write_eob(&mut e1, &COEFF_PROBS[0][1][0]);
    }
    for _ in 0..8 {
        write_eob(&mut e1, &COEFF_PROBS[2][0][0]);
    }

    let part1 = e1.flush();

    assemble_frame(true, 32, 16, &part0, &part1)
}
