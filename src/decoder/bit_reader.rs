//! VP8 boolean arithmetic decoder (RFC 6386 section 7).
//!
//! The reader keeps a two-byte window of the compressed stream in
//! `value` and renormalizes one bit at a time, pulling in the next input
//! byte after every eight shifts. When the input runs out it keeps
//! shifting in zero bits, as the reference decoder suggests, but flags
//! the condition so callers can distinguish a truncated stream from a
//! completed one.
//!
//! One reader decodes the first partition (frame header and macroblock
//! modes); each DCT token partition gets an independent reader of its
//! own, built with [`BoolReader::for_partition`].

use alloc::boxed::Box;
use alloc::vec::Vec;

use super::DecodeError;
use crate::common::types::TreeNode;

/// Boolean decoder over one partition of the compressed frame.
pub(crate) struct BoolReader {
    /// Owned partition data
    data: Box<[u8]>,
    /// Position of the next byte to shift in
    index: usize,
    /// Current coding interval width, in [128, 255] between reads
    range: u32,
    /// Two-byte input window the split is compared against
    value: u32,
    /// Renormalization shifts since the last byte was consumed
    bit_count: u8,
    /// True once a read has run past the end of the data
    eof: bool,
}

impl BoolReader {
    pub(crate) fn new() -> Self {
        Self {
            data: Box::new([]),
            index: 0,
            range: 255,
            value: 0,
            bit_count: 0,
            eof: false,
        }
    }

    /// Initialize the reader with the first partition's data.
    pub(crate) fn init(&mut self, data: Vec<u8>) -> Result<(), DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::NotEnoughInitData);
        }
        *self = Self::for_partition(data);
        Ok(())
    }

    /// Builds a reader over one DCT token partition. An empty partition
    /// is legal (every macroblock of a frame may skip its coefficients);
    /// such a reader reports end-of-input as soon as it is read from.
    pub(crate) fn for_partition(data: Vec<u8>) -> Self {
        let mut reader = Self {
            data: data.into_boxed_slice(),
            index: 0,
            range: 255,
            value: 0,
            bit_count: 0,
            eof: false,
        };
        // Prime the two-byte window.
        for _ in 0..2 {
            reader.value <<= 8;
            if reader.index < reader.data.len() {
                reader.value |= u32::from(reader.data[reader.index]);
                reader.index += 1;
            } else {
                reader.eof = true;
            }
        }
        reader
    }

    /// Read a bit that is 0 with probability `prob`/256.
    pub(crate) fn read_bool(&mut self, prob: u8) -> bool {
        let split = 1 + (((self.range - 1) * u32::from(prob)) >> 8);
        let bigsplit = split << 8;

        let retval = if self.value >= bigsplit {
            self.range -= split;
            self.value -= bigsplit;
            true
        } else {
            self.range = split;
            false
        };

        while self.range < 128 {
            self.value <<= 1;
            self.range <<= 1;
            self.bit_count += 1;

            if self.bit_count == 8 {
                self.bit_count = 0;

                // Past the end of the data the window fills with zero
                // bits (RFC 6386 p.135); the eof flag records that any
                // further output is fabricated.
                if self.index < self.data.len() {
                    self.value |= u32::from(self.data[self.index]);
                    self.index += 1;
                } else {
                    self.eof = true;
                }
            }
        }

        retval
    }

    /// Read a bit with probability 128 (50/50).
    pub(crate) fn read_flag(&mut self) -> bool {
        self.read_bool(128)
    }

    /// Read an `n`-bit unsigned integer, MSB first, each bit decoded with
    /// probability `prob`.
    pub(crate) fn read_uint(&mut self, prob: u8, n: u8) -> u32 {
        let mut v = 0u32;
        for _ in 0..n {
            v = (v << 1) | (self.read_bool(prob) as u32);
        }
        v
    }

    /// Read n bits as an unsigned value (MSB first, uniform probability)
    pub(crate) fn read_literal(&mut self, n: u8) -> u8 {
        self.read_uint(128, n) as u8
    }

    /// Read optional signed value (flag + magnitude + sign)
    pub(crate) fn read_optional_signed_value(&mut self, n: u8) -> i32 {
        if !self.read_flag() {
            return 0;
        }
        let magnitude = self.read_literal(n) as i32;
        if self.read_flag() {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Read from a probability tree
    pub(crate) fn read_with_tree<const N: usize>(&mut self, tree: &[TreeNode; N]) -> i8 {
        let mut node = tree[0];
        loop {
            let prob = node.prob;
            let b = self.read_bool(prob);
            let i = if b { node.right } else { node.left };
            let Some(next_node) = tree.get(usize::from(i)) else {
                return TreeNode::value_from_branch(i);
            };
            node = *next_node;
        }
    }

    /// Check if we've read past the end
    pub(crate) fn is_eof(&self) -> bool {
        self.eof
    }

    /// Check that reads were valid, returning an error if EOF was hit
    pub(crate) fn check<T>(&self, value: T) -> Result<T, DecodeError> {
        if self.eof {
            Err(DecodeError::BitStreamError)
        } else {
            Ok(value)
        }
    }
}

impl Default for BoolReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal boolean arithmetic encoder used by unit tests to author
/// bitstreams: a transcription of the encoder given in the VP8
/// specification (RFC 6386 section 7.3).
#[cfg(test)]
pub(crate) mod test_encoder {
    use alloc::vec::Vec;

    pub(crate) struct BoolEncoder {
        writer: Vec<u8>,
        bottom: u32,
        range: u32,
        bit_num: i32,
    }

    impl BoolEncoder {
        pub(crate) fn new() -> Self {
            Self {
                writer: Vec::new(),
                bottom: 0,
                range: 255,
                bit_num: 24,
            }
        }

        // Handle carry propagation: add one to output, handling 0xFF
        // overflow chains.
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

        pub(crate) fn write_bool(&mut self, value: bool, probability: u8) {
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

        pub(crate) fn write_flag(&mut self, flag: bool) {
            self.write_bool(flag, 128);
        }

        pub(crate) fn write_literal(&mut self, num_bits: u8, value: u8) {
            for bit in (0..num_bits).rev() {
                self.write_bool((value >> bit) & 1 != 0, 128);
            }
        }

        /// Flushes any remaining bits and returns the encoded buffer.
        pub(crate) fn flush(mut self) -> Vec<u8> {
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
}

#[cfg(test)]
mod tests {
    use super::test_encoder::BoolEncoder;
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn test_basic_reading() {
        let mut br = BoolReader::new();
        br.init(b"hello world and some more text".to_vec()).unwrap();

        for _ in 0..50 {
            let _ = br.read_flag();
        }
        assert!(!br.is_eof());
        assert!(br.check(()).is_ok());
    }

    #[test]
    fn test_short_data_hits_eof() {
        let mut br = BoolReader::new();
        br.init(vec![0x55, 0xAA, 0x55]).unwrap();

        for _ in 0..100 {
            let _ = br.read_flag();
        }
        assert!(br.is_eof());
        assert!(matches!(br.check(()), Err(DecodeError::BitStreamError)));
    }

    #[test]
    fn test_empty_init_rejected() {
        let mut br = BoolReader::new();
        assert!(matches!(
            br.init(Vec::new()),
            Err(DecodeError::NotEnoughInitData)
        ));
    }

    #[test]
    fn test_empty_partition_flags_eof() {
        // An all-skip frame carries an empty token partition; reading
        // from it must be safe and report end-of-input immediately.
        let mut br = BoolReader::for_partition(Vec::new());
        assert!(br.is_eof());
        for _ in 0..50 {
            let _ = br.read_bool(170);
        }
        assert!(matches!(br.check(()), Err(DecodeError::BitStreamError)));
    }

    #[test]
    fn test_encoder_decoder_roundtrip() {
        // Deterministic pseudo-random bit/probability sequence.
        let mut state = 0x2F6E2B1u32;
        let mut next = move || {
            state = state.wrapping_mul(1103515245).wrapping_add(12345);
            state >> 16
        };

        let mut bits = Vec::new();
        let mut enc = BoolEncoder::new();
        for _ in 0..500 {
            let bit = next() & 1 != 0;
            let prob = (next() % 254 + 1) as u8;
            enc.write_bool(bit, prob);
            bits.push((bit, prob));
        }
        let data = enc.flush();

        let mut dec = BoolReader::new();
        dec.init(data).unwrap();
        for (i, &(bit, prob)) in bits.iter().enumerate() {
            assert_eq!(dec.read_bool(prob), bit, "bit {i}");
        }
        assert!(dec.check(()).is_ok());
    }

    #[test]
    fn test_literal_roundtrip() {
        let mut enc = BoolEncoder::new();
        enc.write_literal(7, 0x5A);
        enc.write_literal(8, 0xC3);
        enc.write_flag(true);
        enc.write_literal(2, 3);
        let data = enc.flush();

        let mut dec = BoolReader::new();
        dec.init(data).unwrap();
        assert_eq!(dec.read_literal(7), 0x5A);
        assert_eq!(dec.read_literal(8), 0xC3);
        assert!(dec.read_flag());
        assert_eq!(dec.read_literal(2), 3);
    }

    #[test]
    fn test_partition_readers_are_independent() {
        // Two partitions decoding interleaved must not disturb each
        // other: each owns its data and position.
        let mut e0 = BoolEncoder::new();
        let mut e1 = BoolEncoder::new();
        for i in 0..60u32 {
            e0.write_bool(i % 3 == 0, 90);
            e1.write_bool(i % 5 == 0, 201);
        }

        let mut r0 = BoolReader::for_partition(e0.flush());
        let mut r1 = BoolReader::for_partition(e1.flush());
        for i in 0..60u32 {
            assert_eq!(r0.read_bool(90), i % 3 == 0, "partition 0 bit {i}");
            assert_eq!(r1.read_bool(201), i % 5 == 0, "partition 1 bit {i}");
        }
        assert!(!r0.is_eof());
        assert!(!r1.is_eof());
    }
}
