//! Bit reader for H.264 RBSP syntax.
//!
//! Reads MSB-first fixed-width fields (`u(n)`), flags and Exp-Golomb codes
//! (`ue(v)`, `se(v)`) out of a raw byte sequence payload. Emulation
//! prevention bytes must be removed first with [`strip_emulation_prevention`].

use crate::error::{PixelReelError, Result};

/// Reader over an RBSP byte slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize, // bit offset from the start of `data`
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Number of unread bits.
    pub fn bits_remaining(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position)
    }

    /// Read `num_bits` (at most 32) as an unsigned value.
    pub fn read_bits(&mut self, num_bits: u8) -> Result<u32> {
        if num_bits > 32 {
            return Err(PixelReelError::Bitstream(format!(
                "cannot read {} bits into a u32",
                num_bits
            )));
        }
        if self.bits_remaining() < num_bits as usize {
            return Err(PixelReelError::Bitstream(format!(
                "unexpected end of RBSP: {} bits requested, {} left",
                num_bits,
                self.bits_remaining()
            )));
        }

        let mut value = 0u64;
        for _ in 0..num_bits {
            let byte = self.data[self.position / 8];
            let bit = (byte >> (7 - (self.position % 8))) & 1;
            value = (value << 1) | u64::from(bit);
            self.position += 1;
        }
        Ok(value as u32)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Unsigned Exp-Golomb code (9.1).
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_flag()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(PixelReelError::Bitstream(
                    "Exp-Golomb code longer than 32 bits".to_string(),
                ));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }
        let suffix = u64::from(self.read_bits(leading_zeros)?);
        Ok(((1u64 << leading_zeros) - 1 + suffix) as u32)
    }

    /// Signed Exp-Golomb code (9.1.1).
    pub fn read_se(&mut self) -> Result<i32> {
        let code = i64::from(self.read_ue()?);
        let value = if code % 2 == 1 {
            (code + 1) / 2
        } else {
            -(code / 2)
        };
        Ok(value as i32)
    }

    pub fn skip_bits(&mut self, num_bits: usize) -> Result<()> {
        if self.bits_remaining() < num_bits {
            return Err(PixelReelError::Bitstream(format!(
                "cannot skip {} bits, {} left",
                num_bits,
                self.bits_remaining()
            )));
        }
        self.position += num_bits;
        Ok(())
    }
}

/// Remove `emulation_prevention_three_byte`s (7.4.1) from a NAL payload.
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut rbsp = Vec::with_capacity(data.len());
    let mut zero_run = 0usize;
    for &byte in data {
        if zero_run >= 2 && byte == 0x03 {
            zero_run = 0;
            continue;
        }
        rbsp.push(byte);
        zero_run = if byte == 0 { zero_run + 1 } else { 0 };
    }
    rbsp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::test_support::BitWriter;

    #[test]
    fn test_read_bits_across_bytes() {
        let data = [0b1111_0000, 0b1111_0000];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(4).unwrap(), 0b1111);
        assert_eq!(reader.read_bits(8).unwrap(), 0b0000_1111);
        assert_eq!(reader.bits_remaining(), 4);
    }

    #[test]
    fn test_read_full_word() {
        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(32).unwrap(), 0xDEAD_BEEF);
        assert_eq!(reader.bits_remaining(), 0);
    }

    #[test]
    fn test_read_past_end_fails() {
        let data = [0xFF];
        let mut reader = BitReader::new(&data);
        reader.read_bits(6).unwrap();
        assert!(matches!(
            reader.read_bits(3),
            Err(PixelReelError::Bitstream(_))
        ));
    }

    #[test]
    fn test_read_ue_known_codes() {
        // 1 | 010 | 011 | 00100 | 00111 -> 0, 1, 2, 3, 6
        let data = [0b1010_0110, 0b0100_0011, 0b1000_0000];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_ue().unwrap(), 0);
        assert_eq!(reader.read_ue().unwrap(), 1);
        assert_eq!(reader.read_ue().unwrap(), 2);
        assert_eq!(reader.read_ue().unwrap(), 3);
        assert_eq!(reader.read_ue().unwrap(), 6);
    }

    #[test]
    fn test_read_se_sign_mapping() {
        let mut writer = BitWriter::new();
        for value in [0, 1, -1, 2, -2, 17, -300] {
            writer.write_se(value);
        }
        let data = writer.into_bytes();
        let mut reader = BitReader::new(&data);
        for expected in [0, 1, -1, 2, -2, 17, -300] {
            assert_eq!(reader.read_se().unwrap(), expected);
        }
    }

    #[test]
    fn test_read_ue_rejects_overlong_prefix() {
        let data = [0u8; 8];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_ue().is_err());
    }

    #[test]
    fn test_skip_bits() {
        let data = [0b0000_0001];
        let mut reader = BitReader::new(&data);
        reader.skip_bits(7).unwrap();
        assert!(reader.read_flag().unwrap());
        assert!(reader.skip_bits(1).is_err());
    }

    #[test]
    fn test_strip_emulation_prevention() {
        let escaped = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x03, 0x42];
        assert_eq!(
            strip_emulation_prevention(&escaped),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x03, 0x42]
        );
    }

    #[test]
    fn test_strip_leaves_plain_payload_untouched() {
        let plain = [0x65, 0x88, 0x84, 0x00, 0x03, 0x00];
        assert_eq!(strip_emulation_prevention(&plain), plain.to_vec());
    }
}
