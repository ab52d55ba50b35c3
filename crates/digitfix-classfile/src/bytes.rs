//! Big-endian cursor and writer helpers.
//!
//! Every read is bounds-checked and reports a [`DigitfixError::MalformedClass`]
//! naming the field that ran past the end of the input.

use digitfix_error::{DigitfixError, Result};

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub const fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub const fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    /// Bytes consumed since `start`.
    pub fn since(&self, start: usize) -> &'a [u8] {
        &self.bytes[start.min(self.pos)..self.pos]
    }

    pub fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                DigitfixError::malformed(format!(
                    "truncated {field}: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn skip(&mut self, len: usize, field: &str) -> Result<()> {
        self.take(len, field).map(|_| ())
    }

    pub fn u1(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn i1(&mut self, field: &str) -> Result<i8> {
        Ok(self.u1(field)? as i8)
    }

    pub fn u2(&mut self, field: &str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn i2(&mut self, field: &str) -> Result<i16> {
        Ok(self.u2(field)? as i16)
    }

    pub fn u4(&mut self, field: &str) -> Result<u32> {
        let b = self.take(4, field)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i4(&mut self, field: &str) -> Result<i32> {
        Ok(self.u4(field)? as i32)
    }

    pub fn u8(&mut self, field: &str) -> Result<u64> {
        let b = self.take(8, field)?;
        let mut raw = [0_u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }
}

pub fn put_u1(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub fn put_u2(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_u4(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn put_i4(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn write_i2_at(out: &mut [u8], pos: usize, value: i16) {
    out[pos..pos + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn write_i4_at(out: &mut [u8], pos: usize, value: i32) {
    out[pos..pos + 4].copy_from_slice(&value.to_be_bytes());
}

/// Narrow a length to a `u2` count field.
pub fn count_u2(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| DigitfixError::unsupported(format!("too many {what}: {len}")))
}

/// Narrow a length to a `u4` length field.
pub fn len_u4(len: usize, what: &str) -> Result<u32> {
    u32::try_from(len).map_err(|_| DigitfixError::unsupported(format!("{what} too long: {len}")))
}

/// Decode a modified UTF-8 constant.
///
/// Supplementary characters arrive as surrogate pairs of 3-byte sequences.
/// Unpaired surrogates cannot be represented as a Rust `String` and are
/// reported as malformed.
pub fn decode_modified_utf8(raw: &[u8]) -> Result<String> {
    let mut units: Vec<u16> = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b0 = raw[i];
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(DigitfixError::malformed("NUL byte in modified UTF-8"));
            }
            units.push(u16::from(b0));
            i += 1;
        } else if b0 & 0xe0 == 0xc0 {
            let b1 = continuation(raw, i + 1)?;
            units.push((u16::from(b0 & 0x1f) << 6) | u16::from(b1));
            i += 2;
        } else if b0 & 0xf0 == 0xe0 {
            let b1 = continuation(raw, i + 1)?;
            let b2 = continuation(raw, i + 2)?;
            units.push((u16::from(b0 & 0x0f) << 12) | (u16::from(b1) << 6) | u16::from(b2));
            i += 3;
        } else {
            return Err(DigitfixError::malformed(format!(
                "invalid modified UTF-8 lead byte {b0:#04x}"
            )));
        }
    }
    String::from_utf16(&units)
        .map_err(|_| DigitfixError::malformed("unpaired surrogate in modified UTF-8"))
}

fn continuation(raw: &[u8], idx: usize) -> Result<u8> {
    match raw.get(idx) {
        Some(b) if b & 0xc0 == 0x80 => Ok(b & 0x3f),
        _ => Err(DigitfixError::malformed("truncated modified UTF-8 sequence")),
    }
}

/// Encode a string as modified UTF-8.
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | ((unit >> 6) as u8 & 0x1f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
            _ => {
                out.push(0xe0 | ((unit >> 12) as u8 & 0x0f));
                out.push(0x80 | ((unit >> 6) as u8 & 0x3f));
                out.push(0x80 | (unit as u8 & 0x3f));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_reports_field_on_truncation() {
        let mut r = ByteReader::new(&[0xca, 0xfe]);
        assert_eq!(r.u2("magic").expect("two bytes"), 0xcafe);
        let err = r.u4("minor_version").expect_err("past end");
        assert!(err.to_string().contains("minor_version"));
    }

    #[test]
    fn test_signed_reads() {
        let mut r = ByteReader::new(&[0xff, 0xff, 0xfe, 0xff, 0xff, 0xff, 0xfd]);
        assert_eq!(r.i1("a").expect("i1"), -1);
        assert_eq!(r.i2("b").expect("i2"), -2);
        assert_eq!(r.i4("c").expect("i4"), -3);
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let text = "a\u{0}é\u{1F600}";
        let raw = encode_modified_utf8(text);
        assert_eq!(&raw[1..3], &[0xc0, 0x80]);
        assert!(!raw.contains(&0));
        // surrogate pair encoded as two 3-byte sequences
        assert_eq!(raw.len(), 1 + 2 + 2 + 6);
        assert_eq!(decode_modified_utf8(&raw).expect("decode"), text);
    }

    #[test]
    fn test_modified_utf8_rejects_raw_nul() {
        assert!(decode_modified_utf8(&[b'a', 0, b'b']).is_err());
    }

    #[test]
    fn test_patch_helpers() {
        let mut buf = vec![0_u8; 6];
        write_i2_at(&mut buf, 0, -2);
        write_i4_at(&mut buf, 2, 0x0102_0304);
        assert_eq!(buf, [0xff, 0xfe, 1, 2, 3, 4]);
    }
}
