//! In-band string encoding.
//!
//! A variable-length string lives inside the fixed data area of its own
//! slot. The slot stores the span as `(offset, len)`, both little-endian
//! `u32`, so the slot is self-describing and needs no side index.
//!
//! ```text
//!  span: [offset:32][len:32]        data: [.....hello world.........]
//!          │          │                         ^offset   ^offset+len
//! ```

use fortuna_core::{Error, Result};

/// Span of a string inside a slot's data area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InlineStr {
    pub offset: u32,
    pub len: u32,
}

impl InlineStr {
    /// Bytes occupied by the encoded span.
    pub const ENCODED_LEN: usize = 8;

    /// Copy `bytes` into `data` starting at `at` and return its span.
    ///
    /// Fails with `Validation` when the bytes do not fit; `data` is left
    /// untouched in that case.
    pub fn store(bytes: &[u8], data: &mut [u8], at: usize) -> Result<Self> {
        let end = at.checked_add(bytes.len()).filter(|&end| end <= data.len());
        let Some(end) = end else {
            return Err(Error::Validation(format!(
                "string is {} bytes, slot holds {}",
                bytes.len(),
                data.len().saturating_sub(at)
            )));
        };
        data[at..end].copy_from_slice(bytes);
        Ok(Self {
            offset: at as u32,
            len: bytes.len() as u32,
        })
    }

    /// Resolve the span against `data`. Out-of-range spans mean the slot
    /// was not written by this encoder.
    pub fn view<'d>(&self, data: &'d [u8]) -> Result<&'d [u8]> {
        let start = self.offset as usize;
        let end = start + self.len as usize;
        data.get(start..end).ok_or_else(|| {
            Error::Corrupt(format!(
                "string span {}..{} outside {}-byte data area",
                start,
                end,
                data.len()
            ))
        })
    }

    pub fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.offset.to_le_bytes());
        out[4..8].copy_from_slice(&self.len.to_le_bytes());
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            offset: get_u32(&raw[0..4]),
            len: get_u32(&raw[4..8]),
        }
    }
}

#[inline]
pub(crate) fn get_u32(raw: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&raw[..4]);
    u32::from_le_bytes(b)
}

#[inline]
pub(crate) fn get_u64(raw: &[u8]) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&raw[..8]);
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_view() {
        let mut data = [0u8; 16];
        let span = InlineStr::store(b"hello", &mut data, 3).unwrap();
        assert_eq!(span, InlineStr { offset: 3, len: 5 });
        assert_eq!(span.view(&data).unwrap(), b"hello");
    }

    #[test]
    fn test_exact_fit_and_overflow() {
        let mut data = [0u8; 4];
        assert!(InlineStr::store(b"abcd", &mut data, 0).is_ok());

        let mut data = [7u8; 4];
        let err = InlineStr::store(b"abcde", &mut data, 0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(data, [7u8; 4], "failed store must not touch the data area");
    }

    #[test]
    fn test_span_encoding() {
        let span = InlineStr { offset: 0x0102, len: 0x0a0b };
        let mut raw = [0u8; InlineStr::ENCODED_LEN];
        span.encode(&mut raw);
        assert_eq!(raw, [0x02, 0x01, 0, 0, 0x0b, 0x0a, 0, 0]);
        assert_eq!(InlineStr::decode(&raw), span);
    }

    #[test]
    fn test_view_rejects_out_of_range() {
        let data = [0u8; 8];
        let span = InlineStr { offset: 6, len: 4 };
        assert!(matches!(span.view(&data), Err(Error::Corrupt(_))));
    }
}
