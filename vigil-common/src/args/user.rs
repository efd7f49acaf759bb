use aya::Pod;

use super::{PerfStrBuffer, StrBuffer, LEN_SIZE};
use crate::consts::STR_BUFF_WRAP;

unsafe impl Pod for StrBuffer {}

/// Iterates over the elements of a captured string array. Elements
/// running past the available bytes (previews) are returned cut. No
/// element starts at or past [STR_BUFF_WRAP], a buffer claiming more is
/// only decoded up to there.
pub struct StrArrayReader<'a> {
    bytes: &'a [u8],
    remaining: u32,
    off: usize,
    end: usize,
}

impl<'a> StrArrayReader<'a> {
    pub fn from_buffer(buf: &'a StrBuffer) -> Self {
        Self {
            bytes: &buf.value,
            remaining: buf.count,
            off: 0,
            end: buf.len as usize,
        }
    }

    pub fn from_preview(p: &'a PerfStrBuffer) -> Self {
        let size = (p.size as usize).min(p.value.len());
        Self {
            bytes: &p.value[..size],
            remaining: p.count,
            off: 0,
            end: size,
        }
    }
}

impl<'a> Iterator for StrArrayReader<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0
            || self.off + LEN_SIZE > self.end
            || self.off + LEN_SIZE >= STR_BUFF_WRAP
        {
            return None;
        }

        let len_off = self.off;
        let data_off = self.off + LEN_SIZE;

        let mut len = [0u8; LEN_SIZE];
        len.copy_from_slice(self.bytes.get(len_off..len_off + LEN_SIZE)?);
        let len = u32::from_le_bytes(len) as usize;

        let stop = (data_off + len).min(self.bytes.len());
        let elt = self.bytes.get(data_off..stop)?;

        self.off += LEN_SIZE + len;
        self.remaining -= 1;

        Some(elt)
    }
}
