//! Version 2 layout: a key dictionary up front, clocks implied by position,
//! ids relative to the item that references them and delete ranges as gaps.

use rustc_hash::FxHashMap;

use super::varint::{Reader, write_string, write_var};
use super::{Decoder, Encoder};
use crate::crdt::delete_set::DeleteRange;
use crate::crdt::id::{ClientId, Clock, Id, MAX_CLIENT_ID};
use crate::error::CodecError;

// =============================================================================
// Encoder
// =============================================================================

#[derive(Default)]
pub(crate) struct EncoderV2 {
    buf: Vec<u8>,
    keys: Vec<String>,
    key_index: FxHashMap<String, u64>,
}

impl EncoderV2 {
    pub fn new() -> EncoderV2 {
        return EncoderV2::default();
    }
}

impl Encoder for EncoderV2 {
    fn buf_mut(&mut self) -> &mut Vec<u8> {
        return &mut self.buf;
    }

    fn write_key(&mut self, key: &str) {
        let index = match self.key_index.get(key) {
            Some(index) => *index,
            None => {
                let index = self.keys.len() as u64;
                self.keys.push(key.to_string());
                self.key_index.insert(key.to_string(), index);
                index
            }
        };
        write_var(&mut self.buf, index);
    }

    fn write_id(&mut self, id: Id, item: Id) {
        if id.client == item.client && id.clock < item.clock {
            write_var(&mut self.buf, (((item.clock - id.clock) as u64) << 1) | 1);
        } else {
            write_var(&mut self.buf, id.client << 1);
            write_var(&mut self.buf, id.clock as u64);
        }
    }

    fn write_client(&mut self, client: ClientId, num_blocks: usize, first_clock: Clock) {
        write_var(&mut self.buf, client);
        write_var(&mut self.buf, num_blocks as u64);
        write_var(&mut self.buf, first_clock as u64);
    }

    fn write_block_clock(&mut self, _clock: Clock) {}

    fn write_delete_range(&mut self, range: DeleteRange, prev_end: Clock) {
        write_var(&mut self.buf, (range.clock - prev_end) as u64);
        write_var(&mut self.buf, (range.len - 1) as u64);
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.buf.len() + 16);
        write_var(&mut out, self.keys.len() as u64);
        for key in &self.keys {
            write_string(&mut out, key);
        }
        out.extend_from_slice(&self.buf);
        return out;
    }
}

// =============================================================================
// Decoder
// =============================================================================

pub(crate) struct DecoderV2<'a> {
    reader: Reader<'a>,
    keys: Vec<String>,
}

impl<'a> DecoderV2<'a> {
    /// Read the key dictionary and position the decoder at the client
    /// section.
    pub fn new(bytes: &'a [u8]) -> Result<DecoderV2<'a>, CodecError> {
        let mut reader = Reader::new(bytes);
        let count = reader.read_var()?;
        let mut keys = Vec::new();
        for _ in 0..count {
            keys.push(reader.read_string()?);
        }
        return Ok(DecoderV2 { reader, keys });
    }
}

impl<'a> Decoder<'a> for DecoderV2<'a> {
    fn reader(&mut self) -> &mut Reader<'a> {
        return &mut self.reader;
    }

    fn read_key(&mut self) -> Result<String, CodecError> {
        let index = self.reader.read_var()?;
        let key = usize::try_from(index)
            .ok()
            .and_then(|i| self.keys.get(i))
            .ok_or(CodecError::UnknownKey(index))?;
        return Ok(key.clone());
    }

    fn read_id(&mut self, item: Id) -> Result<Id, CodecError> {
        let head = self.reader.read_var()?;
        if head & 1 == 1 {
            let delta = head >> 1;
            if delta == 0 || delta > item.clock as u64 {
                return Err(CodecError::InvalidIdDelta);
            }
            return Ok(Id::new(item.client, item.clock - delta as u32));
        }
        let client = head >> 1;
        if client > MAX_CLIENT_ID {
            return Err(CodecError::VarIntOverflow(53));
        }
        let clock = self.reader.read_var_u32()?;
        return Ok(Id::new(client, clock));
    }

    fn read_first_clock(&mut self) -> Result<Option<Clock>, CodecError> {
        return Ok(Some(self.reader.read_var_u32()?));
    }

    fn read_block_clock(&mut self, expected: Clock) -> Result<Clock, CodecError> {
        return Ok(expected);
    }

    fn read_delete_range(&mut self, prev_end: Clock) -> Result<DeleteRange, CodecError> {
        let gap = self.reader.read_var_u32()?;
        let len = self.reader.read_var_u32()?;
        let clock = prev_end.checked_add(gap).ok_or(CodecError::VarIntOverflow(32))?;
        let len = len.checked_add(1).ok_or(CodecError::VarIntOverflow(32))?;
        return Ok(DeleteRange::new(clock, len));
    }
}
