//! Version 1 layout: every field written in full.

use super::varint::{Reader, write_string, write_var};
use super::{Decoder, Encoder};
use crate::crdt::delete_set::DeleteRange;
use crate::crdt::id::{ClientId, Clock, Id, MAX_CLIENT_ID};
use crate::error::CodecError;

// =============================================================================
// Encoder
// =============================================================================

#[derive(Default)]
pub(crate) struct EncoderV1 {
    buf: Vec<u8>,
}

impl EncoderV1 {
    pub fn new() -> EncoderV1 {
        return EncoderV1::default();
    }
}

impl Encoder for EncoderV1 {
    fn buf_mut(&mut self) -> &mut Vec<u8> {
        return &mut self.buf;
    }

    fn write_key(&mut self, key: &str) {
        write_string(&mut self.buf, key);
    }

    fn write_id(&mut self, id: Id, _item: Id) {
        write_var(&mut self.buf, id.client);
        write_var(&mut self.buf, id.clock as u64);
    }

    fn write_client(&mut self, client: ClientId, num_blocks: usize, _first_clock: Clock) {
        write_var(&mut self.buf, client);
        write_var(&mut self.buf, num_blocks as u64);
    }

    fn write_block_clock(&mut self, clock: Clock) {
        write_var(&mut self.buf, clock as u64);
    }

    fn write_delete_range(&mut self, range: DeleteRange, _prev_end: Clock) {
        write_var(&mut self.buf, range.clock as u64);
        write_var(&mut self.buf, range.len as u64);
    }

    fn into_bytes(self) -> Vec<u8> {
        return self.buf;
    }
}

// =============================================================================
// Decoder
// =============================================================================

pub(crate) struct DecoderV1<'a> {
    reader: Reader<'a>,
}

impl<'a> DecoderV1<'a> {
    pub fn new(bytes: &'a [u8]) -> DecoderV1<'a> {
        return DecoderV1 {
            reader: Reader::new(bytes),
        };
    }
}

pub(crate) fn read_client_id(reader: &mut Reader<'_>) -> Result<ClientId, CodecError> {
    let client = reader.read_var()?;
    if client > MAX_CLIENT_ID {
        return Err(CodecError::VarIntOverflow(53));
    }
    return Ok(client);
}

impl<'a> Decoder<'a> for DecoderV1<'a> {
    fn reader(&mut self) -> &mut Reader<'a> {
        return &mut self.reader;
    }

    fn read_key(&mut self) -> Result<String, CodecError> {
        return self.reader.read_string();
    }

    fn read_id(&mut self, _item: Id) -> Result<Id, CodecError> {
        let client = read_client_id(&mut self.reader)?;
        let clock = self.reader.read_var_u32()?;
        return Ok(Id::new(client, clock));
    }

    fn read_first_clock(&mut self) -> Result<Option<Clock>, CodecError> {
        return Ok(None);
    }

    fn read_block_clock(&mut self, _expected: Clock) -> Result<Clock, CodecError> {
        return self.reader.read_var_u32();
    }

    fn read_delete_range(&mut self, _prev_end: Clock) -> Result<DeleteRange, CodecError> {
        let clock = self.reader.read_var_u32()?;
        let len = self.reader.read_var_u32()?;
        return Ok(DeleteRange::new(clock, len));
    }
}
