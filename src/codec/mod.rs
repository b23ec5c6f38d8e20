//! Binary encoding of updates, delete sets and state vectors.
//!
//! The structure of an update is shared by both versions and written once,
//! generically over `Encoder` / `Decoder`. The versions differ only in how
//! individual fields are laid out:
//!
//! | field            | V1              | V2                               |
//! |------------------|-----------------|----------------------------------|
//! | key strings      | inline          | index into a leading dictionary  |
//! | block clocks     | every block     | first clock per client           |
//! | ids in items     | client, clock   | clock delta when same client     |
//! | delete ranges    | clock, len      | gap from previous end, len - 1   |
//!
//! Decoding is all-or-nothing: any malformed field fails the whole update
//! with a `CodecError` before anything is applied.

mod v1;
mod v2;
pub(crate) mod varint;

use serde::{Deserialize, Serialize};

use crate::crdt::block::{Block, BlockRange, ContainerRef, Item};
use crate::crdt::content::{Content, TypeRef};
use crate::crdt::delete_set::{DeleteRange, DeleteSet};
use crate::crdt::id::{ClientId, Clock, Id, StateVector};
use crate::error::CodecError;
use crate::update::Update;

use v1::{DecoderV1, EncoderV1, read_client_id};
use v2::{DecoderV2, EncoderV2};
use varint::{Reader, write_buf, write_string, write_u8, write_var};

/// Wire format version of an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    #[default]
    V1,
    V2,
}

const TAG_SKIP: u8 = 0;
const TAG_DELETED: u8 = 1;
const TAG_ITEM: u8 = 2;

const HAS_ORIGIN: u8 = 1;
const HAS_RIGHT_ORIGIN: u8 = 2;
const HAS_PARENT_SUB: u8 = 4;
const PARENT_NESTED: u8 = 8;

const CONTENT_DELETED: u8 = 1;
const CONTENT_STRING: u8 = 2;
const CONTENT_ANY: u8 = 3;
const CONTENT_BINARY: u8 = 4;
const CONTENT_TYPE: u8 = 5;

/// Field-level writer. The structure is written by `write_update`.
pub(crate) trait Encoder {
    /// The buffer currently being written to.
    fn buf_mut(&mut self) -> &mut Vec<u8>;
    fn write_key(&mut self, key: &str);
    /// Write `id`, as referenced by the item `item`.
    fn write_id(&mut self, id: Id, item: Id);
    fn write_client(&mut self, client: ClientId, num_blocks: usize, first_clock: Clock);
    fn write_block_clock(&mut self, clock: Clock);
    fn write_delete_range(&mut self, range: DeleteRange, prev_end: Clock);
    fn into_bytes(self) -> Vec<u8>;
}

/// Field-level reader, the mirror of `Encoder`.
pub(crate) trait Decoder<'a> {
    fn reader(&mut self) -> &mut Reader<'a>;
    fn read_key(&mut self) -> Result<String, CodecError>;
    fn read_id(&mut self, item: Id) -> Result<Id, CodecError>;
    /// The clock of a client's first block, if the layout carries it.
    fn read_first_clock(&mut self) -> Result<Option<Clock>, CodecError>;
    fn read_block_clock(&mut self, expected: Clock) -> Result<Clock, CodecError>;
    fn read_delete_range(&mut self, prev_end: Clock) -> Result<DeleteRange, CodecError>;
}

// ============================================================================
// Entry points
// ============================================================================

pub(crate) fn encode_update(update: &Update, version: Version) -> Vec<u8> {
    return match version {
        Version::V1 => {
            let mut enc = EncoderV1::new();
            write_update(&mut enc, update);
            enc.into_bytes()
        }
        Version::V2 => {
            let mut enc = EncoderV2::new();
            write_update(&mut enc, update);
            enc.into_bytes()
        }
    };
}

pub(crate) fn decode_update(bytes: &[u8], version: Version) -> Result<Update, CodecError> {
    return match version {
        Version::V1 => read_whole_update(&mut DecoderV1::new(bytes)),
        Version::V2 => read_whole_update(&mut DecoderV2::new(bytes)?),
    };
}

fn read_whole_update<'a, D: Decoder<'a>>(dec: &mut D) -> Result<Update, CodecError> {
    let update = read_update(dec)?;
    dec.reader().finish()?;
    return Ok(update);
}

/// Length-only view of a block, read without decoding its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct BlockHeader {
    pub clock: Clock,
    pub len: u32,
    pub skip: bool,
}

impl BlockHeader {
    pub fn end(&self) -> Clock {
        return self.clock + self.len;
    }
}

/// Read the block headers of an update, skipping payloads and the delete
/// set. Clients appear in encoded order.
pub(crate) fn decode_headers(
    bytes: &[u8],
    version: Version,
) -> Result<Vec<(ClientId, Vec<BlockHeader>)>, CodecError> {
    return match version {
        Version::V1 => read_headers(&mut DecoderV1::new(bytes)),
        Version::V2 => read_headers(&mut DecoderV2::new(bytes)?),
    };
}

/// Encode a state vector. Both update versions share this layout.
pub fn encode_state_vector(sv: &StateVector) -> Vec<u8> {
    let mut buf = Vec::new();
    let entries = sv.sorted();
    write_var(&mut buf, entries.len() as u64);
    for (client, clock) in entries {
        write_var(&mut buf, client);
        write_var(&mut buf, clock as u64);
    }
    return buf;
}

/// Decode a state vector written by `encode_state_vector`.
pub fn decode_state_vector(bytes: &[u8]) -> Result<StateVector, CodecError> {
    let mut reader = Reader::new(bytes);
    let sv = read_state_vector(&mut reader)?;
    reader.finish()?;
    return Ok(sv);
}

pub(crate) fn write_state_vector(buf: &mut Vec<u8>, sv: &StateVector) {
    buf.extend_from_slice(&encode_state_vector(sv));
}

pub(crate) fn read_state_vector(reader: &mut Reader<'_>) -> Result<StateVector, CodecError> {
    let count = reader.read_var()?;
    let mut sv = StateVector::new();
    for _ in 0..count {
        let client = read_client_id(reader)?;
        let clock = reader.read_var_u32()?;
        sv.set(client, clock);
    }
    return Ok(sv);
}

// ============================================================================
// Structure
// ============================================================================

fn write_update<E: Encoder>(enc: &mut E, update: &Update) {
    let clients: Vec<_> = update
        .blocks
        .iter()
        .filter(|(_, blocks)| !blocks.is_empty())
        .collect();
    write_var(enc.buf_mut(), clients.len() as u64);
    for (client, blocks) in clients {
        enc.write_client(*client, blocks.len(), blocks[0].clock());
        for block in blocks {
            enc.write_block_clock(block.clock());
            write_var(enc.buf_mut(), block.len() as u64);
            match block {
                Block::Skip(_) => write_u8(enc.buf_mut(), TAG_SKIP),
                Block::Deleted(_) => write_u8(enc.buf_mut(), TAG_DELETED),
                Block::Item(item) => {
                    write_u8(enc.buf_mut(), TAG_ITEM);
                    write_item(enc, item);
                }
            }
        }
    }
    write_delete_set(enc, &update.delete_set);
}

fn write_item<E: Encoder>(enc: &mut E, item: &Item) {
    let outer = std::mem::take(enc.buf_mut());

    let mut info = 0;
    if item.origin.is_some() {
        info |= HAS_ORIGIN;
    }
    if item.right_origin.is_some() {
        info |= HAS_RIGHT_ORIGIN;
    }
    if item.parent_sub.is_some() {
        info |= HAS_PARENT_SUB;
    }
    if let ContainerRef::Nested(_) = item.parent {
        info |= PARENT_NESTED;
    }
    write_u8(enc.buf_mut(), info);
    if let Some(origin) = item.origin {
        enc.write_id(origin, item.id);
    }
    if let Some(right_origin) = item.right_origin {
        enc.write_id(right_origin, item.id);
    }
    match &item.parent {
        ContainerRef::Root(name) => enc.write_key(name),
        ContainerRef::Nested(id) => enc.write_id(*id, item.id),
    }
    if let Some(key) = &item.parent_sub {
        enc.write_key(key);
    }
    write_content(enc.buf_mut(), &item.content);

    let payload = std::mem::replace(enc.buf_mut(), outer);
    write_buf(enc.buf_mut(), &payload);
}

fn write_content(buf: &mut Vec<u8>, content: &Content) {
    match content {
        Content::Deleted(len) => {
            write_u8(buf, CONTENT_DELETED);
            write_var(buf, *len as u64);
        }
        Content::String(s) => {
            write_u8(buf, CONTENT_STRING);
            write_string(buf, s);
        }
        Content::Any(values) => {
            write_u8(buf, CONTENT_ANY);
            write_var(buf, values.len() as u64);
            for value in values {
                write_string(buf, &value.to_string());
            }
        }
        Content::Binary(bytes) => {
            write_u8(buf, CONTENT_BINARY);
            write_buf(buf, bytes);
        }
        Content::Type(kind) => {
            write_u8(buf, CONTENT_TYPE);
            write_u8(buf, kind.tag());
        }
    }
}

fn write_delete_set<E: Encoder>(enc: &mut E, ds: &DeleteSet) {
    let clients: Vec<_> = ds.iter().filter(|(_, ranges)| !ranges.is_empty()).collect();
    write_var(enc.buf_mut(), clients.len() as u64);
    for (client, ranges) in clients {
        write_var(enc.buf_mut(), client);
        write_var(enc.buf_mut(), ranges.len() as u64);
        let mut prev_end = 0;
        for range in ranges {
            enc.write_delete_range(*range, prev_end);
            prev_end = range.end();
        }
    }
}

/// Read the fields every block starts with and check them against the
/// client's running clock.
fn read_block_header<'a, D: Decoder<'a>>(
    dec: &mut D,
    client: ClientId,
    expected: &mut Option<Clock>,
) -> Result<(Id, u32, u8), CodecError> {
    let clock = dec.read_block_clock(expected.unwrap_or(0))?;
    if let Some(expected) = *expected {
        if clock != expected {
            return Err(CodecError::NonContiguous {
                found: Id::new(client, clock),
                expected,
            });
        }
    }
    let id = Id::new(client, clock);
    let len = dec.reader().read_var_u32()?;
    if len == 0 {
        return Err(CodecError::ZeroLength(id));
    }
    let end = clock.checked_add(len).ok_or(CodecError::ClockOverflow(id))?;
    *expected = Some(end);
    let tag = dec.reader().read_u8()?;
    return Ok((id, len, tag));
}

fn read_update<'a, D: Decoder<'a>>(dec: &mut D) -> Result<Update, CodecError> {
    let mut update = Update::new();
    let num_clients = dec.reader().read_var()?;
    for _ in 0..num_clients {
        let client = read_client_id(dec.reader())?;
        let num_blocks = dec.reader().read_var()?;
        let mut expected = dec.read_first_clock()?;
        let mut blocks: Vec<Block> = Vec::with_capacity(num_blocks.min(1024) as usize);
        for _ in 0..num_blocks {
            let (id, len, tag) = read_block_header(dec, client, &mut expected)?;
            let block = match tag {
                TAG_SKIP => Block::Skip(BlockRange::new(id, len)),
                TAG_DELETED => Block::Deleted(BlockRange::new(id, len)),
                TAG_ITEM => Block::Item(read_item(dec, id, len)?),
                other => return Err(CodecError::UnknownTag(other)),
            };
            blocks.push(block);
        }
        if blocks.is_empty() {
            continue;
        }
        let column = update.blocks.entry(client).or_default();
        if let Some(last) = column.last() {
            if last.end() != blocks[0].clock() {
                return Err(CodecError::NonContiguous {
                    found: blocks[0].id(),
                    expected: last.end(),
                });
            }
        }
        column.extend(blocks);
    }
    update.delete_set = read_delete_set(dec)?;
    return Ok(update);
}

fn read_item<'a, D: Decoder<'a>>(dec: &mut D, id: Id, len: u32) -> Result<Item, CodecError> {
    let payload_len = dec.reader().read_var_u32()?;
    let start = dec.reader().position();

    let info = dec.reader().read_u8()?;
    if info & !(HAS_ORIGIN | HAS_RIGHT_ORIGIN | HAS_PARENT_SUB | PARENT_NESTED) != 0 {
        return Err(CodecError::UnknownTag(info));
    }
    let origin = match info & HAS_ORIGIN {
        0 => None,
        _ => Some(dec.read_id(id)?),
    };
    let right_origin = match info & HAS_RIGHT_ORIGIN {
        0 => None,
        _ => Some(dec.read_id(id)?),
    };
    let parent = match info & PARENT_NESTED {
        0 => ContainerRef::Root(dec.read_key()?),
        _ => ContainerRef::Nested(dec.read_id(id)?),
    };
    let parent_sub = match info & HAS_PARENT_SUB {
        0 => None,
        _ => Some(dec.read_key()?),
    };
    let content = read_content(dec.reader())?;

    let consumed = (dec.reader().position() - start) as u32;
    if consumed != payload_len {
        return Err(CodecError::LengthMismatch {
            id,
            declared: payload_len,
            actual: consumed,
        });
    }
    if content.len() != len {
        return Err(CodecError::LengthMismatch {
            id,
            declared: len,
            actual: content.len(),
        });
    }
    return Ok(Item::new(id, origin, right_origin, parent, parent_sub, content));
}

fn read_content(reader: &mut Reader<'_>) -> Result<Content, CodecError> {
    let tag = reader.read_u8()?;
    return match tag {
        CONTENT_DELETED => Ok(Content::Deleted(reader.read_var_u32()?)),
        CONTENT_STRING => Ok(Content::String(reader.read_string()?)),
        CONTENT_ANY => {
            let count = reader.read_var()?;
            let mut values = Vec::new();
            for _ in 0..count {
                let json = reader.read_string()?;
                values.push(serde_json::from_str(&json)?);
            }
            Ok(Content::Any(values))
        }
        CONTENT_BINARY => Ok(Content::Binary(reader.read_buf()?.to_vec())),
        CONTENT_TYPE => {
            let kind = reader.read_u8()?;
            let kind = TypeRef::from_tag(kind).ok_or(CodecError::UnknownTypeRef(kind))?;
            Ok(Content::Type(kind))
        }
        other => Err(CodecError::UnknownContent(other)),
    };
}

fn read_delete_set<'a, D: Decoder<'a>>(dec: &mut D) -> Result<DeleteSet, CodecError> {
    let mut ds = DeleteSet::new();
    let num_clients = dec.reader().read_var()?;
    for _ in 0..num_clients {
        let client = read_client_id(dec.reader())?;
        let num_ranges = dec.reader().read_var()?;
        let mut prev_end = 0;
        for _ in 0..num_ranges {
            let range = dec.read_delete_range(prev_end)?;
            let id = Id::new(client, range.clock);
            if range.len == 0 {
                return Err(CodecError::ZeroLength(id));
            }
            prev_end = range.clock.checked_add(range.len).ok_or(CodecError::ClockOverflow(id))?;
            ds.add(client, range.clock, range.len);
        }
    }
    return Ok(ds);
}

fn read_headers<'a, D: Decoder<'a>>(
    dec: &mut D,
) -> Result<Vec<(ClientId, Vec<BlockHeader>)>, CodecError> {
    let mut clients = Vec::new();
    let num_clients = dec.reader().read_var()?;
    for _ in 0..num_clients {
        let client = read_client_id(dec.reader())?;
        let num_blocks = dec.reader().read_var()?;
        let mut expected = dec.read_first_clock()?;
        let mut headers = Vec::with_capacity(num_blocks.min(1024) as usize);
        for _ in 0..num_blocks {
            let (id, len, tag) = read_block_header(dec, client, &mut expected)?;
            match tag {
                TAG_SKIP | TAG_DELETED => {}
                TAG_ITEM => {
                    let payload_len = dec.reader().read_var()?;
                    let payload_len =
                        usize::try_from(payload_len).map_err(|_| CodecError::UnexpectedEof)?;
                    dec.reader().read_bytes(payload_len)?;
                }
                other => return Err(CodecError::UnknownTag(other)),
            }
            headers.push(BlockHeader {
                clock: id.clock,
                len,
                skip: tag == TAG_SKIP,
            });
        }
        clients.push((client, headers));
    }
    return Ok(clients);
}
