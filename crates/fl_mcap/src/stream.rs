//! Push-based MCAP framing state machine.
//!
//! Byte chunks are fed in via [`McapStreamDecoder::push_byte_chunk`]
//! and classified records are read back via
//! [`McapStreamDecoder::try_read`] once enough data has arrived. This
//! is what lets a live HTTP download be decoded without ever holding
//! the whole container in memory.

use std::collections::VecDeque;
use std::io::Cursor;
use std::io::Read as _;
use std::sync::Arc;

use byteorder::{ByteOrder as _, LittleEndian};

use crate::error::McapError;
use crate::records::{
    ChannelRecord, ChunkHeader, MessageRecord, Record, SchemaRecord, op, MAGIC,
};

/// Opcode (1 byte) + record length (u64).
const RECORD_HEADER_SIZE: usize = 9;

///
/// ```text,ignore
/// Magic
///   |
///   v
/// RecordHeader
/// ^          |
/// |          |
/// --RecordBody
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// The 8 magic bytes at the start of the container.
    Magic,

    /// An opcode plus the length of the record body that follows.
    RecordHeader,

    /// The body of the record announced by the previous header.
    RecordBody { opcode: u8, len: u64 },

    /// A footer record was seen; everything after it (the trailing
    /// magic) is ignored.
    Done,
}

/// The stream decoder is a state machine which ingests byte chunks and
/// outputs schema/channel/message records once it has enough data to
/// frame one, preserving arrival order.
///
/// Chunk records are expanded inline: their nested records are queued
/// and drained before the outer stream advances, so ordering is
/// identical to the container's own record order.
pub struct McapStreamDecoder {
    byte_chunks: ByteChunkBuffer,
    state: State,

    /// Records recovered from an expanded chunk, drained FIFO.
    pending: VecDeque<Record>,
}

impl McapStreamDecoder {
    #[expect(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            byte_chunks: ByteChunkBuffer::new(),
            state: State::Magic,
            pending: VecDeque::new(),
        }
    }

    /// Feed a bunch of bytes to the decoding state machine.
    pub fn push_byte_chunk(&mut self, byte_chunk: Vec<u8>) {
        self.byte_chunks.push(byte_chunk);
    }

    /// `true` once a footer record has been consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done && self.pending.is_empty()
    }

    /// `true` if the decoder sits mid-record waiting for more bytes.
    ///
    /// Used to distinguish a clean end-of-source from a truncated one.
    pub fn has_partial_record(&self) -> bool {
        // A `RecordBody` state means a header announced a record whose
        // body never fully arrived, even if no bytes are buffered.
        self.state != State::Done
            && (matches!(self.state, State::RecordBody { .. }) || self.byte_chunks.has_pending())
    }

    /// Read the next classified record in the stream.
    ///
    /// Returns `Ok(None)` when more bytes are needed (or the stream has
    /// ended, see [`Self::is_done`]).
    pub fn try_read(&mut self) -> Result<Option<Record>, McapError> {
        if let Some(record) = self.pending.pop_front() {
            return Ok(Some(record));
        }

        match self.state {
            State::Magic => {
                if let Some(header) = self.byte_chunks.try_read(MAGIC.len()) {
                    if header != MAGIC {
                        return Err(McapError::MalformedContainer(format!(
                            "bad magic bytes {header:02x?}"
                        )));
                    }
                    log::trace!("Found MCAP magic");
                    self.state = State::RecordHeader;
                    // The current byte chunk may already hold the first
                    // record header; try again immediately.
                    return self.try_read();
                }
            }

            State::RecordHeader => {
                if let Some(bytes) = self.byte_chunks.try_read(RECORD_HEADER_SIZE) {
                    let opcode = bytes[0];
                    let len = LittleEndian::read_u64(&bytes[1..]);
                    log::trace!("Record header: opcode=0x{opcode:02x} len={len}");
                    self.state = State::RecordBody { opcode, len };
                    return self.try_read();
                }
            }

            State::RecordBody { opcode, len } => {
                let len = usize::try_from(len).map_err(|_| {
                    McapError::MalformedContainer(format!("record length {len} overflows usize"))
                })?;
                // Copied out so the framing buffer isn't borrowed while
                // chunk expansion pushes into `self.pending`.
                if let Some(body) = self.byte_chunks.try_read(len).map(<[u8]>::to_vec) {
                    if opcode == op::FOOTER {
                        self.state = State::Done;
                        return Ok(None);
                    }

                    self.state = State::RecordHeader;
                    match self.classify(opcode, &body)? {
                        Some(record) => return Ok(Some(record)),
                        // Skipped record kind; keep going.
                        None => return self.try_read(),
                    }
                }
            }

            State::Done => {}
        }

        Ok(None)
    }

    /// Turn one framed record into a [`Record`], expanding chunks and
    /// skipping record kinds the decode pipeline has no use for.
    fn classify(&mut self, opcode: u8, body: &[u8]) -> Result<Option<Record>, McapError> {
        match opcode {
            op::SCHEMA => Ok(Some(Record::Schema(Arc::new(SchemaRecord::parse(body)?)))),
            op::CHANNEL => Ok(Some(Record::Channel(Arc::new(ChannelRecord::parse(
                body,
            )?)))),
            op::MESSAGE => Ok(Some(Record::Message(MessageRecord::parse(body)?))),
            op::CHUNK => {
                self.expand_chunk(body)?;
                Ok(self.pending.pop_front())
            }
            _ => {
                log::trace!("Skipping record with opcode 0x{opcode:02x}");
                Ok(None)
            }
        }
    }

    /// Splits a chunk's nested records and queues them in order.
    fn expand_chunk(&mut self, body: &[u8]) -> Result<(), McapError> {
        let (header, records) = ChunkHeader::parse(body)?;

        let decompressed;
        let mut records = match header.compression.as_str() {
            "" => records,
            "lz4" => {
                let mut out = Vec::new();
                lz4_flex::frame::FrameDecoder::new(records)
                    .read_to_end(&mut out)
                    .map_err(|err| {
                        McapError::MalformedContainer(format!("corrupt lz4 chunk: {err}"))
                    })?;
                decompressed = out;
                &decompressed[..]
            }
            other => return Err(McapError::UnsupportedCompression(other.to_owned())),
        };

        while !records.is_empty() {
            if records.len() < RECORD_HEADER_SIZE {
                return Err(McapError::truncated("record header inside chunk"));
            }
            let opcode = records[0];
            let len = LittleEndian::read_u64(&records[1..RECORD_HEADER_SIZE]);
            let len = usize::try_from(len).map_err(|_| {
                McapError::MalformedContainer(format!("record length {len} overflows usize"))
            })?;
            records = &records[RECORD_HEADER_SIZE..];
            if records.len() < len {
                return Err(McapError::truncated("record inside chunk"));
            }
            let (body, rest) = records.split_at(len);
            records = rest;

            match opcode {
                op::SCHEMA => self
                    .pending
                    .push_back(Record::Schema(Arc::new(SchemaRecord::parse(body)?))),
                op::CHANNEL => self
                    .pending
                    .push_back(Record::Channel(Arc::new(ChannelRecord::parse(body)?))),
                op::MESSAGE => self
                    .pending
                    .push_back(Record::Message(MessageRecord::parse(body)?)),
                _ => log::trace!("Skipping record with opcode 0x{opcode:02x} inside chunk"),
            }
        }

        Ok(())
    }
}

/// A bunch of contiguous bytes.
type ByteChunk = Cursor<Vec<u8>>;

struct ByteChunkBuffer {
    /// Any incoming byte chunks are queued until they are emptied.
    queue: VecDeque<ByteChunk>,

    /// Scratch space for read bytes, so that `try_read` can return a
    /// contiguous slice.
    buffer: Vec<u8>,

    /// How many bytes of valid data are currently in `self.buffer`.
    buffer_fill: usize,
}

impl ByteChunkBuffer {
    fn new() -> Self {
        Self {
            queue: VecDeque::with_capacity(16),
            buffer: Vec::with_capacity(1024),
            buffer_fill: 0,
        }
    }

    fn push(&mut self, byte_chunk: Vec<u8>) {
        if byte_chunk.is_empty() {
            return;
        }
        self.queue.push_back(ByteChunk::new(byte_chunk));
    }

    fn has_pending(&self) -> bool {
        self.buffer_fill > 0 || self.queue.iter().any(|c| !is_byte_chunk_empty(c))
    }

    /// Attempt to read exactly `n` bytes out of the queued byte chunks.
    ///
    /// Returns `None` if there is not enough data to return a slice of
    /// `n` bytes.
    ///
    /// NOTE: `try_read` *must* be called with the same `n` until it
    /// returns `Some`, otherwise previously buffered data is discarded.
    fn try_read(&mut self, n: usize) -> Option<&[u8]> {
        if self.buffer.len() != n {
            assert_eq!(
                self.buffer_fill, 0,
                "`try_read` called with different `n` for incomplete read"
            );
            self.buffer.resize(n, 0);
            self.buffer_fill = 0;
        }

        // Read from the front of the queue until either the buffer is
        // full or we run out of byte chunks, discarding emptied chunks.
        while self.buffer_fill != n {
            if let Some(byte_chunk) = self.queue.front_mut() {
                let remainder = &mut self.buffer[self.buffer_fill..];
                self.buffer_fill += byte_chunk
                    .read(remainder)
                    .expect("reads from an in-memory cursor cannot fail");
                if is_byte_chunk_empty(byte_chunk) {
                    self.queue.pop_front();
                }
            } else {
                break;
            }
        }

        if self.buffer_fill == n {
            // Reset so that a repeated `try_read(n)` cannot return the
            // same bytes twice.
            self.buffer_fill = 0;
            Some(&self.buffer[..])
        } else {
            None
        }
    }
}

fn is_byte_chunk_empty(byte_chunk: &ByteChunk) -> bool {
    byte_chunk.position() >= byte_chunk.get_ref().len() as u64
}
