//! Hand-framed MCAP containers for pipeline tests.

use std::collections::BTreeMap;
use std::io::Write as _;

use fl_mcap::records::MAGIC;

const OP_HEADER: u8 = 0x01;
const OP_FOOTER: u8 = 0x02;
const OP_SCHEMA: u8 = 0x03;
const OP_CHANNEL: u8 = 0x04;
const OP_MESSAGE: u8 = 0x05;
const OP_CHUNK: u8 = 0x06;

/// Builds a container byte-by-byte, in whatever record order the test
/// asks for.
#[derive(Default)]
pub struct McapBuilder {
    buf: Vec<u8>,
}

impl McapBuilder {
    pub fn new() -> Self {
        let mut builder = Self::default();
        builder.buf.extend_from_slice(&MAGIC);
        builder.record(OP_HEADER, &{
            let mut body = Vec::new();
            put_string(&mut body, "mcap0"); // profile
            put_string(&mut body, "fleetlog-tests"); // library
            body
        });
        builder
    }

    fn record(&mut self, opcode: u8, body: &[u8]) {
        self.buf.push(opcode);
        self.buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(body);
    }

    pub fn schema(&mut self, id: u16, name: &str, encoding: &str, data: &[u8]) -> &mut Self {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_le_bytes());
        put_string(&mut body, name);
        put_string(&mut body, encoding);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        self.record(OP_SCHEMA, &body);
        self
    }

    pub fn channel(
        &mut self,
        id: u16,
        schema_id: u16,
        topic: &str,
        message_encoding: &str,
    ) -> &mut Self {
        let mut body = Vec::new();
        body.extend_from_slice(&id.to_le_bytes());
        body.extend_from_slice(&schema_id.to_le_bytes());
        put_string(&mut body, topic);
        put_string(&mut body, message_encoding);
        let metadata: BTreeMap<String, String> = BTreeMap::new();
        body.extend_from_slice(&(metadata.len() as u32).to_le_bytes());
        self.record(OP_CHANNEL, &body);
        self
    }

    /// Frame an arbitrary record; for tests that need a malformed or
    /// unsupported one.
    pub fn raw_record(&mut self, opcode: u8, body: &[u8]) -> &mut Self {
        self.record(opcode, body);
        self
    }

    pub fn message(&mut self, channel_id: u16, sequence: u32, log_time: u64, data: &[u8]) -> &mut Self {
        self.record(OP_MESSAGE, &message_body(channel_id, sequence, log_time, data));
        self
    }

    /// Wraps already-framed records (opcode + length + body, as built
    /// by [`Self::into_records`]) in a chunk record.
    pub fn chunk(&mut self, compression: &str, records: &[u8]) -> &mut Self {
        let compressed = match compression {
            "" => records.to_vec(),
            "lz4" => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
                encoder.write_all(records).unwrap();
                encoder.finish().unwrap()
            }
            other => panic!("test builder does not support {other:?} compression"),
        };

        let mut body = Vec::new();
        body.extend_from_slice(&0_u64.to_le_bytes()); // message start time
        body.extend_from_slice(&0_u64.to_le_bytes()); // message end time
        body.extend_from_slice(&(records.len() as u64).to_le_bytes());
        body.extend_from_slice(&0_u32.to_le_bytes()); // crc, unchecked
        put_string(&mut body, compression);
        body.extend_from_slice(&(compressed.len() as u64).to_le_bytes());
        body.extend_from_slice(&compressed);
        self.record(OP_CHUNK, &body);
        self
    }

    /// Finishes with a footer record and the trailing magic.
    pub fn finish(&mut self) -> Vec<u8> {
        self.record(OP_FOOTER, &[0; 20]);
        self.buf.extend_from_slice(&MAGIC);
        std::mem::take(&mut self.buf)
    }

    /// The framed records accumulated so far, without magic or header;
    /// for building chunk contents.
    pub fn into_records(self) -> Vec<u8> {
        let skip = MAGIC.len() + 9 + header_body_len();
        self.buf[skip..].to_vec()
    }
}

fn header_body_len() -> usize {
    4 + "mcap0".len() + 4 + "fleetlog-tests".len()
}

pub fn message_body(channel_id: u16, sequence: u32, log_time: u64, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&channel_id.to_le_bytes());
    body.extend_from_slice(&sequence.to_le_bytes());
    body.extend_from_slice(&log_time.to_le_bytes());
    body.extend_from_slice(&log_time.to_le_bytes()); // publish time
    body.extend_from_slice(data);
    body
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// The canonical test container: one JSON channel `/moods` with
/// `count` messages `{"happy": true, "level": <1-based index>}`.
pub fn moods_container(count: u64) -> Vec<u8> {
    let mut builder = McapBuilder::new();
    builder
        .schema(1, "Mood", "jsonschema", br#"{"type": "object"}"#)
        .channel(1, 1, "/moods", "json");
    for i in 0..count {
        let payload = format!(r#"{{"happy": true, "level": {}}}"#, i + 1);
        builder.message(1, i as u32, i * 1_000_000, payload.as_bytes());
    }
    builder.finish()
}
