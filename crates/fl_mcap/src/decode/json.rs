//! JSON message decoding. Always available, needs no schema.

use anyhow::Context as _;

use crate::decode::{well_known, Decoder, DecoderFactory};
use crate::records::{MessageRecord, SchemaRecord};
use crate::value::Value;

pub struct JsonDecoderFactory;

impl DecoderFactory for JsonDecoderFactory {
    fn decoder_for(
        &self,
        message_encoding: &str,
        _schema: Option<&SchemaRecord>,
    ) -> Option<Box<dyn Decoder>> {
        (message_encoding == well_known::message_encoding::JSON)
            .then(|| Box::new(JsonDecoder) as Box<dyn Decoder>)
    }
}

struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(
        &mut self,
        _schema: Option<&SchemaRecord>,
        message: &MessageRecord,
    ) -> anyhow::Result<Value> {
        let json: serde_json::Value =
            serde_json::from_slice(&message.data).context("invalid JSON payload")?;
        Ok(Value::from(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_json_payload() {
        let message = MessageRecord {
            channel_id: 1,
            sequence: 0,
            log_time: 0,
            publish_time: 0,
            data: br#"{"happy": true, "level": 4}"#.to_vec(),
        };
        let value = JsonDecoder.decode(None, &message).unwrap();
        assert_eq!(value.get("level").and_then(Value::as_f64), Some(4.0));
    }

    #[test]
    fn rejects_non_json_payload() {
        let message = MessageRecord {
            channel_id: 1,
            sequence: 0,
            log_time: 0,
            publish_time: 0,
            data: vec![0xff, 0xfe],
        };
        assert!(JsonDecoder.decode(None, &message).is_err());
    }

    #[test]
    fn factory_only_accepts_json() {
        assert!(JsonDecoderFactory.decoder_for("json", None).is_some());
        assert!(JsonDecoderFactory.decoder_for("cdr", None).is_none());
    }
}
