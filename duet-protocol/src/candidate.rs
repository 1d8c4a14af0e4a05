use crate::{Fields, RecordError};
use serde::{Deserialize, Serialize};

/// A single reachability candidate appended by one peer for the other to apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CandidateRecord {
    /// Opaque transport description produced by the media engine.
    #[serde(rename = "candidate")]
    pub payload: String,
    #[serde(rename = "sdpMLineIndex")]
    pub media_line_index: u16,
    /// Media stream identification tag, may be empty but must be present.
    #[serde(rename = "sdpMid")]
    pub media_id: String,
}

impl CandidateRecord {
    pub fn new(
        payload: impl Into<String>,
        media_line_index: u16,
        media_id: impl Into<String>,
    ) -> Self {
        Self {
            payload: payload.into(),
            media_line_index,
            media_id: media_id.into(),
        }
    }

    pub fn encode(&self) -> Result<Fields, RecordError> {
        crate::encode(self)
    }

    pub fn decode(fields: &Fields) -> Result<Self, RecordError> {
        crate::decode(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            serde_json::Value::Object(fields) => fields,
            _ => unreachable!(),
        }
    }

    #[test]
    fn encode_uses_store_field_names() {
        let record = CandidateRecord::new(
            "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
            0,
            "0",
        );
        assert_eq!(
            serde_json::Value::Object(record.encode().unwrap()),
            json!({
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host",
                "sdpMLineIndex": 0,
                "sdpMid": "0",
            })
        );
    }

    #[test]
    fn decode_empty_media_id() {
        let record = CandidateRecord::decode(&fields(json!({
            "candidate": "candidate:2",
            "sdpMLineIndex": 1,
            "sdpMid": "",
        })))
        .unwrap();
        assert_eq!(record, CandidateRecord::new("candidate:2", 1, ""));
    }

    #[test]
    fn decode_missing_payload() {
        let err = CandidateRecord::decode(&fields(json!({
            "sdpMLineIndex": 0,
            "sdpMid": "0",
        })))
        .unwrap_err();
        assert!(err.to_string().contains("candidate"));
    }

    #[test]
    fn decode_missing_media_id() {
        assert!(
            CandidateRecord::decode(&fields(json!({
                "candidate": "candidate:3",
                "sdpMLineIndex": 0,
            })))
            .is_err()
        );
    }

    #[test]
    fn decode_negative_line_index() {
        assert!(
            CandidateRecord::decode(&fields(json!({
                "candidate": "candidate:4",
                "sdpMLineIndex": -1,
                "sdpMid": "0",
            })))
            .is_err()
        );
    }
}
