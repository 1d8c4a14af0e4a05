use crate::{Fields, RecordError};
use serde::{Deserialize, Serialize};

pub const FIELD_STATUS: &str = "status";
pub const FIELD_CALLER_ID: &str = "caller_id";
pub const FIELD_CALLEE_ID: &str = "receiver_id";
pub const FIELD_OFFER: &str = "offer";
pub const FIELD_ANSWER: &str = "answer";

/// Status of a call record as seen by both peers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// The initiator published its offer and waits for the responder.
    Ringing,
    /// The responder published its answer.
    Accepted,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Accepted => "accepted",
        }
    }
}

/// Shared record describing one call attempt, stored under its call id.
///
/// The offer is written exactly once by the initiator when the record is created, the answer
/// is written at most once by the responder, after the offer is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallRecord {
    pub status: CallStatus,
    #[serde(rename = "caller_id")]
    pub caller_id: String,
    #[serde(rename = "receiver_id")]
    pub callee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

impl CallRecord {
    /// Record published by the initiator, carrying its (already locally applied) offer.
    pub fn ringing(
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
        offer: impl Into<String>,
    ) -> Self {
        Self {
            status: CallStatus::Ringing,
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            offer: Some(offer.into()),
            answer: None,
        }
    }

    /// Fields merged into an existing record by the responder once its answer is applied locally.
    pub fn accepted_fields(answer: impl Into<String>) -> Fields {
        let mut fields = Fields::new();
        fields.insert(FIELD_ANSWER.to_string(), answer.into().into());
        fields.insert(
            FIELD_STATUS.to_string(),
            CallStatus::Accepted.as_str().into(),
        );
        fields
    }

    pub fn encode(&self) -> Result<Fields, RecordError> {
        crate::encode(self)
    }

    pub fn decode(fields: &Fields) -> Result<Self, RecordError> {
        crate::decode(fields)
    }

    pub fn is_ringing(&self) -> bool {
        self.status == CallStatus::Ringing
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn encode_ringing() {
        let fields = CallRecord::ringing("UserA", "UserB", "v=0").encode().unwrap();
        assert_eq!(
            serde_json::Value::Object(fields),
            json!({
                "status": "ringing",
                "caller_id": "UserA",
                "receiver_id": "UserB",
                "offer": "v=0",
            })
        );
    }

    #[test]
    fn decode_accepted() {
        let fields = json!({
            "status": "accepted",
            "caller_id": "UserA",
            "receiver_id": "UserB",
            "offer": "offer",
            "answer": "answer",
        });
        let serde_json::Value::Object(fields) = fields else {
            unreachable!()
        };

        let record = CallRecord::decode(&fields).unwrap();
        assert_eq!(record.status, CallStatus::Accepted);
        assert_eq!(record.callee_id, "UserB");
        assert_eq!(record.answer.as_deref(), Some("answer"));
    }

    #[test]
    fn decode_missing_caller() {
        let serde_json::Value::Object(fields) = json!({
            "status": "ringing",
            "receiver_id": "UserB",
            "offer": "offer",
        }) else {
            unreachable!()
        };

        let err = CallRecord::decode(&fields).unwrap_err();
        assert!(err.to_string().contains("caller_id"));
    }

    #[test]
    fn decode_unknown_status() {
        let serde_json::Value::Object(fields) = json!({
            "status": "declined",
            "caller_id": "UserA",
            "receiver_id": "UserB",
        }) else {
            unreachable!()
        };

        assert!(CallRecord::decode(&fields).is_err());
    }

    #[test]
    fn accepted_fields_merge() {
        let fields = CallRecord::accepted_fields("answer");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[FIELD_STATUS], json!("accepted"));
        assert_eq!(fields[FIELD_ANSWER], json!("answer"));
    }
}
