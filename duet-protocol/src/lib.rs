pub mod call;
pub mod candidate;
pub mod error;
pub mod path;

pub use call::{CallRecord, CallStatus};
pub use candidate::CandidateRecord;
pub use error::RecordError;
pub use path::{CollectionLayout, CollectionPath};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Top-level fields of a document stored in the signaling channel.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Which side of a call a peer plays. Candidate collections are scoped by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The peer that created the call record and published the offer.
    Initiator,
    /// The peer that picked up the ringing record and published the answer.
    Responder,
}

impl Role {
    pub fn opposite(self) -> Self {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

/// Serializes a record into the field map stored in the signaling channel.
pub fn encode<T: Serialize>(record: &T) -> Result<Fields, RecordError> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(fields) => Ok(fields),
        other => Err(RecordError::NotAnObject(other.to_string())),
    }
}

/// Deserializes a record from the field map stored in the signaling channel.
pub fn decode<T: DeserializeOwned>(fields: &Fields) -> Result<T, RecordError> {
    Ok(serde_json::from_value(serde_json::Value::Object(
        fields.clone(),
    ))?)
}
