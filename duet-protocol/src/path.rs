use crate::Role;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Slash separated path of a collection, e.g. `calls` or `calls/<id>/localCandidates`.
///
/// Collections nested below a document always have an odd number of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_string())
    }

    /// Path of a collection nested below the document `id` of this collection.
    pub fn child(&self, id: &str, name: &str) -> Self {
        Self(format!("{}/{id}/{name}", self.0))
    }

    /// Collection and id of the document this collection is nested below, if any.
    pub fn parent_document(&self) -> Option<(CollectionPath, String)> {
        let (parent, _) = self.0.rsplit_once('/')?;
        let (collection, id) = parent.rsplit_once('/')?;
        Some((CollectionPath(collection.to_string()), id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CollectionPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the collections a call is stored in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionLayout {
    pub calls: String,
    pub initiator_candidates: String,
    pub responder_candidates: String,
}

impl Default for CollectionLayout {
    fn default() -> Self {
        Self {
            calls: "calls".to_string(),
            initiator_candidates: "localCandidates".to_string(),
            responder_candidates: "remoteCandidates".to_string(),
        }
    }
}

impl CollectionLayout {
    pub fn calls(&self) -> CollectionPath {
        CollectionPath::new(self.calls.as_str())
    }

    /// Collection holding the candidates appended by the peer playing `role` in call `call_id`.
    pub fn candidates(&self, call_id: &str, role: Role) -> CollectionPath {
        let name = match role {
            Role::Initiator => &self.initiator_candidates,
            Role::Responder => &self.responder_candidates,
        };
        self.calls().child(call_id, name)
    }
}
