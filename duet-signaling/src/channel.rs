pub mod memory;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

use crate::error::ChannelError;
use async_trait::async_trait;
use duet_protocol::{CollectionPath, Fields};
use serde_json::Value;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A document as read from the signaling channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: CollectionPath,
    pub id: String,
    pub fields: Fields,
    /// Assigned by the store on first write.
    pub created_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The document started matching the subscribed query (or existed when subscribing).
    Added,
    /// A document matching the query before and after the write was changed.
    Modified,
    /// The document was deleted or stopped matching the query.
    Removed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

/// Set of documents a subscription observes.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: CollectionPath,
    document_id: Option<String>,
    filters: Vec<(String, Value)>,
}

impl Query {
    /// All documents of a collection.
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            document_id: None,
            filters: Vec::new(),
        }
    }

    /// A single document.
    pub fn document(collection: CollectionPath, id: impl Into<String>) -> Self {
        Self {
            collection,
            document_id: Some(id.into()),
            filters: Vec::new(),
        }
    }

    /// Restricts the query to documents whose top-level `field` equals `value`.
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn target(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn matches(&self, collection: &CollectionPath, id: &str, fields: &Fields) -> bool {
        if &self.collection != collection {
            return false;
        }
        if let Some(document_id) = &self.document_id
            && document_id != id
        {
            return false;
        }
        self.filters
            .iter()
            .all(|(field, value)| fields.get(field) == Some(value))
    }
}

/// Live view on a [`Query`]. Changes are yielded in the order the store applied them.
///
/// Dropping or cancelling the subscription stops delivery.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<DocumentChange>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<DocumentChange>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Waits for the next change. Returns `None` once the subscription was cancelled or the
    /// channel dropped it.
    pub async fn recv(&mut self) -> Option<DocumentChange> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            change = self.rx.recv() => change,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Shared document store with realtime subscriptions used to exchange call records.
#[async_trait]
pub trait SignalingChannel: Send + Sync + 'static {
    /// Creates the document or merges `fields` into the existing one.
    async fn create_or_update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError>;

    /// Merges `fields` into an existing document, failing with [`ChannelError::NotFound`] if
    /// it does not exist.
    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError>;

    async fn get_once(
        &self,
        collection: &CollectionPath,
        id: &str,
    ) -> Result<Option<Document>, ChannelError>;

    async fn subscribe(&self, query: Query) -> Result<Subscription, ChannelError>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), ChannelError>;

    /// Ids of all documents in a collection, in insertion order.
    async fn list_documents(&self, collection: &CollectionPath)
    -> Result<Vec<String>, ChannelError>;
}
