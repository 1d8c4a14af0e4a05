use crate::channel::memory::MemoryChannel;
use crate::channel::{Document, Query, SignalingChannel, Subscription};
use crate::error::ChannelError;
use async_trait::async_trait;
use duet_protocol::{CollectionPath, Fields};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateOrUpdate,
    Update,
    Get,
    Subscribe,
    Delete,
    List,
}

/// A single call into the channel, recorded before it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub collection: CollectionPath,
    pub id: Option<String>,
}

#[derive(Debug)]
struct Failure {
    kind: OperationKind,
    collection: CollectionPath,
    id: Option<String>,
}

/// [`MemoryChannel`] wrapper journaling every operation in call order, with optional injected
/// failures and delays.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    inner: MemoryChannel,
    journal: Mutex<Vec<Operation>>,
    failures: Mutex<Vec<Failure>>,
    delays: Mutex<HashMap<OperationKind, Duration>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &MemoryChannel {
        &self.inner
    }

    pub fn operations(&self) -> Vec<Operation> {
        self.journal.lock().clone()
    }

    pub fn clear_operations(&self) {
        self.journal.lock().clear();
    }

    /// Makes every `kind` operation on `collection` fail until [`Self::clear_failures`] is called.
    /// When `id` is given, only operations on that document fail.
    pub fn fail(&self, kind: OperationKind, collection: CollectionPath, id: Option<&str>) {
        self.failures.lock().push(Failure {
            kind,
            collection,
            id: id.map(str::to_string),
        });
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Delays every `kind` operation by `delay` before it is executed.
    pub fn delay(&self, kind: OperationKind, delay: Duration) {
        self.delays.lock().insert(kind, delay);
    }

    async fn record(
        &self,
        kind: OperationKind,
        collection: &CollectionPath,
        id: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.journal.lock().push(Operation {
            kind,
            collection: collection.clone(),
            id: id.map(str::to_string),
        });

        let delay = self.delays.lock().get(&kind).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self.failures.lock().iter().any(|failure| {
            failure.kind == kind
                && &failure.collection == collection
                && (failure.id.is_none() || failure.id.as_deref() == id)
        });
        if failed {
            tracing::debug!(?kind, %collection, ?id, "Injecting channel failure");
            return Err(ChannelError::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingChannel for RecordingChannel {
    async fn create_or_update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        self.record(OperationKind::CreateOrUpdate, collection, Some(id))
            .await?;
        self.inner.create_or_update(collection, id, fields).await
    }

    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        self.record(OperationKind::Update, collection, Some(id))
            .await?;
        self.inner.update(collection, id, fields).await
    }

    async fn get_once(
        &self,
        collection: &CollectionPath,
        id: &str,
    ) -> Result<Option<Document>, ChannelError> {
        self.record(OperationKind::Get, collection, Some(id)).await?;
        self.inner.get_once(collection, id).await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, ChannelError> {
        self.record(OperationKind::Subscribe, query.target(), None)
            .await?;
        self.inner.subscribe(query).await
    }

    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), ChannelError> {
        self.record(OperationKind::Delete, collection, Some(id))
            .await?;
        self.inner.delete(collection, id).await
    }

    async fn list_documents(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<String>, ChannelError> {
        self.record(OperationKind::List, collection, None).await?;
        self.inner.list_documents(collection).await
    }
}
