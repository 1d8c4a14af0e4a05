use crate::channel::{ChangeKind, Document, DocumentChange, Query, SignalingChannel, Subscription};
use crate::error::ChannelError;
use async_trait::async_trait;
use duet_protocol::{CollectionPath, Fields};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    fields: Fields,
    created_at: SystemTime,
}

#[derive(Debug, Default)]
struct Collection {
    /// Documents keyed by insertion sequence, so iteration follows insertion order.
    documents: BTreeMap<u64, StoredDocument>,
    index: HashMap<String, u64>,
}

impl Collection {
    fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.index.get(id).and_then(|seq| self.documents.get(seq))
    }
}

#[derive(Debug)]
struct Listener {
    query: Query,
    tx: mpsc::UnboundedSender<DocumentChange>,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<CollectionPath, Collection>,
    listeners: Vec<Listener>,
    next_seq: u64,
}

impl Inner {
    fn contains(&self, collection: &CollectionPath, id: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|c| c.index.contains_key(id))
    }

    fn ensure_parent(&self, collection: &CollectionPath) -> Result<(), ChannelError> {
        if let Some((parent, parent_id)) = collection.parent_document()
            && !self.contains(&parent, &parent_id)
        {
            return Err(ChannelError::ParentMissing(format!("{parent}/{parent_id}")));
        }
        Ok(())
    }

    /// Writes `fields` and notifies listeners while still holding the lock, so every listener
    /// observes writes in the order they were applied.
    fn write(
        &mut self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
        must_exist: bool,
    ) -> Result<(), ChannelError> {
        if !self.contains(collection, id) {
            if must_exist {
                return Err(ChannelError::NotFound(format!("{collection}/{id}")));
            }
            self.ensure_parent(collection)?;
        }

        let seq = self.next_seq;
        let entry = self.collections.entry(collection.clone()).or_default();
        let (before, after) = match entry.index.get(id).copied() {
            Some(existing) => {
                let Some(document) = entry.documents.get_mut(&existing) else {
                    return Err(ChannelError::NotFound(format!("{collection}/{id}")));
                };
                let before = document.clone();
                document.fields.extend(fields);
                (Some(before), document.clone())
            }
            None => {
                let document = StoredDocument {
                    id: id.to_string(),
                    fields,
                    created_at: SystemTime::now(),
                };
                entry.documents.insert(seq, document.clone());
                entry.index.insert(id.to_string(), seq);
                self.next_seq += 1;
                (None, document)
            }
        };

        self.notify(collection, before.as_ref(), Some(&after));
        Ok(())
    }

    fn remove(&mut self, collection: &CollectionPath, id: &str) -> Option<StoredDocument> {
        let entry = self.collections.get_mut(collection)?;
        let seq = entry.index.remove(id)?;
        let removed = entry.documents.remove(&seq);
        if entry.documents.is_empty() {
            self.collections.remove(collection);
        }
        if let Some(removed) = &removed {
            self.notify(collection, Some(removed), None);
        }
        removed
    }

    fn notify(
        &mut self,
        collection: &CollectionPath,
        before: Option<&StoredDocument>,
        after: Option<&StoredDocument>,
    ) {
        self.listeners
            .retain(|listener| !listener.cancel.is_cancelled() && !listener.tx.is_closed());

        for listener in &self.listeners {
            let matched_before = before
                .is_some_and(|doc| listener.query.matches(collection, &doc.id, &doc.fields));
            let matched_after = after
                .is_some_and(|doc| listener.query.matches(collection, &doc.id, &doc.fields));

            let change = match (matched_before, matched_after, after) {
                (false, true, Some(doc)) => (ChangeKind::Added, doc),
                (true, true, Some(doc)) => (ChangeKind::Modified, doc),
                (true, false, Some(doc)) => (ChangeKind::Removed, doc),
                (true, _, None) => match before {
                    Some(doc) => (ChangeKind::Removed, doc),
                    None => continue,
                },
                _ => continue,
            };

            let change = DocumentChange {
                kind: change.0,
                document: to_document(collection, change.1),
            };
            if let Err(err) = listener.tx.send(change) {
                tracing::trace!(?err, "Listener dropped, skipping change");
            }
        }
    }
}

fn to_document(collection: &CollectionPath, stored: &StoredDocument) -> Document {
    Document {
        collection: collection.clone(),
        id: stored.id.clone(),
        fields: stored.fields.clone(),
        created_at: stored.created_at,
    }
}

/// In-process [`SignalingChannel`] shared by all peers holding a clone of its [`std::sync::Arc`].
///
/// Documents keep their insertion order, nested collections require their parent document to
/// exist when a document is first written into them, and subscribers receive changes
/// synchronously with the write that caused them.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    inner: Mutex<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions, mainly useful in tests.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner
            .listeners
            .retain(|listener| !listener.cancel.is_cancelled() && !listener.tx.is_closed());
        inner.listeners.len()
    }
}

#[async_trait]
impl SignalingChannel for MemoryChannel {
    #[instrument(level = "trace", skip(self, fields), err)]
    async fn create_or_update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        tracing::trace!("Writing document to memory channel");
        self.inner.lock().write(collection, id, fields, false)
    }

    #[instrument(level = "trace", skip(self, fields), err)]
    async fn update(
        &self,
        collection: &CollectionPath,
        id: &str,
        fields: Fields,
    ) -> Result<(), ChannelError> {
        tracing::trace!("Updating document in memory channel");
        self.inner.lock().write(collection, id, fields, true)
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn get_once(
        &self,
        collection: &CollectionPath,
        id: &str,
    ) -> Result<Option<Document>, ChannelError> {
        let inner = self.inner.lock();
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|stored| to_document(collection, stored)))
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn subscribe(&self, query: Query) -> Result<Subscription, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let mut inner = self.inner.lock();
        if let Some(collection) = inner.collections.get(query.target()) {
            for stored in collection.documents.values() {
                if query.matches(query.target(), &stored.id, &stored.fields) {
                    let change = DocumentChange {
                        kind: ChangeKind::Added,
                        document: to_document(query.target(), stored),
                    };
                    if tx.send(change).is_err() {
                        return Err(ChannelError::Closed);
                    }
                }
            }
        }

        tracing::trace!("Registering listener");
        inner.listeners.push(Listener {
            query,
            tx,
            cancel: cancel.clone(),
        });

        Ok(Subscription::new(rx, cancel))
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn delete(&self, collection: &CollectionPath, id: &str) -> Result<(), ChannelError> {
        if self.inner.lock().remove(collection, id).is_none() {
            tracing::trace!("Document already absent");
        }
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn list_documents(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<String>, ChannelError> {
        let inner = self.inner.lock();
        Ok(inner
            .collections
            .get(collection)
            .map(|c| c.documents.values().map(|d| d.id.clone()).collect())
            .unwrap_or_default())
    }
}
