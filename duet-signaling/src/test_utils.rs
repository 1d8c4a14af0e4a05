use crate::channel::{ChangeKind, DocumentChange, Subscription};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait SubscriptionExt {
    async fn recv_with_timeout(&mut self, timeout: Duration) -> anyhow::Result<DocumentChange>;

    async fn recv_kind_with_timeout(
        &mut self,
        timeout: Duration,
        kind: ChangeKind,
    ) -> anyhow::Result<DocumentChange>;
}

#[async_trait]
impl SubscriptionExt for Subscription {
    async fn recv_with_timeout(&mut self, timeout: Duration) -> anyhow::Result<DocumentChange> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(Some(change)) => Ok(change),
            Ok(None) => Err(anyhow::anyhow!("Subscription closed")),
            Err(_) => Err(anyhow::anyhow!("Timeout")),
        }
    }

    async fn recv_kind_with_timeout(
        &mut self,
        timeout: Duration,
        kind: ChangeKind,
    ) -> anyhow::Result<DocumentChange> {
        loop {
            let change = self.recv_with_timeout(timeout).await?;
            if change.kind == kind {
                return Ok(change);
            }
        }
    }
}
