pub mod channel;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::memory::MemoryChannel;
pub use channel::{ChangeKind, Document, DocumentChange, Query, SignalingChannel, Subscription};
pub use duet_protocol as protocol;
