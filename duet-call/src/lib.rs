pub mod config;
pub mod error;
pub mod machine;
pub mod negotiation;
pub mod phase;
pub mod relay;
pub mod session;
pub mod teardown;
#[cfg(feature = "test-utils")]
pub mod test_utils;

mod actor;

pub use config::CallConfig;
pub use error::CallError;
pub use machine::{CallEvent, CallState, CallStateMachine, EndReason};
pub use phase::{Phase, Trigger};
pub use session::CandidateCounters;

pub use duet_protocol as protocol;
pub use duet_signaling as signaling;
pub use duet_webrtc as webrtc;
