use duet_webrtc::ConnectivityState;
use std::fmt::{Display, Formatter};

/// Lifecycle phase of the call state machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Outgoing,
    Incoming {
        caller_id: String,
    },
    Active,
    /// Teardown in progress.
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Dial,
    Ring { caller_id: String },
    Connected,
    Hangup,
    TornDown,
}

impl Trigger {
    /// `Connected` for established connectivity, `Hangup` for every state the session cannot
    /// recover from.
    pub fn from_connectivity(state: ConnectivityState) -> Option<Self> {
        if state.is_terminal() {
            Some(Trigger::Hangup)
        } else if state == ConnectivityState::Connected {
            Some(Trigger::Connected)
        } else {
            None
        }
    }
}

impl Phase {
    /// Returns the phase `trigger` leads to, or `None` if the trigger is not valid in this phase.
    pub fn next(&self, trigger: &Trigger) -> Option<Phase> {
        match (self, trigger) {
            (Phase::Idle, Trigger::Dial) => Some(Phase::Outgoing),
            (Phase::Idle, Trigger::Ring { caller_id }) => Some(Phase::Incoming {
                caller_id: caller_id.clone(),
            }),
            (Phase::Outgoing | Phase::Incoming { .. }, Trigger::Connected) => Some(Phase::Active),
            (Phase::Outgoing | Phase::Incoming { .. } | Phase::Active, Trigger::Hangup) => {
                Some(Phase::Ended)
            }
            (Phase::Ended, Trigger::TornDown) => Some(Phase::Idle),
            (Phase::Idle, Trigger::Connected | Trigger::Hangup | Trigger::TornDown)
            | (Phase::Outgoing | Phase::Incoming { .. }, Trigger::Dial | Trigger::Ring { .. })
            | (Phase::Outgoing | Phase::Incoming { .. } | Phase::Active, Trigger::TornDown)
            | (Phase::Active, Trigger::Dial | Trigger::Ring { .. } | Trigger::Connected)
            | (
                Phase::Ended,
                Trigger::Dial | Trigger::Ring { .. } | Trigger::Connected | Trigger::Hangup,
            ) => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Outgoing => f.write_str("outgoing"),
            Phase::Incoming { caller_id } => write!(f, "incoming({caller_id})"),
            Phase::Active => f.write_str("active"),
            Phase::Ended => f.write_str("ended"),
        }
    }
}
