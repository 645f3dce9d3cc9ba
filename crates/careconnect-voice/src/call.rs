//! Call lifecycle states.

use serde::Serialize;
use std::fmt;

/// `idle → consenting → connecting → active ⇄ ending → ended`.
///
/// `ended` is terminal; `connecting` and `active` may also hang up straight to `ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Idle,
    Consenting,
    Connecting,
    Active,
    Ending,
    Ended,
}

impl CallState {
    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Consenting)
                | (Idle, Connecting)
                | (Consenting, Connecting)
                | (Connecting, Active)
                | (Connecting, Ended)
                | (Active, Ending)
                | (Active, Ended)
                | (Ending, Active)
                | (Ending, Ended)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CallState::Ended
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallState::Idle => "idle",
            CallState::Consenting => "consenting",
            CallState::Connecting => "connecting",
            CallState::Active => "active",
            CallState::Ending => "ending",
            CallState::Ended => "ended",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CallState; 6] = [
        CallState::Idle,
        CallState::Consenting,
        CallState::Connecting,
        CallState::Active,
        CallState::Ending,
        CallState::Ended,
    ];

    #[test]
    fn nothing_leaves_ended() {
        for next in ALL {
            assert!(!CallState::Ended.can_transition_to(next));
        }
    }

    #[test]
    fn ending_can_resume_or_hang_up() {
        assert!(CallState::Ending.can_transition_to(CallState::Active));
        assert!(CallState::Ending.can_transition_to(CallState::Ended));
        assert!(!CallState::Ending.can_transition_to(CallState::Connecting));
        assert!(!CallState::Active.can_transition_to(CallState::Connecting));
    }
}
