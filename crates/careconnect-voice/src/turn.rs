//! Turn signal: who holds the floor right now.

use serde::Serialize;

/// `(is_listening, is_speaking, is_loading)`. Listening and speaking are never both set:
/// [`start_listening`](Self::start_listening) refuses while anything else is in progress,
/// and [`start_speaking`](Self::start_speaking) requires listening to have been stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TurnSignal {
    is_listening: bool,
    is_speaking: bool,
    is_loading: bool,
}

impl TurnSignal {
    pub fn is_listening(&self) -> bool {
        self.is_listening
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    /// Nobody holds the floor: auto-listen may arm.
    pub fn is_idle(&self) -> bool {
        !self.is_listening && !self.is_speaking && !self.is_loading
    }

    /// Returns `false` (and changes nothing) unless idle.
    pub fn start_listening(&mut self) -> bool {
        if !self.is_idle() {
            return false;
        }
        self.is_listening = true;
        true
    }

    pub fn stop_listening(&mut self) {
        self.is_listening = false;
    }

    /// Returns `false` while listening.
    pub fn start_speaking(&mut self) -> bool {
        if self.is_listening {
            return false;
        }
        self.is_speaking = true;
        true
    }

    pub fn stop_speaking(&mut self) {
        self.is_speaking = false;
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.is_loading = loading;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listening_and_speaking_exclude_each_other() {
        let mut s = TurnSignal::default();
        assert!(s.start_listening());
        assert!(!s.start_speaking());
        s.stop_listening();
        assert!(s.start_speaking());
        assert!(!s.start_listening());
        assert!(!(s.is_listening() && s.is_speaking()));
    }

    #[test]
    fn loading_blocks_listening() {
        let mut s = TurnSignal::default();
        s.set_loading(true);
        assert!(!s.is_idle());
        assert!(!s.start_listening());
        s.set_loading(false);
        assert!(s.is_idle());
    }
}
