use serde::{Deserialize, Serialize};

use super::error::StreamError;

/// Device session state machine.
///
/// State transitions:
/// ```text
/// closed → ready → streaming → stopped → closed
///            ↑                    │
///            └── (close) ─────────┘   stopped → streaming (playback replay)
/// ```
/// Open failures leave the session closed. Submit failures keep it streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Closed,
    Ready,
    Streaming,
    Stopped,
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Closed, Ready)
                | (Ready, Streaming)
                | (Streaming, Streaming)
                | (Ready, Stopped)
                | (Streaming, Stopped)
                | (Stopped, Stopped)
                | (Stopped, Streaming)
                | (Ready, Closed)
                | (Streaming, Closed)
                | (Stopped, Closed)
                | (Closed, Closed)
        )
    }

    /// Validated transition.
    pub fn transition(&mut self, next: SessionState) -> Result<(), StreamError> {
        if !self.can_transition_to(next) {
            return Err(StreamError::InvalidState(format!(
                "cannot go from {:?} to {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut state = SessionState::Closed;
        for next in [
            SessionState::Ready,
            SessionState::Streaming,
            SessionState::Stopped,
            SessionState::Closed,
        ] {
            state.transition(next).unwrap();
        }
        assert!(!state.is_open());
    }

    #[test]
    fn cannot_stream_from_closed() {
        let mut state = SessionState::Closed;
        assert!(state.transition(SessionState::Streaming).is_err());
        assert_eq!(state, SessionState::Closed);
    }

    #[test]
    fn reset_and_close_are_repeatable() {
        let mut state = SessionState::Streaming;
        state.transition(SessionState::Stopped).unwrap();
        state.transition(SessionState::Stopped).unwrap();
        state.transition(SessionState::Closed).unwrap();
        state.transition(SessionState::Closed).unwrap();
    }
}
