//! Session lifecycle transitions.
//!
//! ```text
//! Issued ──start──▶ Started ──complete──▶ Completed
//!   │                  │
//!   ├──close──▶ Closed ◀──close──┤
//!   └──error──▶ Errored ◀─error──┘
//! ```
//!
//! `Completed`, `Closed` and `Errored` are terminal. Only `Started → Completed`
//! grants a reward.

use crate::error::Error;
use crate::types::{EventType, SessionState};

/// A legal edge taken by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SessionState,
    pub to: SessionState,
    pub event: EventType,
}

impl Transition {
    /// Resolves the edge for `event` leaving `from`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IllegalTransition`] for any pair outside the table.
    pub fn resolve(from: SessionState, event: EventType) -> Result<Self, Error> {
        use EventType as E;
        use SessionState as S;

        let to = match (from, event) {
            (S::Issued, E::Start) => S::Started,
            (S::Started, E::Complete) => S::Completed,
            (S::Issued | S::Started, E::Close) => S::Closed,
            (S::Issued | S::Started, E::Error) => S::Errored,
            (state, event) => return Err(Error::IllegalTransition { state, event }),
        };
        Ok(Self { from, to, event })
    }

    /// True only for the edge that triggers a postback.
    #[must_use]
    pub fn grants_reward(&self) -> bool {
        self.from == SessionState::Started && self.to == SessionState::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [SessionState; 5] = [
        SessionState::Issued,
        SessionState::Started,
        SessionState::Completed,
        SessionState::Closed,
        SessionState::Errored,
    ];
    const EVENTS: [EventType; 4] = [
        EventType::Start,
        EventType::Complete,
        EventType::Close,
        EventType::Error,
    ];

    #[test]
    fn transition_table_is_complete() {
        let legal = [
            (SessionState::Issued, EventType::Start, SessionState::Started),
            (SessionState::Issued, EventType::Close, SessionState::Closed),
            (SessionState::Issued, EventType::Error, SessionState::Errored),
            (SessionState::Started, EventType::Complete, SessionState::Completed),
            (SessionState::Started, EventType::Close, SessionState::Closed),
            (SessionState::Started, EventType::Error, SessionState::Errored),
        ];

        for from in STATES {
            for event in EVENTS {
                let expected = legal
                    .iter()
                    .find(|(s, e, _)| *s == from && *e == event)
                    .map(|(_, _, to)| *to);
                match (Transition::resolve(from, event), expected) {
                    (Ok(t), Some(to)) => assert_eq!(t.to, to, "{from} --{event}-->"),
                    (Err(Error::IllegalTransition { state, event: e }), None) => {
                        assert_eq!(state, from);
                        assert_eq!(e, event);
                    }
                    (got, want) => panic!("{from} --{event}--> got {got:?}, want {want:?}"),
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in STATES.into_iter().filter(|s| s.is_terminal()) {
            for event in EVENTS {
                assert!(Transition::resolve(from, event).is_err());
            }
        }
    }

    #[test]
    fn only_completion_grants_reward() {
        for from in STATES {
            for event in EVENTS {
                if let Ok(t) = Transition::resolve(from, event) {
                    assert_eq!(
                        t.grants_reward(),
                        from == SessionState::Started && event == EventType::Complete
                    );
                }
            }
        }
    }

    #[test]
    fn complete_straight_from_issued_is_illegal() {
        assert!(matches!(
            Transition::resolve(SessionState::Issued, EventType::Complete),
            Err(Error::IllegalTransition {
                state: SessionState::Issued,
                event: EventType::Complete,
            })
        ));
    }
}
