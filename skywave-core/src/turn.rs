//! Turn state machine — the single source of truth for what the agent is
//! doing on the channel.
//!
//! ```text
//! IdleListening ──SpeechStart──► ReceivingSpeech ──SpeechEnd──► Thinking
//!       ▲                              ▲   │                       │
//!       │                              │   └──(pending TX)──► WaitingForChannelClear
//!       │                              │                          │   ▲
//!       │                              └───────SpeechStart────────┘   │
//!       │                                                (channel_clear)
//!       └────────playback_complete──── Transmitting ◄─────────────────┘
//! ```
//!
//! `Transmitting → IdleListening` is the only transition that arms the
//! post-transmission guard timer.

use tracing::{debug, warn};

/// Canonical agent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    IdleListening,
    ReceivingSpeech,
    Thinking,
    Transmitting,
    WaitingForChannelClear,
}

/// Where a SpeechEnd sends the machine; decided by the orchestrator from
/// wake-word mode and pending-response context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechEndDisposition {
    /// Normal turn: transcribe and plan.
    Process,
    /// Wake-word mode and the command was absent — drop silently.
    Dropped,
    /// A response is already prepared; wait for the channel to clear.
    ResponsePending,
}

/// Events driving the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEvent {
    SpeechStart {
        /// Barge-in during our own transmission is only honored when the
        /// caller marks it as an emergency.
        emergency: bool,
    },
    SpeechEnd(SpeechEndDisposition),
    ResponseReady {
        /// Another party is on the channel at response-ready time.
        channel_busy: bool,
    },
    ChannelClear,
    PlaybackComplete,
}

/// A committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: TurnState,
    pub to: TurnState,
}

impl Transition {
    /// True for the one transition that arms the guard timer.
    pub fn arms_guard(&self) -> bool {
        self.from == TurnState::Transmitting && self.to == TurnState::IdleListening
    }
}

#[derive(Debug)]
pub struct TurnStateMachine {
    state: TurnState,
}

impl Default for TurnStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnStateMachine {
    pub fn new() -> Self {
        Self {
            state: TurnState::IdleListening,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Apply an event. Returns the committed transition, or `None` when the
    /// event is not legal in the current state (state unchanged, logged).
    pub fn apply(&mut self, event: TurnEvent) -> Option<Transition> {
        use TurnState::*;

        let to = match (self.state, event) {
            (IdleListening, TurnEvent::SpeechStart { .. }) => Some(ReceivingSpeech),
            (WaitingForChannelClear, TurnEvent::SpeechStart { .. }) => Some(ReceivingSpeech),
            (Transmitting, TurnEvent::SpeechStart { emergency: true }) => Some(ReceivingSpeech),

            (ReceivingSpeech, TurnEvent::SpeechEnd(SpeechEndDisposition::Process)) => {
                Some(Thinking)
            }
            (ReceivingSpeech, TurnEvent::SpeechEnd(SpeechEndDisposition::Dropped)) => {
                Some(IdleListening)
            }
            (ReceivingSpeech, TurnEvent::SpeechEnd(SpeechEndDisposition::ResponsePending)) => {
                Some(WaitingForChannelClear)
            }

            (Thinking, TurnEvent::ResponseReady { channel_busy: false }) => Some(Transmitting),
            (Thinking, TurnEvent::ResponseReady { channel_busy: true }) => {
                Some(WaitingForChannelClear)
            }

            (WaitingForChannelClear, TurnEvent::ChannelClear) => Some(Transmitting),
            (Transmitting, TurnEvent::PlaybackComplete) => Some(IdleListening),

            _ => None,
        };

        match to {
            Some(to) => {
                let transition = Transition {
                    from: self.state,
                    to,
                };
                debug!(from = ?transition.from, to = ?transition.to, "turn transition");
                self.state = to;
                Some(transition)
            }
            None => {
                warn!(state = ?self.state, ?event, "rejected turn event");
                None
            }
        }
    }

    /// Force the machine back to listening. Used by turn-recovery paths so a
    /// failed turn always closes in bounded time.
    pub fn recover_to_idle(&mut self) {
        if self.state != TurnState::IdleListening {
            debug!(from = ?self.state, "recovering to IdleListening");
            self.state = TurnState::IdleListening;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SpeechEndDisposition::*;
    use TurnState::*;

    fn machine_in(state: TurnState) -> TurnStateMachine {
        let mut m = TurnStateMachine::new();
        m.state = state;
        m
    }

    #[test]
    fn happy_path_full_turn() {
        let mut m = TurnStateMachine::new();
        assert_eq!(m.state(), IdleListening);

        m.apply(TurnEvent::SpeechStart { emergency: false }).unwrap();
        assert_eq!(m.state(), ReceivingSpeech);

        m.apply(TurnEvent::SpeechEnd(Process)).unwrap();
        assert_eq!(m.state(), Thinking);

        let t = m
            .apply(TurnEvent::ResponseReady { channel_busy: false })
            .unwrap();
        assert_eq!(t.to, Transmitting);
        assert!(!t.arms_guard());

        let t = m.apply(TurnEvent::PlaybackComplete).unwrap();
        assert!(t.arms_guard());
        assert_eq!(m.state(), IdleListening);
    }

    #[test]
    fn wake_word_miss_drops_back_to_idle() {
        let mut m = machine_in(ReceivingSpeech);
        let t = m.apply(TurnEvent::SpeechEnd(Dropped)).unwrap();
        assert_eq!(t.to, IdleListening);
        assert!(!t.arms_guard());
    }

    #[test]
    fn pending_response_waits_for_channel_clear() {
        let mut m = machine_in(ReceivingSpeech);
        m.apply(TurnEvent::SpeechEnd(ResponsePending)).unwrap();
        assert_eq!(m.state(), WaitingForChannelClear);

        // Someone else keys up again: go back to receiving.
        m.apply(TurnEvent::SpeechStart { emergency: false }).unwrap();
        assert_eq!(m.state(), ReceivingSpeech);

        m.apply(TurnEvent::SpeechEnd(ResponsePending)).unwrap();
        m.apply(TurnEvent::ChannelClear).unwrap();
        assert_eq!(m.state(), Transmitting);
    }

    #[test]
    fn busy_channel_at_response_ready_waits() {
        let mut m = machine_in(Thinking);
        m.apply(TurnEvent::ResponseReady { channel_busy: true }).unwrap();
        assert_eq!(m.state(), WaitingForChannelClear);
    }

    #[test]
    fn barge_in_requires_emergency() {
        let mut m = machine_in(Transmitting);
        assert!(m.apply(TurnEvent::SpeechStart { emergency: false }).is_none());
        assert_eq!(m.state(), Transmitting);

        assert!(m.apply(TurnEvent::SpeechStart { emergency: true }).is_some());
        assert_eq!(m.state(), ReceivingSpeech);
    }

    #[test]
    fn illegal_events_leave_state_unchanged() {
        let mut m = TurnStateMachine::new();
        assert!(m.apply(TurnEvent::SpeechEnd(Process)).is_none());
        assert!(m.apply(TurnEvent::ResponseReady { channel_busy: false }).is_none());
        assert!(m.apply(TurnEvent::ChannelClear).is_none());
        assert!(m.apply(TurnEvent::PlaybackComplete).is_none());
        assert_eq!(m.state(), IdleListening);

        let mut m = machine_in(Thinking);
        assert!(m.apply(TurnEvent::SpeechStart { emergency: false }).is_none());
        assert!(m.apply(TurnEvent::PlaybackComplete).is_none());
        assert_eq!(m.state(), Thinking);
    }

    #[test]
    fn guard_armed_only_by_transmit_to_idle() {
        use TurnEvent::*;
        // Exhaustively walk every legal transition and confirm the guard
        // bit is unique to Transmitting → IdleListening.
        let legal: &[(TurnState, TurnEvent, TurnState)] = &[
            (IdleListening, SpeechStart { emergency: false }, ReceivingSpeech),
            (ReceivingSpeech, SpeechEnd(Process), Thinking),
            (ReceivingSpeech, SpeechEnd(Dropped), IdleListening),
            (ReceivingSpeech, SpeechEnd(ResponsePending), WaitingForChannelClear),
            (Thinking, ResponseReady { channel_busy: false }, Transmitting),
            (Thinking, ResponseReady { channel_busy: true }, WaitingForChannelClear),
            (WaitingForChannelClear, ChannelClear, Transmitting),
            (WaitingForChannelClear, SpeechStart { emergency: false }, ReceivingSpeech),
            (Transmitting, PlaybackComplete, IdleListening),
            (Transmitting, SpeechStart { emergency: true }, ReceivingSpeech),
        ];

        for &(from, event, expected_to) in legal {
            let mut m = machine_in(from);
            let t = m.apply(event).expect("transition should be legal");
            assert_eq!(t.to, expected_to);
            assert_eq!(
                t.arms_guard(),
                from == Transmitting && expected_to == IdleListening
            );
        }
    }

    #[test]
    fn recover_to_idle_from_any_state() {
        for state in [ReceivingSpeech, Thinking, Transmitting, WaitingForChannelClear] {
            let mut m = machine_in(state);
            m.recover_to_idle();
            assert_eq!(m.state(), IdleListening);
        }
    }
}
