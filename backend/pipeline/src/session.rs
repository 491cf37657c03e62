//! Per-chat confirmation and hint-progression state.
//!
//! A chat has one active image at a time. The session remembers which
//! `(image_hash, engine, model)` it belongs to; a different image replaces it.

use std::fmt;
use std::time::Duration;

use lessonkit_core::{HintLevel, LlmError};
use moka::sync::Cache;
use serde::Serialize;

pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const SESSION_CAPACITY: u64 = 100_000;

/// Rejected state-machine event. The state is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub machine: &'static str,
    pub from: String,
    pub event: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: cannot apply {} in state {}", self.machine, self.event, self.from)
    }
}

impl From<TransitionError> for LlmError {
    fn from(err: TransitionError) -> Self {
        LlmError::InvalidRequest(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseConfirmState {
    #[default]
    None,
    Draft,
    AwaitingUserConfirmation,
    Accepted,
    CorrectedAccepted,
}

impl ParseConfirmState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Draft => "draft",
            Self::AwaitingUserConfirmation => "awaiting_user_confirmation",
            Self::Accepted => "accepted",
            Self::CorrectedAccepted => "corrected_accepted",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted | Self::CorrectedAccepted)
    }

    fn reject(self, event: &'static str) -> TransitionError {
        TransitionError {
            machine: "parse confirmation",
            from: self.as_str().to_string(),
            event,
        }
    }

    /// A fresh engine result arrived. Accepted parses are final.
    pub fn on_provider_result(self) -> Result<Self, TransitionError> {
        match self {
            Self::None | Self::Draft | Self::AwaitingUserConfirmation => Ok(Self::Draft),
            _ => Err(self.reject("provider_result")),
        }
    }

    /// The parse policy ran on the draft.
    pub fn on_policy(self, confirmation_needed: bool) -> Result<Self, TransitionError> {
        match (self, confirmation_needed) {
            (Self::Draft, true) => Ok(Self::AwaitingUserConfirmation),
            (Self::Draft, false) => Ok(Self::Accepted),
            _ => Err(self.reject("policy")),
        }
    }

    pub fn on_user_yes(self) -> Result<Self, TransitionError> {
        match self {
            Self::AwaitingUserConfirmation => Ok(Self::Accepted),
            _ => Err(self.reject("user_yes")),
        }
    }

    pub fn on_user_correction(self) -> Result<Self, TransitionError> {
        match self {
            Self::AwaitingUserConfirmation => Ok(Self::CorrectedAccepted),
            _ => Err(self.reject("user_correction")),
        }
    }
}

impl fmt::Display for ParseConfirmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hints already shown for the current image. Levels go forward one at a
/// time; earlier levels may be shown again without moving back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HintProgress {
    #[default]
    Idle,
    Shown(HintLevel),
    Exhausted,
}

impl HintProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Shown(HintLevel::L1) => "l1_shown",
            Self::Shown(HintLevel::L2) => "l2_shown",
            Self::Shown(HintLevel::L3) => "l3_shown",
            Self::Exhausted => "exhausted",
        }
    }

    /// State after the user asks for `level`. Asking for the last level again
    /// once it was shown exhausts the progression.
    pub fn on_request(self, level: HintLevel) -> Result<Self, TransitionError> {
        let reject = || TransitionError {
            machine: "hint progression",
            from: self.as_str().to_string(),
            event: "skip_level",
        };
        match self {
            Self::Idle if level == HintLevel::L1 => Ok(Self::Shown(level)),
            Self::Idle => Err(reject()),
            Self::Shown(HintLevel::L3) if level == HintLevel::L3 => Ok(Self::Exhausted),
            Self::Shown(current) if level <= current => Ok(self),
            Self::Shown(current) if current.next() == Some(level) => Ok(Self::Shown(level)),
            Self::Shown(_) => Err(reject()),
            Self::Exhausted => Ok(self),
        }
    }

    /// The level a "next hint" request should produce, if any remain.
    pub fn next_level(&self) -> Option<HintLevel> {
        match self {
            Self::Idle => Some(HintLevel::L1),
            Self::Shown(level) => level.next(),
            Self::Exhausted => None,
        }
    }
}

impl fmt::Display for HintProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub image_hash: String,
    pub engine: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    pub image: ImageKey,
    pub parse: ParseConfirmState,
    pub hints: HintProgress,
}

impl ChatSession {
    pub fn new(image: ImageKey) -> Self {
        Self {
            image,
            parse: ParseConfirmState::None,
            hints: HintProgress::Idle,
        }
    }
}

/// Sessions keyed by chat id, dropped after six idle hours.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Cache<i64, ChatSession>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(SESSION_IDLE_TTL)
    }
}

impl SessionStore {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            sessions: Cache::builder()
                .max_capacity(SESSION_CAPACITY)
                .time_to_idle(idle_ttl)
                .build(),
        }
    }

    pub fn get(&self, chat_id: i64) -> Option<ChatSession> {
        self.sessions.get(&chat_id)
    }

    /// The chat's session for `image`, or a fresh one if the chat has moved
    /// to another image.
    pub fn session_for(&self, chat_id: i64, image: &ImageKey) -> ChatSession {
        match self.sessions.get(&chat_id) {
            Some(session) if &session.image == image => session,
            _ => ChatSession::new(image.clone()),
        }
    }

    pub fn put(&self, chat_id: i64, session: ChatSession) {
        self.sessions.insert(chat_id, session);
    }
}
