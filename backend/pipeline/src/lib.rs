//! Operation pipeline: executor, post-policies, deadlines and per-chat
//! session state.

pub mod deadline;
pub mod executor;
pub mod policy;
pub mod session;

pub use deadline::{run_with_deadline, LONG_DEADLINE, SHORT_DEADLINE};
pub use executor::{
    cache_engine, hint_sampling, user_message, ParseOutcome, Pipeline, HINT_CACHE_TTL,
    PARSE_CACHE_TTL,
};
pub use session::{
    ChatSession, HintProgress, ImageKey, ParseConfirmState, SessionStore, TransitionError,
};
