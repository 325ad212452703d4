//! Window enumeration and target resolution.
//!
//! This crate lists the host's capturable top-level windows and turns a
//! possibly stale, human-supplied window title into one concrete window
//! using a staged exact-to-fuzzy matching waterfall.

mod error;
mod platform;
mod resolver;
mod window;

pub use error::CaptureError;
pub use resolver::{resolve, suggest, tokenize, token_overlap, MatchStage, Resolution};
pub use window::{StaticWindowSource, SystemWindowSource, WindowCandidate, WindowSource};

/// Result type for capture operations.
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Minimum token-overlap score the fuzzy stage accepts.
pub const FUZZY_ACCEPT_THRESHOLD: f64 = 0.5;

/// Tokens this short or shorter are ignored by the fuzzy stage.
pub const MAX_IGNORED_TOKEN_LEN: usize = 2;

/// Default number of suggestions offered for an unresolved target.
pub const DEFAULT_SUGGESTION_LIMIT: usize = 3;
