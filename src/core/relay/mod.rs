//! Relay core: the per-call state machine and its silence detector
//!
//! - `session` - the pure lifecycle state machine driving one call
//! - `silence` - deadline-based conversational silence detection

pub mod session;
pub mod silence;

pub use session::{RelayAction, RelayEvent, RelaySession, RelayState};
pub use silence::{SilenceDetector, SilenceWindow};
