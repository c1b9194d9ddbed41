//! Session lifecycle: start/stop orchestration and status reporting.

pub mod runner;
pub mod state;

pub use runner::{AudioSession, SessionError};
pub use state::SessionStatus;
