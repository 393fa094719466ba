pub mod chart;
pub mod classify;
pub mod models;
pub mod session;
pub mod transform;

pub use session::{ChatSession, SessionError, SessionSettings, SessionSnapshot};
