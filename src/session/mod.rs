pub mod cleanup;
pub mod store;
pub mod types;

pub use cleanup::SessionSweeper;
pub use store::{MIN_SESSION_TTL, SessionStore};
pub use types::{Language, Message, Role, Session};
