mod manager;

pub use manager::{Session, SessionManager, SessionStatus, COOKIES_KEY};
