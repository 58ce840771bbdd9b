// Sessions: persistence for sessions, messages, and assets, plus the Session API.

pub mod handlers;
pub mod store;
