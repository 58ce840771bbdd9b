pub mod asset;
pub mod message;
pub mod session;
