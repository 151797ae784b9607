pub mod chat;
pub mod models;
pub mod root;
pub mod session;
pub mod session_key;
