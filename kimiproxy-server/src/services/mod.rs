pub mod chat_service;
pub mod nonce;
pub mod prompt;
pub mod session_store;
pub mod transport;
pub mod upstream;
