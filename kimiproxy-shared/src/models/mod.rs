pub mod chat;
pub mod session;

pub use chat::{
    ChatCompletionChunk, ChatCompletionChunkChoice, ChatCompletionChunkDelta,
    ChatCompletionMessage, ChatCompletionRequest, Model, ModelsResponse,
};
pub use session::{SessionInfoResponse, SessionResetResponse};
