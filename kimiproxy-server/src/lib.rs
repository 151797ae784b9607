#![cfg_attr(not(test), forbid(unsafe_code))]

//! HTTP server translating OpenAI-compatible chat completion requests into
//! the kimi-ai.chat admin-ajax protocol, streaming replies back as SSE.

pub mod app_state;
pub mod handlers;
pub mod http;
pub mod routes;
pub mod server;
pub mod services;
pub mod tracer;
