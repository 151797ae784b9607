#![cfg_attr(not(test), forbid(unsafe_code))]

//! Shared configuration and wire models for the kimiproxy gateway.

pub mod config;
pub mod models;
