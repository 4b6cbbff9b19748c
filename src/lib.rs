//! LLM Gateway - rate-limited API gateway for a language-model chat service
//!
//! Requests are throttled per client through a shared Redis counter store.
//! When the store is unreachable the gateway keeps serving with stricter
//! in-memory limits and switches back once the store answers again.

pub mod config;
pub mod error;
pub mod generator;
pub mod http;
pub mod ratelimit;
pub mod security;
