//! relaychat is a streaming chat relay for OpenAI-compatible LLM APIs and a
//! terminal client that talks to it.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns the upstream client, the relay encoder, the client-side
//!   stream consumer and the conversation state machine.
//! - [`server`] exposes the relay over HTTP (`POST /api/chat`).
//! - [`api`] defines the request and event payloads on both hops.
//! - [`utils`] holds the transcript log.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod server;
pub mod utils;
