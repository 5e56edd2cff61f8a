pub mod chat_stream;
pub mod config;
pub mod consumer;
pub mod conversation;
pub mod jokes;
pub mod message;
pub mod relay;
pub mod session;
pub mod upstream;
pub mod wire;
