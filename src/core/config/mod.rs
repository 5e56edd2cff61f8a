//! Configuration for the relay server and the terminal client.
//!
//! Values come from an optional TOML file in the platform config directory,
//! then environment overrides are applied on top. The provider API key is never
//! stored here; only the name of the variable that holds it.

pub mod data;
pub mod io;

pub use data::{ClientConfig, Config, ProviderConfig, ServerConfig};
pub use io::ConfigError;
