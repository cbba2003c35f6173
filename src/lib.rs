//! Parley: streaming agent-response pipeline.
//!
//! A chat turn runs through a tool-using agent whose intermediate events are
//! translated into a small set of event-stream frames. When the agent fails
//! the same response continues from a direct model call, and the assembled
//! assistant message is persisted before the terminal frame is sent.
//!
//! # Quick Start
//!
//! ```no_run
//! use parley::prelude::*;
//!
//! # async fn example() -> parley::error::Result<()> {
//! let config = ParleyConfig::from_env()?;
//! let state = parley::server::app_state_from_config(&config);
//! parley::server::serve(config.bind, state).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod prelude;
pub mod protocol;
pub mod provider;
pub mod server;
pub mod store;
pub mod tools;
pub mod translate;
pub mod types;

#[cfg(feature = "cli")]
pub mod cli;
