//! Plugin-side SDK for the Soren platform.
//!
//! A plugin connects a [`Session`] to the agent's NATS server, declares its
//! intro, settings form and actions on a [`Plugin`], and calls
//! [`Plugin::start`] to answer the host's protocol requests. Long-running
//! work reports back through [`JobReporter`], and [`EventLogger`] forwards
//! log records to the host's event channel.
//!
//! ```no_run
//! use soren_sdk::{handler_fn, Action, Plugin, PluginIntro, Reply, Session};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), soren_sdk::Error> {
//! let session = Arc::new(Session::from_env()?);
//! session.connect().await?;
//!
//! let mut plugin = Plugin::new(session);
//! plugin.set_intro(PluginIntro::new("Echo", "Soren Team", "1.0.0"))?;
//! plugin.add_actions([Action::new("echo", "Echo")
//!     .with_handler(handler_fn(|msg| Ok(Some(Reply::text(msg.text())))))])?;
//! plugin.start().await?;
//! # Ok(())
//! # }
//! ```
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod events;
pub mod handler;
pub mod model;
pub mod plugin;
pub mod progress;
pub mod session;
pub mod subject;
pub mod testing;
pub mod transport;

pub use config::{Config, ConfigBuilder, ConfigError};
pub use events::EventLogger;
pub use handler::{
    async_handler_fn, handler_fn, HandlerError, HandlerResult, MessageHandler, Reply,
    SharedHandler,
};
pub use model::{
    Action, ActionForm, ActionRequestContent, ActionSummary, Command, EventType, Frame, Icon,
    JobBodyContent, JobProgress, LogLevel, PluginEvent, PluginIntro, Requirements, Settings,
};
pub use plugin::{BindFailure, DispatchError, Plugin, PluginError, PluginState, Role};
pub use progress::{JobReporter, ProgressError, RetryPolicy};
pub use session::{ConnectionError, Session, SessionState};
pub use transport::{Headers, Message, Transport, TransportError};

/// Errors that stop a plugin from starting.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Plugin(#[from] PluginError),
}
