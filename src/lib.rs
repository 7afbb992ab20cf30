//! Mail Router: classifies incoming mail and notifies a channel.

pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod mailbox;
pub mod notify;
pub mod pipeline;

pub use error::{Error, Result};
