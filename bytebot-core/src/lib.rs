//! Core types for the bytebot chat gateway
//!
//! This crate defines the envelope protocol exchanged on the message bus,
//! the reply composer, topic naming, the bus abstraction and the ambient
//! configuration/logging used by every other bytebot component.

pub mod bus;
pub mod config;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod topic;
pub mod utils;

pub use envelope::{Envelope, Message, MessageReference, Metadata, ReplyComposer, User};
pub use error::{Error, Result};
