//! Core types and traits for cfwm
//!
//! This crate provides the session model and store, the message bus,
//! configuration and logging used by all other cfwm components.

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use error::{Error, Result};
