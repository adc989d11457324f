//! Core types, traits, and error definitions for the research agent.
//!
//! This crate provides the foundational building blocks shared by the
//! sandbox, the controller, the skills and the model gateway.

pub mod config;
pub mod error;
pub mod mocks;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
