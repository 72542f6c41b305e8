//! Shared configuration and error types for the stayplan workspace.

pub mod config;
pub mod error;

pub use config::StayplanConfig;
pub use error::{Result, StayplanError};
