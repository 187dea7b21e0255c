// src/lib.rs

pub mod config;
pub mod core;

// Re-export
pub use crate::core::connection::QueueConnection;
pub use crate::core::errors::SpinelQError;
