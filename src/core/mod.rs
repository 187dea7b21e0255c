// src/core/mod.rs

//! The central module containing the connection lifecycle of SpinelQ.

pub mod client;
pub mod connection;
pub mod errors;
pub mod protocol;
pub mod readiness;
pub mod scripts;
pub mod topology;
pub mod version;

pub use client::{ClientEvent, ClientStatus, StoreClient};
pub use connection::{InitFuture, LifecycleState, QueueConnection};
pub use errors::SpinelQError;
pub use protocol::RespFrame;
