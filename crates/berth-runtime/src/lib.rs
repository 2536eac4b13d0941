//! Container lifecycle engine: state store, port allocator, process
//! supervisor, event bus and the container manager tying them together.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod events;
pub mod image;
pub mod isolation;
pub mod logs;
pub mod manager;
pub mod ports;
pub mod store;
pub mod supervisor;

pub use manager::{ContainerManager, CreateRequest};
