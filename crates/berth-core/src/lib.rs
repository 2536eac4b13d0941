//! # berth-core
//!
//! Low-level Linux process primitives for the berth engine:
//! - **Namespaces**: unsharing mount, UTS, IPC and network namespaces for a workload.
//! - **Processes**: liveness probing, start-time fingerprints and signal delivery.
//!
//! Non-Linux builds compile to stubs that report the capability as missing.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod namespace;
pub mod process;
