//! Shared pieces of the UrbanSight capture bridge.
//!
//! The producer (`urbansight-capture`) and the transfer server
//! (`urbansight-bridge`) run as separate processes and only meet in the
//! capture store: a directory of indexed captures, a few stable alias paths
//! and a trigger flag file.  Everything both sides need to agree on lives
//! here.

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod lock;
pub mod stable;
pub mod store;
