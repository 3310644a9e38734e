//! Transport module - TCP connections to queue hosts.
//!
//! Provides:
//! - [`HostAddr`] parsing of `host:port` strings from lookup
//! - [`connect`] with a connect deadline

mod tcp;

pub use tcp::{connect, HostAddr, NsqStream};
