//! Core domain + polling engine for the Kufar listing watcher.
//!
//! This crate is intentionally framework-agnostic. The marketplace, the messenger
//! and the persistent stores live behind ports (traits) implemented in adapter
//! crates (`kfw-kufar`, `kfw-telegram`) or in [`store`].

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod poller;
pub mod ports;
pub mod store;

pub use errors::{Error, Result};
