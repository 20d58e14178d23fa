//! Process wiring for the herald mail queue: configuration discovery and
//! the controller that owns the dispatcher for the lifetime of the process.

pub mod config;
pub mod controller;

pub use controller::{Herald, Services};
