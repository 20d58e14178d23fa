pub mod logging;

pub use tracing;

/// Lifecycle signal broadcast to every long-running task of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
