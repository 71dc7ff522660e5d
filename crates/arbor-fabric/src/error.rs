/// Errors produced by the event bus.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// The observer dispatcher is already running.
    #[error("observer dispatcher already started")]
    AlreadyStarted,

    /// The bus has been shut down and cannot dispatch events.
    #[error("event bus is shut down")]
    Shutdown,
}

/// Convenience alias used throughout the fabric crate.
pub type FabricResult<T> = Result<T, FabricError>;
