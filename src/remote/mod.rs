//! Remote execution boundary between the build step and the build slave

pub mod executor;
pub mod local;

pub use executor::{Capability, CommandOutput, RemoteCommand, RemoteExecutor};
pub use local::LocalExecutor;
