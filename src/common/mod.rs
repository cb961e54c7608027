//! Common utilities shared by the tunnel and report commands

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod properties;

pub use error::{Error, Result};
pub use properties::Properties;
