//! Sauce Labs tunnel lifecycle
//!
//! A build sets the tunnel up before its browser tests run and tears it down
//! afterwards. Readiness is signalled by a marker file rather than the
//! tunnel's own output, since the tunnel client backgrounds itself.

pub mod command;
pub mod readiness;
pub mod supervisor;

pub use command::{StopSchedule, StopSignal, StopStage, TunnelConfig};
pub use readiness::{wait_for_marker, wait_for_ready, Clock, ReadinessPolicy, SystemClock};
pub use supervisor::{SupervisorSettings, SupportArtifacts, TunnelSession, TunnelState, TunnelSupervisor};
