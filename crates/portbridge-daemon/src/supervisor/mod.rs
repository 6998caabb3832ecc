//! Supervision of the child application process.

pub mod manager;
pub mod patch;
pub mod relay;

pub use manager::{ExitReason, Supervisor, SupervisorError, SupervisorState};
pub use patch::{PatchOutcome, PortPatch};
pub use relay::relay_lines;
