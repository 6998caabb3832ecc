//! portbridge Daemon Library
//!
//! Core functionality for the portbridge daemon:
//! - Front door that redirects every request to the child application
//! - Supervisor that patches, launches and relays the child process

pub mod routes;
pub mod supervisor;
