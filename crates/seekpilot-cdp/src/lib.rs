//! seekpilot CDP layer: a correlated request channel over the DevTools
//! WebSocket, target discovery over the DevTools HTTP endpoint, and page
//! evaluation helpers.

pub mod channel;
pub mod runtime;
pub mod targets;

pub use channel::{CallOptions, CdpChannel};
pub use targets::{DevTools, Target};
