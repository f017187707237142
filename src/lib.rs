//! Controller half of a cross-process method-call tracer: attaches to a
//! target's pair of SysV message queues, drives its tracer-installation
//! commands, and renders the resulting event stream as a nested call tree.

pub mod cli;
pub mod error;
pub mod hygiene;
pub mod interpreter;
pub mod interrupt;
pub mod logging;
pub mod pidutil;
pub mod session;
pub mod sink;
pub mod transport;
pub mod wire;
