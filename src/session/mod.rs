//! Session Controller (C3): selector syntax, expression pre-validation,
//! per-tracer bookkeeping, and the attach/detach/dispatch state machine.

pub mod controller;
pub mod expr_check;
pub mod selector;
pub mod tracer;

pub use controller::{Controller, LoopExit};
