//! Execution primitives shared with the host stack.

pub mod handler;

pub use handler::Handler;
