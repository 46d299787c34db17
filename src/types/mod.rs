//! Core types for kiln.

pub mod generation;
pub mod message;
pub mod stream;
pub mod tool_call;

pub use generation::*;
pub use message::*;
pub use stream::*;
pub use tool_call::*;
