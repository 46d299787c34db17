//! Client-facing event stream and error sanitization.

pub mod events;
pub mod sanitize;

pub use events::{ChatEvent, EventEmitter, EventEnvelope};
pub use sanitize::{client_message, redact};
