//! Shared message pipeline, channel-agnostic.
//!
//! Channel adapters convert platform messages into `InboundMessage`, call
//! `handle_inbound`, and deliver the returned `Reply`.

pub mod context;
pub mod process;
pub mod slash;

pub use context::MessageContext;
pub use process::{handle_inbound, process_message, ContextPolicy, Outcome, PipelineError, Reply};
pub use slash::{Command, Commands};
