//! These models represent the objects passed around by the orchestrator
//!
//! There are several different related formats we need to interact with:
//! - chat messages sent from the client to the server
//! - data stream frames, sent from the server back to the client
//! - openai, anthropic and google messages/tools, sent from an adapter to the LLM
//! - tool calls, dispatched from the orchestrator to the notes tools
//!
//! These all overlap to varying degrees. We always immediately convert those data models
//! into the internal structs using to/from helpers. Because of the need for compatibility,
//! the internal models are not an exact match to any of these formats.
pub mod event;
pub mod message;
pub mod role;
pub mod tool;
