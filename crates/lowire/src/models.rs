//! These models represent the objects passed around by the agent loop
//!
//! There are several different wire formats we need to interact with:
//! - openai chat completions messages/tools, sent from the loop to the LLM
//! - openai responses input items, sent from the loop to the LLM
//! - anthropic messages/tools, sent from the loop to the LLM
//! - gemini contents/function declarations, sent from the loop to the LLM
//! - tool requests and results, exchanged with user-supplied tool callbacks
//!
//! These all overlap to varying degrees. Provider adapters immediately
//! convert to and from the internal structs below, so the internal model is
//! not an exact match for any single wire format.
pub mod content;
pub mod message;
pub mod role;
pub mod tool;
