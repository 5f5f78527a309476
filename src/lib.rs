//! Engine core for a text adventure narrated by a locally hosted model.
//!
//! [`session::GameSession`] runs the turn cycle, [`ai`] talks to Ollama or
//! OpenWebUI servers, and [`interpreter`] turns raw replies into narrative
//! plus choices.

pub mod ai;
pub mod config;
pub mod elements;
pub mod interpreter;
pub mod session;
pub mod types;
