//! Bidirectional OpenAI <-> Ollama chat-completion translation, with XML
//! tool-call recovery for backends that don't support native function
//! calling. The HTTP server, request routing, and config loading are
//! external collaborators; this crate is the conversion core they drive.

pub mod capability;
pub mod config;
pub mod context;
pub mod converters;
pub mod engine;
pub mod error;
pub mod format_detector;
pub mod ir;
pub mod stream;
pub mod tool_instructions;
pub mod xml_toolcall;

pub use config::ProxyConfig;
pub use context::ConversionContext;
pub use converters::{Converter, Dialect, Registry};
pub use engine::Engine;
pub use error::ToolbridgeError;
