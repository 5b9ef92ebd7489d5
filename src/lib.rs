//! Chat client whose assistant answers may embed inline commands of the form
//! `@Name(argument)`. Answers are streamed from an OpenAI-compatible
//! endpoint, scanned for commands, the commands dispatched to registered
//! plugins, and the results spliced back into the answer at their original
//! positions.

pub mod api;
pub mod chat;
pub mod dispatcher;
pub mod error;
pub mod llm;
pub mod merge;
pub mod parser;
pub mod paths;
pub mod plugin;
pub mod plugins;
pub mod settings;
pub mod sse;
pub mod state;
pub mod storage;
pub mod store;
