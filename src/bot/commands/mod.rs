//! Conversational commands: definitions, argument collection and dispatch.

pub mod args;
pub mod conversation;
pub mod definition;
pub mod middleware;
pub mod registry;

pub use args::{parse_inline_args, ArgKind, ArgumentSpec, Args};
pub use conversation::{classify_reply, ArgumentCollector, Reply};
pub use definition::{CommandContext, CommandDefinition, CommandHandler, SetupHook};
pub use middleware::{Flow, Middleware};
pub use registry::{CommandRegistry, DispatchOptions, DispatchOutcome};
