//! Interactive buttons and the callbacks their clicks run.

pub mod definition;
pub mod registry;

pub use definition::{
    Button, ButtonBuilder, ButtonFactory, CallbackContext, CallbackDefinition, CallbackHandler,
};
pub use registry::{parse_payload, CallbackRegistry, ClickOutcome, MissingParams};
