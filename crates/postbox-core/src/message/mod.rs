//! Outgoing message model.
//!
//! A [`Message`] is built once, either directly through [`Message::new`] or
//! fluently through [`MessageBuilder`], and never changes afterwards.

mod builder;
mod model;

pub use builder::MessageBuilder;
pub(crate) use model::{base_name, is_plain_file_name};
pub use model::{Attachment, Field, Message, MessageOptions};
