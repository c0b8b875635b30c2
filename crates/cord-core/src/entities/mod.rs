//! Records cached from gateway payloads

mod channel;
mod emoji;
mod guild;
mod member;
mod message;
mod role;
mod user;

pub use channel::{Channel, ChannelType};
pub use emoji::Emoji;
pub use guild::Guild;
pub use member::Member;
pub use message::{Attachment, Message, MessageReference};
pub use role::Role;
pub use user::User;
