//! Core SMTP types.

mod address;
mod capability;
mod reply;

pub use address::Address;
pub use capability::{AuthMechanism, Capabilities};
pub use reply::{Reply, ReplyCode};

pub use capability::{AUTH, EIGHT_BIT_MIME, PIPELINING, SIZE, STARTTLS};
