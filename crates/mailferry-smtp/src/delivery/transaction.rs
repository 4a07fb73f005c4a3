//! Delivery transaction: one envelope, recipients, and message body.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::types::Address;

/// One delivery attempt: sender, ordered recipients, message body.
///
/// The body is held as [`Bytes`], so it stays caller-owned and cheaply
/// re-readable across the whole transaction (authentication rounds or
/// several transactions over one connection never consume it).
#[derive(Debug, Clone)]
pub struct Transaction {
    sender: Address,
    recipients: Vec<Address>,
    message: Bytes,
}

impl Transaction {
    /// Creates a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient list is empty.
    pub fn new(
        sender: Address,
        recipients: Vec<Address>,
        message: impl Into<Bytes>,
    ) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::EmptyRecipients);
        }
        Ok(Self {
            sender,
            recipients,
            message: message.into(),
        })
    }

    /// Returns the envelope sender.
    #[must_use]
    pub const fn sender(&self) -> &Address {
        &self.sender
    }

    /// Returns the recipients in request order.
    #[must_use]
    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    /// Returns the message body.
    #[must_use]
    pub const fn message(&self) -> &Bytes {
        &self.message
    }
}
