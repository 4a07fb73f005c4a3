//! Per-recipient and per-transaction delivery outcomes.

use crate::error::Error;
use crate::types::{Address, Reply};

/// Classification of one recipient's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientOutcome {
    /// Recipient accepted (2xx).
    Accepted,
    /// Recipient rejected with a transient error (4xx).
    TemporaryError,
    /// Recipient rejected with a permanent error (5xx).
    PermanentError,
}

/// Outcome of one recipient within a delivery transaction.
#[derive(Debug, Clone)]
pub struct RecipientStatus {
    /// The recipient address.
    pub address: Address,
    /// The classification.
    pub outcome: RecipientOutcome,
    /// The reply that produced the classification; absent only if the
    /// connection failed before a reply arrived.
    pub reply: Option<Reply>,
}

impl RecipientStatus {
    /// Classifies a recipient from the reply to its RCPT command.
    pub(crate) fn classify(address: Address, reply: Reply) -> Self {
        let outcome = if reply.is_success() {
            RecipientOutcome::Accepted
        } else if reply.is_transient_error() {
            RecipientOutcome::TemporaryError
        } else {
            RecipientOutcome::PermanentError
        };
        Self {
            address,
            outcome,
            reply: Some(reply),
        }
    }

    /// Returns true if the recipient was accepted.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.outcome == RecipientOutcome::Accepted
    }

    /// Returns the reply code behind the classification, if any.
    #[must_use]
    pub fn code(&self) -> Option<u16> {
        self.reply.as_ref().map(|r| r.code.as_u16())
    }
}

/// Result of one delivery transaction.
///
/// When processing reached the recipient phase, `recipients` enumerates
/// every requested recipient once, in request order. When the transaction
/// aborted earlier, `recipients` is empty and `failure` carries a cause
/// from the error taxonomy; the absent statuses are deliberate, never
/// padded.
#[derive(Debug)]
pub struct DeliveryResult {
    /// One status per requested recipient, in request order.
    pub recipients: Vec<RecipientStatus>,
    /// Overall success flag.
    ///
    /// True when the transaction executed, even if some recipients were
    /// rejected; false when the transaction aborted or the data phase was
    /// permanently rejected.
    pub success: bool,
    /// Cause of an aborted transaction.
    pub failure: Option<Error>,
    /// Reply that terminated the data phase, when one was attempted.
    ///
    /// A permanent (5xx) data-phase reply flips `success` to false but
    /// leaves the per-recipient classifications as the server issued them.
    pub data_reply: Option<Reply>,
}

impl DeliveryResult {
    /// Builds the result of a transaction that ran to completion.
    pub(crate) fn completed(recipients: Vec<RecipientStatus>, data_reply: Option<Reply>) -> Self {
        let success = !data_reply.as_ref().is_some_and(Reply::is_permanent_error);
        Self {
            recipients,
            success,
            failure: None,
            data_reply,
        }
    }

    /// Builds the result of a transaction that aborted before the
    /// recipient phase completed.
    pub(crate) fn aborted(failure: Error) -> Self {
        Self {
            recipients: Vec::new(),
            success: false,
            failure: Some(failure),
            data_reply: None,
        }
    }

    /// Returns the number of accepted recipients.
    #[must_use]
    pub fn accepted_count(&self) -> usize {
        self.recipients.iter().filter(|s| s.is_accepted()).count()
    }
}
