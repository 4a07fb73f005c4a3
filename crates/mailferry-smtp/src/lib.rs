//! # mailferry-smtp
//!
//! An asynchronous SMTP delivery client (RFC 5321) with command
//! pipelining and per-recipient results.
//!
//! ## Features
//!
//! - **Non-blocking deliveries**: `deliver` returns a [`DeliveryFuture`]
//!   immediately; one task drives one connection
//! - **Strict-FIFO reply correlation**: pipelined commands resolve
//!   positionally, never by content
//! - **Capability negotiation**: open-ended extension set from EHLO,
//!   renegotiated after STARTTLS
//! - **Extension policy**: pipelining and encryption requirements fail
//!   locally, before any bytes are sent for the affected step
//! - **Partial-failure semantics**: a rejected recipient never aborts its
//!   siblings; results enumerate every recipient in request order
//! - **TLS**: STARTTLS upgrade in place, or implicit TLS (port 465)
//! - **Authentication**: PLAIN and LOGIN
//!
//! ## Quick Start
//!
//! ```ignore
//! use mailferry_smtp::{Address, DeliveryAgent, DeliveryConfig, Transaction};
//!
//! #[tokio::main]
//! async fn main() -> mailferry_smtp::Result<()> {
//!     let config = DeliveryConfig::new().credentials("user@example.com", "password");
//!     let agent = DeliveryAgent::new(config);
//!
//!     let transaction = Transaction::new(
//!         Address::new("sender@example.com")?,
//!         vec![
//!             Address::new("one@example.net")?,
//!             Address::new("two@example.net")?,
//!         ],
//!         &b"Subject: Test\r\n\r\nHello, World!\r\n"[..],
//!     )?;
//!
//!     let future = agent.deliver("smtp.example.net", 587, transaction);
//!     let result = future.wait().await;
//!
//!     for status in &result.recipients {
//!         println!("{}: {:?}", status.address, status.outcome);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command builders and data-phase encoding
//! - [`connection`]: connection establishment and TLS streams
//! - [`delivery`]: the delivery agent, transactions, and results
//! - [`parser`]: reply parser
//! - [`session`]: command/reply correlation over one connection
//! - [`types`]: core SMTP types (addresses, replies, capabilities)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
pub mod delivery;
mod error;
pub mod parser;
pub mod session;
pub mod types;

pub use command::Command;
pub use connection::{SmtpStream, connect, connect_tls};
pub use delivery::{
    Credentials, DeliveryAgent, DeliveryConfig, DeliveryFuture, DeliveryResult, PipeliningMode,
    RecipientOutcome, RecipientStatus, TlsMode, Transaction,
};
pub use error::{Error, Result};
pub use session::{PendingReply, Session};
pub use types::{Address, AuthMechanism, Capabilities, Reply, ReplyCode};
