//! Command/reply correlation over one SMTP connection.
//!
//! A [`Session`] owns exactly one stream for its whole lifetime and pairs
//! every inbound reply with the oldest outstanding command, strictly by
//! position. Nothing prevents several [`Session::submit`] calls before any
//! reply is read; that FIFO pairing is what makes pipelining safe, and the
//! delivery agent decides whether to exploit it.
//!
//! One task drives one session (writes return once the bytes are flushed,
//! replies are pulled in [`Session::resolve`]), so many sessions can run
//! concurrently as independent tasks without sharing state.
//!
//! A transport error or response timeout poisons the session: the failing
//! operation reports the underlying failure, and every outstanding or
//! later operation reports the connection as closed, preserving FIFO
//! order. Close listeners fire exactly once.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::command::{self, Command};
use crate::connection::SmtpStream;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::Reply;

type CloseListener = Box<dyn FnOnce() + Send>;

/// Token for one outstanding reply slot.
///
/// Returned by [`Session::submit`] and consumed by [`Session::resolve`].
/// Tokens are resolved in submission order; the correlation is positional,
/// never content-matched.
#[derive(Debug)]
#[must_use = "a submitted command has a pending reply that must be resolved"]
pub struct PendingReply {
    seq: u64,
}

/// One SMTP session over one connection.
pub struct Session<S> {
    stream: SmtpStream<S>,
    response_timeout: Duration,
    /// Sequence number of the next command to submit.
    submitted: u64,
    /// Sequence number of the next reply to resolve.
    resolved: u64,
    poisoned: Option<String>,
    closed: bool,
    close_listeners: Vec<CloseListener>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a session over an established stream.
    pub fn new(stream: SmtpStream<S>, response_timeout: Duration) -> Self {
        Self {
            stream,
            response_timeout,
            submitted: 0,
            resolved: 0,
            poisoned: None,
            closed: false,
            close_listeners: Vec::new(),
        }
    }

    /// Returns the number of submitted commands still awaiting a reply.
    #[must_use]
    pub const fn outstanding(&self) -> u64 {
        self.submitted - self.resolved
    }

    /// Returns true if a TLS layer is installed.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.stream.is_encrypted()
    }

    /// Reads the server greeting.
    ///
    /// The greeting is the one reply with no originating command; it must
    /// be read before anything is submitted.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, response timeout, or if
    /// commands are already outstanding.
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        self.ensure_open()?;
        if self.outstanding() != 0 {
            return Err(Error::Protocol(
                "greeting must be read before submitting commands".into(),
            ));
        }
        self.timed_read().await
    }

    /// Writes a command and enqueues one reply slot.
    ///
    /// Returns immediately after the bytes are flushed; the reply is
    /// obtained later via [`Session::resolve`]. Submitting several
    /// commands before resolving any is the pipelined path.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the write fails.
    pub async fn submit(&mut self, command: &Command) -> Result<PendingReply> {
        self.ensure_open()?;
        let bytes = command.serialize();
        if let Err(err) = self.stream.write_all(&bytes).await {
            self.poison(&err);
            return Err(err);
        }
        tracing::trace!(verb = command.verb(), "command submitted");
        Ok(self.enqueue())
    }

    /// Writes a message body and enqueues one reply slot.
    ///
    /// The payload is dot-stuffed and followed by the terminating `.`
    /// line; the single reply slot covers the whole data phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the write fails.
    pub async fn submit_body(&mut self, message: &[u8]) -> Result<PendingReply> {
        self.ensure_open()?;
        let payload = command::encode_body(message);
        if let Err(err) = self.stream.write_all(&payload).await {
            self.poison(&err);
            return Err(err);
        }
        tracing::trace!(bytes = payload.len(), "message body submitted");
        Ok(self.enqueue())
    }

    /// Drives the wire until the token's reply arrives.
    ///
    /// Replies are handed out strictly in submission order: the Nth reply
    /// received resolves the Nth command sent, whatever its content.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, response timeout, a token
    /// resolved out of order, or a session already poisoned (in which
    /// case every queued token reports the connection failure, still in
    /// FIFO order).
    pub async fn resolve(&mut self, pending: PendingReply) -> Result<Reply> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Closed(reason.clone()));
        }
        if pending.seq != self.resolved {
            return Err(Error::Protocol(
                "replies must be resolved in submission order".into(),
            ));
        }
        let reply = self.timed_read().await?;
        self.resolved += 1;
        Ok(reply)
    }

    /// Submits a command and awaits its reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the submit or the resolve fails.
    pub async fn send(&mut self, command: &Command) -> Result<Reply> {
        let pending = self.submit(command).await?;
        self.resolve(pending).await
    }

    /// Submits a message body and awaits the terminating reply.
    ///
    /// # Errors
    ///
    /// Returns an error if the submit or the resolve fails.
    pub async fn send_body(&mut self, message: &[u8]) -> Result<Reply> {
        let pending = self.submit_body(message).await?;
        self.resolve(pending).await
    }

    /// Installs a TLS layer under the session without reconnecting.
    ///
    /// Any capability set negotiated before the upgrade is void; the
    /// caller must renegotiate over the encrypted channel.
    ///
    /// # Errors
    ///
    /// Returns an error if replies are outstanding, the session is
    /// closed, or the handshake fails. A failed handshake consumes the
    /// session and fires its close listeners.
    pub async fn upgrade_tls(self, hostname: &str) -> Result<Self> {
        self.ensure_open()?;
        if self.outstanding() != 0 {
            return Err(Error::Protocol(
                "cannot upgrade with replies outstanding".into(),
            ));
        }

        let Self {
            stream,
            response_timeout,
            submitted,
            resolved,
            poisoned,
            closed,
            mut close_listeners,
        } = self;

        match stream.upgrade_tls(hostname).await {
            Ok(stream) => Ok(Self {
                stream,
                response_timeout,
                submitted,
                resolved,
                poisoned,
                closed,
                close_listeners,
            }),
            Err(err) => {
                for listener in close_listeners.drain(..) {
                    listener();
                }
                Err(err)
            }
        }
    }

    /// Registers a listener fired exactly once when the session closes.
    ///
    /// A listener registered after the session already closed (or failed)
    /// fires immediately.
    pub fn on_close(&mut self, listener: impl FnOnce() + Send + 'static) {
        if self.closed {
            listener();
        } else {
            self.close_listeners.push(Box::new(listener));
        }
    }

    /// Closes the session.
    ///
    /// Idempotent; fires close listeners on the first call. Subsequent
    /// submits fail. The underlying stream is released on drop.
    pub fn close(&mut self) {
        self.mark_closed();
    }

    fn ensure_open(&self) -> Result<()> {
        if let Some(reason) = &self.poisoned {
            return Err(Error::Closed(reason.clone()));
        }
        if self.closed {
            return Err(Error::Closed("session closed".into()));
        }
        Ok(())
    }

    fn enqueue(&mut self) -> PendingReply {
        let seq = self.submitted;
        self.submitted += 1;
        PendingReply { seq }
    }

    /// Reads one complete reply, applying the response timeout and
    /// poisoning the session on failure.
    async fn timed_read(&mut self) -> Result<Reply> {
        let limit = self.response_timeout;
        match tokio::time::timeout(limit, Self::read_reply(&mut self.stream)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(err)) => {
                self.poison(&err);
                Err(err)
            }
            Err(_) => {
                let err = Error::ResponseTimeout;
                self.poison(&err);
                Err(err)
            }
        }
    }

    /// Accumulates reply lines until the terminating line, then decodes.
    async fn read_reply(stream: &mut SmtpStream<S>) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let line = stream.read_line().await?;
            if line.is_empty() {
                continue;
            }

            let is_last = is_last_reply_line(&line);
            lines.push(line);

            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }

    fn poison(&mut self, err: &Error) {
        if self.poisoned.is_none() {
            tracing::debug!(error = %err, "session failed");
            self.poisoned = Some(err.to_string());
            self.mark_closed();
        }
    }

    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            for listener in self.close_listeners.drain(..) {
                listener();
            }
        }
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("outstanding", &(self.submitted - self.resolved))
            .field("closed", &self.closed)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::redundant_clone, clippy::manual_string_new, clippy::needless_collect, clippy::unreadable_literal, clippy::used_underscore_items, clippy::similar_names)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn session_over(
        mock: tokio_test::io::Mock,
    ) -> Session<tokio_test::io::Mock> {
        Session::new(SmtpStream::new(mock), TIMEOUT)
    }

    #[tokio::test]
    async fn greeting_then_sequential_send() {
        let mock = tokio_test::io::Builder::new()
            .read(b"220 mail.example.com ready\r\n")
            .write(b"NOOP\r\n")
            .read(b"250 OK\r\n")
            .build();
        let mut session = session_over(mock);

        let greeting = session.read_greeting().await.unwrap();
        assert_eq!(greeting.code.as_u16(), 220);

        let reply = session.send(&Command::Noop).await.unwrap();
        assert_eq!(reply.code.as_u16(), 250);
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn pipelined_replies_resolve_positionally() {
        // Three identical commands; the replies are distinguishable only
        // by their text, so matching must be by position alone.
        let mock = tokio_test::io::Builder::new()
            .write(b"NOOP\r\n")
            .write(b"NOOP\r\n")
            .write(b"NOOP\r\n")
            .read(b"250 first\r\n250 second\r\n250 third\r\n")
            .build();
        let mut session = session_over(mock);

        let first = session.submit(&Command::Noop).await.unwrap();
        let second = session.submit(&Command::Noop).await.unwrap();
        let third = session.submit(&Command::Noop).await.unwrap();
        assert_eq!(session.outstanding(), 3);

        assert_eq!(session.resolve(first).await.unwrap().text(), "first");
        assert_eq!(session.resolve(second).await.unwrap().text(), "second");
        assert_eq!(session.resolve(third).await.unwrap().text(), "third");
        assert_eq!(session.outstanding(), 0);
    }

    #[tokio::test]
    async fn out_of_order_resolution_is_rejected() {
        let mock = tokio_test::io::Builder::new()
            .write(b"NOOP\r\n")
            .write(b"NOOP\r\n")
            .read(b"250 a\r\n250 b\r\n")
            .build();
        let mut session = session_over(mock);

        let first = session.submit(&Command::Noop).await.unwrap();
        let second = session.submit(&Command::Noop).await.unwrap();

        assert!(matches!(
            session.resolve(second).await,
            Err(Error::Protocol(_))
        ));

        // In-order resolution still works afterwards.
        assert_eq!(session.resolve(first).await.unwrap().text(), "a");
    }

    #[tokio::test]
    async fn multi_line_replies_are_accumulated() {
        let mock = tokio_test::io::Builder::new()
            .write(b"EHLO client.example.com\r\n")
            .read(b"250-mail.example.com\r\n250-PIPELINING\r\n250 STARTTLS\r\n")
            .build();
        let mut session = session_over(mock);

        let reply = session
            .send(&Command::Ehlo {
                hostname: "client.example.com".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(reply.lines.len(), 3);
        assert_eq!(reply.lines[1], "PIPELINING");
    }

    #[tokio::test]
    async fn body_submission_is_dot_stuffed_and_terminated() {
        let mock = tokio_test::io::Builder::new()
            .write(b"hello\r\n..dot\r\n.\r\n")
            .read(b"250 queued\r\n")
            .build();
        let mut session = session_over(mock);

        let reply = session.send_body(b"hello\n.dot").await.unwrap();
        assert_eq!(reply.code.as_u16(), 250);
    }

    #[tokio::test]
    async fn transport_failure_poisons_in_fifo_order() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mock = tokio_test::io::Builder::new()
            .write(b"NOOP\r\n")
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut session = session_over(mock);
        let counter = Arc::clone(&closes);
        session.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let pending = session.submit(&Command::Noop).await.unwrap();
        assert!(matches!(session.resolve(pending).await, Err(Error::Io(_))));

        // The failure closed the session exactly once; later operations
        // report the original cause.
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.submit(&Command::Noop).await,
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn peer_close_fails_outstanding_replies() {
        let (client, server) = tokio::io::duplex(1024);
        let mut session = Session::new(SmtpStream::new(client), TIMEOUT);

        let pending = session.submit(&Command::Noop).await.unwrap();
        drop(server);

        assert!(matches!(
            session.resolve(pending).await,
            Err(Error::Closed(_))
        ));
    }

    #[tokio::test]
    async fn response_timeout_poisons_the_session() {
        let (client, server) = tokio::io::duplex(1024);
        let mut session = Session::new(SmtpStream::new(client), Duration::from_millis(50));

        let pending = session.submit(&Command::Noop).await.unwrap();
        assert!(matches!(
            session.resolve(pending).await,
            Err(Error::ResponseTimeout)
        ));
        assert!(matches!(
            session.submit(&Command::Noop).await,
            Err(Error::Closed(_))
        ));

        drop(server);
    }

    #[tokio::test]
    async fn upgrade_refused_with_outstanding_replies() {
        let mock = tokio_test::io::Builder::new().write(b"NOOP\r\n").build();
        let mut session = session_over(mock);

        let _pending = session.submit(&Command::Noop).await.unwrap();
        // Guard fires before any handshake bytes are written.
        assert!(matches!(
            session.upgrade_tls("mail.example.com").await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn close_listener_after_close_fires_immediately() {
        let mock = tokio_test::io::Builder::new().build();
        let mut session = session_over(mock);

        session.close();
        session.close(); // idempotent

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session.on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.submit(&Command::Noop).await,
            Err(Error::Closed(_))
        ));
    }
}
