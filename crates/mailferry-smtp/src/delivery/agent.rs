//! The delivery agent: drives transactions over a session.
//!
//! One spawned task owns one connection and walks the protocol sequence:
//! greeting, capability negotiation, the locally checked extension
//! policies, optional TLS upgrade (with renegotiation), optional
//! authentication, then per transaction the envelope, the recipients
//! (pipelined or sequential), and the data phase. Each transaction
//! resolves its own [`DeliveryFuture`]; a connection-level failure aborts
//! every remaining future.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::command::Command;
use crate::connection;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::{AUTH, AuthMechanism, Capabilities, PIPELINING, Reply, ReplyCode, SIZE, STARTTLS};

use super::config::{Credentials, DeliveryConfig, PipeliningMode, TlsMode};
use super::future::DeliveryFuture;
use super::result::{DeliveryResult, RecipientStatus};
use super::transaction::Transaction;

/// Drives delivery transactions against SMTP servers.
#[derive(Debug, Clone)]
pub struct DeliveryAgent {
    config: DeliveryConfig,
}

impl DeliveryAgent {
    /// Creates an agent with the given configuration.
    #[must_use]
    pub const fn new(config: DeliveryConfig) -> Self {
        Self { config }
    }

    /// Creates an agent with the process-wide default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(DeliveryConfig::shared().clone())
    }

    /// Returns the agent configuration.
    #[must_use]
    pub const fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Delivers one transaction to the given server.
    ///
    /// Returns immediately; the returned future resolves exactly once
    /// with the assembled [`DeliveryResult`]. Must be called from within
    /// a Tokio runtime.
    pub fn deliver(&self, host: &str, port: u16, transaction: Transaction) -> DeliveryFuture {
        let mut futures = self.deliver_many(host, port, vec![transaction]);
        // One transaction in, one future out.
        futures.swap_remove(0)
    }

    /// Delivers several transactions sequentially over one connection.
    ///
    /// Returns one independently resolved future per transaction, in
    /// order. Must be called from within a Tokio runtime.
    pub fn deliver_many(
        &self,
        host: &str,
        port: u16,
        transactions: Vec<Transaction>,
    ) -> Vec<DeliveryFuture> {
        let futures: Vec<DeliveryFuture> =
            transactions.iter().map(|_| DeliveryFuture::new()).collect();
        if futures.is_empty() {
            return futures;
        }

        let config = self.config.clone();
        let host = host.to_string();
        let task_futures = futures.clone();
        tokio::spawn(async move {
            run(&host, port, &config, transactions, &task_futures).await;
        });

        futures
    }
}

/// Drives one connection through all of its transactions.
async fn run(
    host: &str,
    port: u16,
    config: &DeliveryConfig,
    transactions: Vec<Transaction>,
    futures: &[DeliveryFuture],
) {
    tracing::debug!(host, port, transactions = transactions.len(), "starting delivery");

    let session = match open(host, port, config).await {
        Ok(session) => session,
        Err(err) => {
            abort_all(futures, &err);
            return;
        }
    };

    let (mut session, capabilities) = match prepare(session, host, config).await {
        Ok(ready) => ready,
        Err(err) => {
            abort_all(futures, &err);
            return;
        }
    };

    session.on_close(|| tracing::debug!("delivery session closed"));

    let total = transactions.len();
    for (index, (transaction, future)) in transactions.into_iter().zip(futures).enumerate() {
        match execute(&mut session, &capabilities, config, &transaction).await {
            Ok(result) => {
                // After a rejected envelope or a failed data phase the
                // server may still hold transaction state; clear it
                // before the next envelope.
                let needs_reset = result.failure.is_some()
                    || result.data_reply.as_ref().is_some_and(|r| !r.is_success());
                future.complete(result);
                if needs_reset && index + 1 < total {
                    let _ = session.send(&Command::Rset).await;
                }
            }
            Err(err) => {
                for remaining in &futures[index + 1..] {
                    remaining.complete(DeliveryResult::aborted(err.duplicate()));
                }
                future.complete(DeliveryResult::aborted(err));
                return;
            }
        }
    }

    let _ = session.send(&Command::Quit).await;
    session.close();
}

/// Opens the connection and consumes the greeting.
async fn open(host: &str, port: u16, config: &DeliveryConfig) -> Result<Session<TcpStream>> {
    let stream = match config.tls {
        TlsMode::Implicit => connection::connect_tls(host, port, config.connect_timeout).await?,
        _ => connection::connect(host, port, config.connect_timeout).await?,
    };

    let mut session = Session::new(stream, config.response_timeout);
    let greeting = session.read_greeting().await?;
    if !greeting.is_success() {
        return Err(Error::Negotiation { reply: greeting });
    }
    tracing::debug!(code = %greeting.code, "greeted");
    Ok(session)
}

/// Negotiates capabilities, applies extension policies, and performs the
/// optional TLS upgrade and authentication.
async fn prepare<S>(
    mut session: Session<S>,
    host: &str,
    config: &DeliveryConfig,
) -> Result<(Session<S>, Capabilities)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut capabilities = negotiate(&mut session, &config.client_hostname).await?;

    let upgrade = match config.tls {
        TlsMode::Required => {
            if !capabilities.starttls() {
                return Err(Error::unsupported(STARTTLS));
            }
            true
        }
        TlsMode::Opportunistic => capabilities.starttls() && !session.is_encrypted(),
        TlsMode::Disabled | TlsMode::Implicit => false,
    };

    if upgrade {
        let reply = session.send(&Command::StartTls).await?;
        if !reply.is_success() {
            return Err(Error::Negotiation { reply });
        }
        session = session.upgrade_tls(host).await?;
        tracing::debug!("upgraded to TLS");
        // The advertised set may differ over the encrypted channel.
        capabilities = negotiate(&mut session, &config.client_hostname).await?;
    }

    if config.pipelining == PipeliningMode::RequireSupported && !capabilities.pipelining() {
        return Err(Error::unsupported(PIPELINING));
    }

    if let Some(credentials) = &config.credentials {
        authenticate(&mut session, &capabilities, credentials).await?;
    }

    Ok((session, capabilities))
}

/// Sends EHLO and builds the capability set from its reply.
async fn negotiate<S>(session: &mut Session<S>, client_hostname: &str) -> Result<Capabilities>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let reply = session
        .send(&Command::Ehlo {
            hostname: client_hostname.to_string(),
        })
        .await?;
    if !reply.is_success() {
        return Err(Error::Negotiation { reply });
    }

    let capabilities = Capabilities::from_reply(&reply);
    tracing::debug!(extensions = capabilities.len(), "capabilities negotiated");
    Ok(capabilities)
}

/// Runs the credential exchange with the best mutually supported
/// mechanism.
async fn authenticate<S>(
    session: &mut Session<S>,
    capabilities: &Capabilities,
    credentials: &Credentials,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let advertised = capabilities.auth_mechanisms();
    let mechanism = if advertised.contains(&AuthMechanism::Plain) {
        AuthMechanism::Plain
    } else if advertised.contains(&AuthMechanism::Login) {
        AuthMechanism::Login
    } else {
        return Err(Error::unsupported(AUTH));
    };

    let reply = match mechanism {
        AuthMechanism::Plain => {
            let identity = format!("\0{}\0{}", credentials.username, credentials.password);
            session
                .send(&Command::Auth {
                    mechanism,
                    initial_response: Some(BASE64.encode(identity.as_bytes())),
                })
                .await?
        }
        AuthMechanism::Login => {
            let mut reply = session
                .send(&Command::Auth {
                    mechanism,
                    initial_response: None,
                })
                .await?;
            for secret in [&credentials.username, &credentials.password] {
                if reply.code != ReplyCode::AUTH_CONTINUE {
                    return Err(Error::Authentication { reply });
                }
                reply = session
                    .send(&Command::AuthData {
                        payload: BASE64.encode(secret.as_bytes()),
                    })
                    .await?;
            }
            reply
        }
    };

    if reply.is_success() {
        tracing::debug!(mechanism = mechanism.as_str(), "authenticated");
        Ok(())
    } else {
        Err(Error::Authentication { reply })
    }
}

/// Executes one transaction over a prepared session.
///
/// Returns `Err` only for connection-level failures; everything the
/// server rejects at the protocol level comes back as a completed or
/// aborted [`DeliveryResult`] over a still-usable session.
async fn execute<S>(
    session: &mut Session<S>,
    capabilities: &Capabilities,
    config: &DeliveryConfig,
    transaction: &Transaction,
) -> Result<DeliveryResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let pipelined = config.pipelining != PipeliningMode::Disabled && capabilities.pipelining();
    let envelope = Command::MailFrom {
        from: transaction.sender().clone(),
        body: None,
        size: capabilities
            .supports(SIZE)
            .then(|| transaction.message().len()),
    };
    let recipients = transaction.recipients();

    let statuses = if pipelined {
        let envelope_pending = session.submit(&envelope).await?;
        let mut recipient_pendings = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            recipient_pendings.push(
                session
                    .submit(&Command::RcptTo {
                        to: recipient.clone(),
                    })
                    .await?,
            );
        }

        let envelope_reply = session.resolve(envelope_pending).await?;
        if !envelope_reply.is_success() {
            // The server already produced a reply per pipelined RCPT;
            // drain them so the session stays aligned for the next
            // transaction.
            for pending in recipient_pendings {
                session.resolve(pending).await?;
            }
            return Ok(DeliveryResult::aborted(Error::EnvelopeRejected {
                reply: envelope_reply,
            }));
        }

        let mut statuses = Vec::with_capacity(recipients.len());
        for (recipient, pending) in recipients.iter().zip(recipient_pendings) {
            let reply = session.resolve(pending).await?;
            statuses.push(RecipientStatus::classify(recipient.clone(), reply));
        }
        statuses
    } else {
        let envelope_reply = session.send(&envelope).await?;
        if !envelope_reply.is_success() {
            return Ok(DeliveryResult::aborted(Error::EnvelopeRejected {
                reply: envelope_reply,
            }));
        }

        let mut statuses = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let reply = session
                .send(&Command::RcptTo {
                    to: recipient.clone(),
                })
                .await?;
            statuses.push(RecipientStatus::classify(recipient.clone(), reply));
        }
        statuses
    };

    let accepted = statuses.iter().filter(|s| s.is_accepted()).count();
    tracing::debug!(
        accepted,
        rejected = statuses.len() - accepted,
        pipelined,
        "recipient phase complete"
    );

    let mut data_reply = None;
    if accepted > 0 {
        let reply = session.send(&Command::Data).await?;
        if reply.code == ReplyCode::START_DATA {
            data_reply = Some(session.send_body(transaction.message()).await?);
        } else {
            // DATA itself refused; recorded as the transaction note.
            data_reply = Some(reply);
        }
        if data_reply.as_ref().is_some_and(Reply::is_permanent_error) {
            tracing::warn!("data phase rejected permanently");
        }
    }

    Ok(DeliveryResult::completed(statuses, data_reply))
}

fn abort_all(futures: &[DeliveryFuture], err: &Error) {
    tracing::debug!(error = %err, "delivery aborted before transactions began");
    for future in futures {
        future.complete(DeliveryResult::aborted(err.duplicate()));
    }
}
