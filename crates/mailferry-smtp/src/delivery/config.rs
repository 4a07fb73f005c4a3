//! Delivery configuration.

use std::sync::OnceLock;
use std::time::Duration;

/// Whether the agent batches commands ahead of their replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipeliningMode {
    /// Never pipeline, regardless of server support.
    #[default]
    Disabled,
    /// Pipeline when the server advertises it, degrade silently otherwise.
    AllowIfSupported,
    /// Fail the transaction locally when the server does not advertise it.
    RequireSupported,
}

/// TLS policy for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Never upgrade the connection.
    Disabled,
    /// Upgrade when the server advertises STARTTLS, continue in plain
    /// text otherwise.
    #[default]
    Opportunistic,
    /// Fail the transaction locally when STARTTLS is not advertised.
    Required,
    /// TLS from the first byte (implicit TLS, typically port 465).
    Implicit,
}

/// Username and password for the credential exchange.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Authentication username.
    pub username: String,
    /// Authentication password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Configuration for a delivery agent.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Pipelining policy.
    pub pipelining: PipeliningMode,
    /// TLS policy.
    pub tls: TlsMode,
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// Maximum time to wait for the reply to the oldest outstanding
    /// command.
    pub response_timeout: Duration,
    /// Credentials for the authentication exchange, if any.
    pub credentials: Option<Credentials>,
    /// Hostname announced in the EHLO command.
    pub client_hostname: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pipelining: PipeliningMode::default(),
            tls: TlsMode::default(),
            connect_timeout: Duration::from_secs(30),
            response_timeout: Duration::from_secs(60),
            credentials: None,
            client_hostname: "localhost".to_string(),
        }
    }
}

impl DeliveryConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lazily initialized process-wide default configuration.
    ///
    /// Read-only after first use.
    #[must_use]
    pub fn shared() -> &'static Self {
        static SHARED: OnceLock<DeliveryConfig> = OnceLock::new();
        SHARED.get_or_init(Self::default)
    }

    /// Sets the pipelining policy.
    #[must_use]
    pub const fn pipelining(mut self, mode: PipeliningMode) -> Self {
        self.pipelining = mode;
        self
    }

    /// Sets the TLS policy.
    #[must_use]
    pub const fn tls(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Sets the connection-establishment timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-reply response timeout.
    #[must_use]
    pub const fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the credentials for authentication.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    /// Sets the hostname announced in EHLO.
    #[must_use]
    pub fn client_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.client_hostname = hostname.into();
        self
    }
}
