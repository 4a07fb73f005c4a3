//! Email address type for the SMTP envelope.

use crate::error::{Error, Result};

/// Email address used in MAIL FROM / RCPT TO commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not of the form `local@domain`.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validates an envelope address (basic validation).
    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress(format!("missing @ in {addr}")));
        };

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(format!(
                "empty local or domain part in {addr}"
            )));
        }

        if domain.contains('@') {
            return Err(Error::InvalidAddress(format!("multiple @ in {addr}")));
        }

        // Angle brackets and whitespace would corrupt the envelope command.
        if addr.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
            return Err(Error::InvalidAddress(format!(
                "illegal character in {addr}"
            )));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
