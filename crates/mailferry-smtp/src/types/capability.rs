//! Server capability set parsed from the EHLO reply.

use std::collections::HashMap;

use super::Reply;

/// Extension keyword for command pipelining.
pub const PIPELINING: &str = "PIPELINING";
/// Extension keyword for the TLS upgrade.
pub const STARTTLS: &str = "STARTTLS";
/// Extension keyword for authentication.
pub const AUTH: &str = "AUTH";
/// Extension keyword for the message size limit.
pub const SIZE: &str = "SIZE";
/// Extension keyword for 8-bit MIME transport.
pub const EIGHT_BIT_MIME: &str = "8BITMIME";

/// Immutable snapshot of the extensions a server advertises.
///
/// Built once per connection from the EHLO reply and rebuilt after a TLS
/// upgrade (the advertised set may differ over the encrypted channel).
/// Extension names map to their optional parameter string; names the
/// client does not interpret are retained and queryable, so the set stays
/// forward-compatible with extensions this crate knows nothing about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    entries: HashMap<String, Option<String>>,
}

impl Capabilities {
    /// Builds the capability set from an EHLO reply.
    ///
    /// The first line is the server identity and is skipped; every
    /// continuation line names one extension with optional parameters.
    #[must_use]
    pub fn from_reply(reply: &Reply) -> Self {
        let mut entries = HashMap::new();
        for line in reply.lines.iter().skip(1) {
            let mut parts = line.splitn(2, char::is_whitespace);
            let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let parameter = parts.next().map(|p| p.trim().to_string());
            entries.insert(name.to_uppercase(), parameter);
        }
        Self { entries }
    }

    /// Returns true if the named extension is advertised.
    #[must_use]
    pub fn supports(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_uppercase())
    }

    /// Returns the parameter string of an advertised extension, if any.
    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_uppercase())
            .and_then(|p| p.as_deref())
    }

    /// Returns true if command pipelining is advertised.
    #[must_use]
    pub fn pipelining(&self) -> bool {
        self.supports(PIPELINING)
    }

    /// Returns true if the TLS upgrade is advertised.
    #[must_use]
    pub fn starttls(&self) -> bool {
        self.supports(STARTTLS)
    }

    /// Returns true if 8-bit MIME transport is advertised.
    #[must_use]
    pub fn eight_bit_mime(&self) -> bool {
        self.supports(EIGHT_BIT_MIME)
    }

    /// Returns the advertised maximum message size, if any.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.parameter(SIZE).and_then(|p| p.parse().ok())
    }

    /// Returns the advertised authentication mechanisms this crate can use.
    #[must_use]
    pub fn auth_mechanisms(&self) -> Vec<AuthMechanism> {
        self.parameter(AUTH)
            .map(|p| {
                p.split_whitespace()
                    .filter_map(AuthMechanism::parse)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the number of advertised extensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no extensions were advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the advertised extension names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN - single-round plaintext authentication
    Plain,
    /// LOGIN - legacy challenge/response plaintext
    Login,
}

impl AuthMechanism {
    /// Parses an authentication mechanism name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Returns the mechanism name as a string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }
}
