//! SMTP reply parser.

use crate::error::{Error, Result};
use crate::types::{Reply, ReplyCode};

/// Parses an SMTP reply from accumulated response lines.
///
/// SMTP replies can be single-line or multi-line:
/// - Single: `250 OK\r\n`
/// - Multi: `250-First line\r\n250-Second line\r\n250 Last line\r\n`
///
/// # Errors
///
/// Returns an error if the reply is malformed or the lines do not agree
/// on one status code.
pub fn parse_reply(lines: &[String]) -> Result<Reply> {
    let Some(first) = lines.first() else {
        return Err(Error::Protocol("empty reply".into()));
    };

    let code = parse_code(first)?;

    let mut text = Vec::with_capacity(lines.len());
    for line in lines {
        if parse_code(line)? != code {
            return Err(Error::Protocol(format!(
                "reply code changed mid-reply: {line}"
            )));
        }
        // Skip code and separator (e.g., "250-" or "250 "); a bare code
        // line contributes an empty text line.
        text.push(line.get(4..).unwrap_or_default().to_string());
    }

    Ok(Reply::new(code, text))
}

/// Checks whether a line terminates a reply.
///
/// Continuation lines use `-` after the code; the final line uses a space
/// or carries nothing beyond the three-digit code.
#[must_use]
pub fn is_last_reply_line(line: &str) -> bool {
    line.len() == 3 || (line.len() >= 4 && line.as_bytes()[3] == b' ')
}

fn parse_code(line: &str) -> Result<ReplyCode> {
    if line.len() < 3 || !line.is_char_boundary(3) {
        return Err(Error::Protocol(format!("reply line too short: {line}")));
    }

    let code = line[..3]
        .parse::<u16>()
        .map_err(|_| Error::Protocol(format!("invalid reply code: {line}")))?;

    if !(200..=599).contains(&code) {
        return Err(Error::Protocol(format!("reply code out of range: {code}")));
    }

    Ok(ReplyCode::new(code))
}
