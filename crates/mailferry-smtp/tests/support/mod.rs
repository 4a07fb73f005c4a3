//! Mock SMTP server for exercising delivery scenarios end to end.
//!
//! Serves one connection with scripted responses and records every
//! command line it receives, so tests can assert exactly which bytes the
//! client put on the wire.

#![allow(dead_code)] // Test utility module - not all methods used in every test

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Scripted responses for one mock connection.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Greeting sent on accept.
    pub greeting: String,
    /// EHLO continuation lines (one extension per entry).
    pub capabilities: Vec<String>,
    /// Responses to MAIL FROM, indexed per transaction; the last entry
    /// repeats for additional transactions.
    pub mail_responses: Vec<String>,
    /// Responses to RCPT TO, indexed per recipient within a transaction;
    /// the last entry repeats for additional recipients.
    pub rcpt_responses: Vec<String>,
    /// Response to DATA.
    pub data_response: String,
    /// Response after the terminating `.` line.
    pub body_response: String,
    /// Response to AUTH when no expected credential is configured.
    pub auth_response: String,
    /// When set, AUTH PLAIN succeeds only with exactly this payload.
    pub expected_plain: Option<String>,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            greeting: "220 mock.example.com ESMTP ready".to_string(),
            capabilities: Vec::new(),
            mail_responses: vec!["250 sender ok".to_string()],
            rcpt_responses: vec!["250 recipient ok".to_string()],
            data_response: "354 end data with <CRLF>.<CRLF>".to_string(),
            body_response: "250 queued".to_string(),
            auth_response: "235 authenticated".to_string(),
            expected_plain: None,
        }
    }
}

impl ServerScript {
    /// Creates a script with default, all-accepting responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the advertised extensions.
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the per-transaction MAIL FROM responses.
    pub fn with_mail_responses(mut self, responses: &[&str]) -> Self {
        self.mail_responses = responses.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the per-recipient RCPT TO responses.
    pub fn with_rcpt_responses(mut self, responses: &[&str]) -> Self {
        self.rcpt_responses = responses.iter().map(ToString::to_string).collect();
        self
    }

    /// Sets the response after the message body.
    pub fn with_body_response(mut self, response: &str) -> Self {
        self.body_response = response.to_string();
        self
    }

    /// Sets the AUTH response.
    pub fn with_auth_response(mut self, response: &str) -> Self {
        self.auth_response = response.to_string();
        self
    }

    /// Requires AUTH PLAIN with exactly this base64 payload.
    pub fn expecting_plain_credentials(mut self, payload: &str) -> Self {
        self.expected_plain = Some(payload.to_string());
        self
    }
}

/// Mock SMTP server bound to a loopback port.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockSmtpServer {
    /// Starts the server; it serves a single connection.
    pub async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&commands);

        let handle = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                serve(stream, script, recorded).await;
            }
        });

        Self {
            addr,
            commands,
            handle,
        }
    }

    /// Returns the host to connect to.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Returns the port to connect to.
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns every command line received so far.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Returns true if a command starting with the given verb arrived.
    pub fn received(&self, verb: &str) -> bool {
        self.commands()
            .iter()
            .any(|c| c.to_uppercase().starts_with(verb))
    }

    /// Stops the server task.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

async fn serve(stream: TcpStream, script: ServerScript, recorded: Arc<Mutex<Vec<String>>>) {
    let mut stream = BufReader::new(stream);
    if write_raw(&mut stream, &format!("{}\r\n", script.greeting))
        .await
        .is_err()
    {
        return;
    }

    let mut line = String::new();
    let mut mail_index = 0usize;
    let mut rcpt_index = 0usize;

    loop {
        line.clear();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end().to_string();
        recorded.lock().unwrap().push(command.clone());
        let upper = command.to_uppercase();

        let outcome = if upper.starts_with("EHLO") {
            write_raw(&mut stream, &ehlo_reply(&script.capabilities)).await
        } else if upper.starts_with("MAIL") {
            rcpt_index = 0;
            let response = script
                .mail_responses
                .get(mail_index)
                .or_else(|| script.mail_responses.last())
                .cloned()
                .unwrap_or_else(|| "250 sender ok".to_string());
            mail_index += 1;
            write_line(&mut stream, &response).await
        } else if upper.starts_with("RCPT") {
            let response = script
                .rcpt_responses
                .get(rcpt_index)
                .or_else(|| script.rcpt_responses.last())
                .cloned()
                .unwrap_or_else(|| "250 recipient ok".to_string());
            rcpt_index += 1;
            write_line(&mut stream, &response).await
        } else if upper == "DATA" {
            let outcome = write_line(&mut stream, &script.data_response).await;
            if outcome.is_ok() && script.data_response.starts_with("354") {
                if consume_body(&mut stream).await.is_err() {
                    break;
                }
                write_line(&mut stream, &script.body_response).await
            } else {
                outcome
            }
        } else if upper.starts_with("AUTH PLAIN") {
            let response = match &script.expected_plain {
                Some(expected) => {
                    if command.split_whitespace().nth(2) == Some(expected.as_str()) {
                        script.auth_response.clone()
                    } else {
                        "535 credentials invalid".to_string()
                    }
                }
                None => script.auth_response.clone(),
            };
            write_line(&mut stream, &response).await
        } else if upper.starts_with("AUTH LOGIN") {
            let outcome = auth_login_rounds(&mut stream, &recorded).await;
            if outcome.is_err() {
                break;
            }
            write_line(&mut stream, &script.auth_response).await
        } else if upper == "QUIT" {
            let _ = write_line(&mut stream, "221 bye").await;
            break;
        } else if upper == "RSET" || upper == "NOOP" {
            write_line(&mut stream, "250 ok").await
        } else if upper == "STARTTLS" {
            // The mock never actually negotiates TLS.
            write_line(&mut stream, "454 TLS not available").await
        } else {
            write_line(&mut stream, "502 command not implemented").await
        };

        if outcome.is_err() {
            break;
        }
    }
}

async fn auth_login_rounds(
    stream: &mut BufReader<TcpStream>,
    recorded: &Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    for challenge in ["334 VXNlcm5hbWU6", "334 UGFzc3dvcmQ6"] {
        write_line(stream, challenge).await?;
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "client went away mid-auth",
            ));
        }
        recorded.lock().unwrap().push(line.trim_end().to_string());
    }
    Ok(())
}

async fn consume_body(stream: &mut BufReader<TcpStream>) -> std::io::Result<()> {
    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "client went away mid-body",
            ));
        }
        if line.trim_end() == "." {
            return Ok(());
        }
    }
}

fn ehlo_reply(capabilities: &[String]) -> String {
    let mut lines = vec!["mock.example.com".to_string()];
    lines.extend(capabilities.iter().cloned());

    let mut out = String::new();
    for (index, text) in lines.iter().enumerate() {
        let separator = if index + 1 == lines.len() { ' ' } else { '-' };
        out.push_str(&format!("250{separator}{text}\r\n"));
    }
    out
}

async fn write_line(stream: &mut BufReader<TcpStream>, line: &str) -> std::io::Result<()> {
    write_raw(stream, &format!("{line}\r\n")).await
}

async fn write_raw(stream: &mut BufReader<TcpStream>, data: &str) -> std::io::Result<()> {
    stream.get_mut().write_all(data.as_bytes()).await?;
    stream.get_mut().flush().await
}
