//! Connection establishment and stream management.

mod stream;

pub use stream::{SmtpStream, connect, connect_tls};
