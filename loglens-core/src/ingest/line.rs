//! Access log line grammar
//!
//! One fixed format is supported, the combined log format:
//!
//! ```text
//! 127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] "GET /apache_pb.gif HTTP/1.0" 200 2326 "http://ref/" "Mozilla/4.08"
//! ```
//!
//! Lines that do not match are rejected with `None`. Rejection is not an error:
//! the caller still counts and hashes the line.

use regex::Regex;
use std::sync::OnceLock;

/// Fields extracted from one matching line, borrowed from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFields<'a> {
    /// Client address
    pub client: &'a str,
    /// Bracketed timestamp contents, e.g. `10/Oct/2000:13:55:36 -0700`
    pub timestamp: &'a str,
    pub method: &'a str,
    pub path: &'a str,
    pub protocol: &'a str,
    pub status: u16,
    /// Response size, `-` read as 0
    pub bytes: u64,
}

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(
            r#"^(\S+)\s+\S+\s+\S+\s+\[([^\]]+)\]\s+"(\S+)\s+([^"]+)\s+(\S+)"\s+(\d{3})\s+(\d+|-)\s+"([^"]*)"\s+"([^"]*)"$"#,
        )
        .expect("access log grammar is a valid regex")
    })
}

/// Parse one line (without its terminator; a trailing `\r` is tolerated).
pub fn parse(line: &str) -> Option<RawFields<'_>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let caps = grammar().captures(line)?;

    let status = caps.get(6)?.as_str().parse().ok()?;
    let bytes = match caps.get(7)?.as_str() {
        "-" => 0,
        digits => digits.parse().ok()?,
    };

    Some(RawFields {
        client: caps.get(1)?.as_str(),
        timestamp: caps.get(2)?.as_str(),
        method: caps.get(3)?.as_str(),
        path: caps.get(4)?.as_str(),
        protocol: caps.get(5)?.as_str(),
        status,
        bytes,
    })
}
