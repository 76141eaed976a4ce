//! Request parsing and response framing
//!
//! ```text
//! <command>\n
//! <key>=<value>\n      zero or more
//! \n                   end of options
//! <data line>\n        zero or more
//! \v\n                 end of data
//! ```

use relaygate_core::{Error, Result};
use std::collections::BTreeMap;
use tracing::{trace, warn};

/// Line that terminates the data section
pub const DATA_TERMINATOR: &str = "\x0b";

/// Parsed client request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Command token
    pub command: String,
    /// Option pairs
    pub options: BTreeMap<String, String>,
    /// Data lines, each terminated by `\n`
    pub data: String,
}

impl Request {
    /// Create a request without options or data
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Builder-style option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Option value, if present
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Option value, or a protocol error naming the missing key
    pub fn require(&self, key: &str) -> Result<&str> {
        self.option(key).ok_or_else(|| {
            Error::Protocol(format!("'{}' requires option '{key}'", self.command))
        })
    }

    /// Encode in request framing
    pub fn encode(&self) -> String {
        let mut out = format!("{}\n", self.command);
        write_body(&mut out, &self.options, &self.data);
        out
    }
}

/// Position of a client within its current request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseState {
    /// Waiting for a command line
    #[default]
    New,
    /// Reading `key=value` lines
    Options,
    /// Reading data lines
    Data,
    /// Request complete
    Done,
}

/// Incremental request parser, one per client
#[derive(Debug, Default)]
pub struct RequestParser {
    state: ParseState,
    request: Request,
}

impl RequestParser {
    /// Create a parser waiting for a command
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Feed one line without its `\n`; returns the request once complete
    pub fn feed_line(&mut self, line: &str) -> Option<Request> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        match self.state {
            ParseState::New | ParseState::Done => {
                let Some(command) = line.split_whitespace().next() else {
                    warn!("Could not parse command");
                    return None;
                };
                trace!(command = %command, "Client sent command");
                self.request = Request::new(command);
                self.state = ParseState::Options;
            }
            ParseState::Options => {
                if line.is_empty() {
                    self.state = ParseState::Data;
                    return None;
                }
                match line.split_once('=') {
                    Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                        self.request
                            .options
                            .insert(key.to_string(), value.to_string());
                    }
                    _ => warn!(line = %line, "Received invalid key/value pair, ignoring"),
                }
            }
            ParseState::Data => {
                if line == DATA_TERMINATOR {
                    self.state = ParseState::Done;
                    return Some(std::mem::take(&mut self.request));
                }
                self.request.data.push_str(line);
                self.request.data.push('\n');
            }
        }
        None
    }
}

/// Framed reply or push
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Command being answered
    pub command: String,
    /// Option pairs, written sorted by key
    pub options: BTreeMap<String, String>,
    /// Payload
    pub data: String,
}

impl Response {
    /// Create an empty response for `command`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Set an option
    pub fn option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.insert(key.into(), value.to_string());
        self
    }

    /// Append one data line
    pub fn line(mut self, line: impl AsRef<str>) -> Self {
        self.push_line(line);
        self
    }

    /// Append one data line in place
    pub fn push_line(&mut self, line: impl AsRef<str>) {
        self.data.push_str(line.as_ref());
        self.data.push('\n');
    }

    /// Replace the payload
    pub fn data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Mark success
    pub fn ok(self) -> Self {
        self.option("result", "ok")
    }

    /// Mark failure with a reason
    pub fn error(self, reason: impl ToString) -> Self {
        self.option("result", "error").option("error", reason)
    }

    /// Encode in response framing
    pub fn encode(&self) -> String {
        let mut out = format!("{} response\n", self.command);
        write_body(&mut out, &self.options, &self.data);
        out
    }
}

fn write_body(out: &mut String, options: &BTreeMap<String, String>, data: &str) {
    for (key, value) in options {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
    out.push_str(data);
    out.push_str(DATA_TERMINATOR);
    out.push('\n');
}

/// Parse every complete response in `text`
///
/// Used by clients and tests; a trailing partial frame is ignored.
pub fn parse_responses(text: &str) -> Vec<Response> {
    let mut parser = RequestParser::new();
    text.split('\n')
        .filter_map(|line| parser.feed_line(line))
        .map(|request| Response {
            command: request.command,
            options: request.options,
            data: request.data,
        })
        .collect()
}
