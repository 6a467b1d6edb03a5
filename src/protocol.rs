//! Wire protocol: line-delimited JSON.
//!
//! Each request and each response is a single JSON object terminated by a
//! `'\n'` byte. The delimiter is the framing contract in both directions:
//! requests are reassembled across reads until a delimiter arrives, and
//! every response is written as one self-delimited frame.

use bytes::BytesMut;
use serde_json::{Map, Value};

/// Key of the command-name field in a request object.
pub const CMD_FIELD: &str = "cmd";

/// A parsed client request.
///
/// Any JSON object is a valid request; the command name is taken from the
/// `cmd` field and defaults to the empty string when absent or non-string,
/// which routes to the unknown-command error path.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    cmd: String,
    payload: Value,
}

impl Request {
    /// Parse one frame (without its delimiter) into a request.
    pub fn parse(frame: &[u8]) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_slice(frame).map_err(ParseError::Json)?;

        let Value::Object(ref obj) = value else {
            return Err(ParseError::NotAnObject);
        };

        let cmd = match obj.get(CMD_FIELD) {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };

        Ok(Request {
            cmd,
            payload: value,
        })
    }

    /// Build a request directly, bypassing the wire format.
    pub fn new(cmd: impl Into<String>, payload: Value) -> Self {
        Request {
            cmd: cmd.into(),
            payload,
        }
    }

    /// The command name, empty if the request carried none.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// The full request object, for handlers that take arguments.
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

/// Request parsing errors
#[derive(Debug)]
pub enum ParseError {
    /// Input is not syntactically valid JSON
    Json(serde_json::Error),
    /// Input is valid JSON but not an object
    NotAnObject,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Json(e) => write!(f, "Invalid JSON: {}", e),
            ParseError::NotAnObject => write!(f, "Request is not a JSON object"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A response payload, serialized as one newline-terminated JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    body: Value,
}

impl Response {
    /// Wrap an arbitrary JSON value as a response.
    pub fn new(body: Value) -> Self {
        Response { body }
    }

    /// Error response for input that failed to parse:
    /// `{"status":"error","error":{"1":"malformed"}}`
    pub fn malformed() -> Self {
        Self::error("1", "malformed")
    }

    /// Error response for a command no handler is registered for:
    /// `{"status":"error","error":{"2":"unknown command"}}`
    pub fn unknown_command() -> Self {
        Self::error("2", "unknown command")
    }

    /// Error response for a frame exceeding the request size limit:
    /// `{"status":"error","error":{"3":"request too large"}}`
    pub fn too_large() -> Self {
        Self::error("3", "request too large")
    }

    fn error(code: &str, message: &str) -> Self {
        let mut detail = Map::new();
        detail.insert(code.to_string(), Value::String(message.to_string()));

        let mut body = Map::new();
        body.insert("status".to_string(), Value::String("error".to_string()));
        body.insert("error".to_string(), Value::Object(detail));

        Response {
            body: Value::Object(body),
        }
    }

    /// Serialize to wire form: JSON followed by the `'\n'` delimiter.
    pub fn encode(&self) -> Vec<u8> {
        // Value serialization cannot fail for the object trees built here
        let mut frame = serde_json::to_vec(&self.body).unwrap_or_default();
        frame.push(b'\n');
        frame
    }

    /// The response object itself.
    pub fn body(&self) -> &Value {
        &self.body
    }
}

/// Split one complete frame off the front of `buf`, if a delimiter is
/// present. The returned frame excludes the `'\n'` (and a preceding `'\r'`,
/// tolerated for clients that send CRLF line endings).
pub fn next_frame(buf: &mut BytesMut) -> Option<BytesMut> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let mut frame = buf.split_to(pos + 1);
    frame.truncate(pos);
    if frame.last() == Some(&b'\r') {
        frame.truncate(frame.len() - 1);
    }
    Some(frame)
}
