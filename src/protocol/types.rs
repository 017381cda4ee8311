//! Wire-level types for the Prodigy Remote In protocol: requests, replies, and the
//! value grammar (`Key:Value` arguments and `[v1,v2,...]` arrays).

use std::collections::BTreeMap;
use std::fmt;

/// A single outgoing request. Argument order is preserved (insertion order) because
/// the server does not require canonical ordering but reproducible logs are useful.
#[derive(Debug, Clone)]
pub struct Request {
    pub id: RequestId,
    pub command: String,
    pub args: Vec<(String, Value)>,
}

impl Request {
    pub fn new(id: RequestId, command: impl Into<String>) -> Self {
        Self {
            id,
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.push((key.into(), value.into()));
        self
    }

    /// Render the request as the exact bytes sent on the wire, without the
    /// trailing line feed.
    pub fn render(&self) -> String {
        let mut out = format!("?{} {}", self.id, self.command);
        for (k, v) in &self.args {
            out.push(' ');
            out.push_str(k);
            out.push(':');
            out.push_str(&v.render());
        }
        out
    }
}

/// A 4-hex-digit request identifier, uppercase, wrapping on overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u16);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl RequestId {
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        u16::from_str_radix(s, 16).ok().map(RequestId)
    }

    pub fn next(self) -> Self {
        RequestId(self.0.wrapping_add(1))
    }
}

/// An argument or outcome value: numeric, quoted string, bare enum/bool token, or
/// an array of doubles.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Integer(i64),
    Bool(bool),
    Token(String),
    QuotedString(String),
    Array(Vec<f64>),
}

impl Value {
    fn render(&self) -> String {
        match self {
            Value::Number(n) => format!("{n}"),
            Value::Integer(n) => format!("{n}"),
            Value::Bool(b) => b.to_string(),
            Value::Token(t) => t.clone(),
            Value::QuotedString(s) => format!("\"{}\"", escape_quoted(s)),
            Value::Array(values) => {
                let joined = values
                    .iter()
                    .map(|v| format!("{v}"))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("[{joined}]")
            }
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Value::Number(n) => format!("{n}"),
            Value::Integer(n) => format!("{n}"),
            Value::Bool(b) => b.to_string(),
            Value::Token(t) => t.clone(),
            Value::QuotedString(s) => s.clone(),
            Value::Array(values) => values
                .iter()
                .map(|v| format!("{v}"))
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Token(v.to_string())
    }
}

fn escape_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Status of a parsed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyStatus {
    Ok(BTreeMap<String, Value>),
    Error { code: u16, message: String },
}

/// A single parsed reply line, correlated to the request that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub id: RequestId,
    pub status: ReplyStatus,
}

impl Reply {
    pub fn outcome(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.status {
            ReplyStatus::Ok(map) => Some(map),
            ReplyStatus::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        assert_eq!(RequestId(1).to_string(), "0001");
        assert_eq!(RequestId(0xBEEF).to_string(), "BEEF");
    }

    #[test]
    fn test_request_id_parse_roundtrip() {
        let id = RequestId(0x1A2B);
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("zzzz"), None);
        assert_eq!(RequestId::parse("123"), None);
    }

    #[test]
    fn test_request_id_wraps() {
        assert_eq!(RequestId(0xFFFF).next(), RequestId(0x0000));
    }

    #[test]
    fn test_render_request_with_args() {
        let req = Request::new(RequestId(1), "DefineSpectrumFAT")
            .arg("StartEnergy", 400.0)
            .arg("LensMode", Value::Token("WideAngle".to_string()));
        assert_eq!(
            req.render(),
            "?0001 DefineSpectrumFAT StartEnergy:400 LensMode:WideAngle"
        );
    }

    #[test]
    fn test_quoted_string_escaping() {
        let v = Value::QuotedString("has \"quotes\" and \\backslash".to_string());
        assert_eq!(v.render(), "\"has \\\"quotes\\\" and \\\\backslash\"");
    }
}
