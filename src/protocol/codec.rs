//! Hand-written reply tokenizer.
//!
//! The reply grammar is small and unambiguous (prefix char, 4-hex id, status,
//! optional key:value list, optional array), so a character-scanning parser is used
//! rather than pulling in a regex dependency.

use std::collections::BTreeMap;

use crate::error::ProdigyError;
use crate::protocol::types::{Reply, ReplyStatus, RequestId, Value};

/// Parse one reply line (without the trailing LF).
pub fn parse_reply(line: &str) -> Result<Reply, ProdigyError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut chars = line.char_indices().peekable();

    let (_, first) = chars.next().ok_or_else(|| framing(line))?;
    if first != '!' {
        return Err(framing(line));
    }

    let id_start = 1;
    let id_end = id_start + 4;
    if line.len() < id_end {
        return Err(framing(line));
    }
    let id_str = &line[id_start..id_end];
    let id = RequestId::parse(id_str).ok_or_else(|| framing(line))?;

    let rest = line[id_end..].strip_prefix(' ').ok_or_else(|| framing(line))?;

    if let Some(after_ok) = rest.strip_prefix("OK") {
        let args = if let Some(kv) = after_ok.strip_prefix(": ") {
            parse_kv_list(kv).map_err(|_| framing(line))?
        } else if after_ok.is_empty() {
            BTreeMap::new()
        } else {
            return Err(framing(line));
        };
        Ok(Reply {
            id,
            status: ReplyStatus::Ok(args),
        })
    } else if let Some(after_err) = rest.strip_prefix("Error: ") {
        let (code_str, msg_part) = after_err
            .split_once(' ')
            .ok_or_else(|| framing(line))?;
        let code: u16 = code_str.parse().map_err(|_| framing(line))?;
        let message = parse_quoted_string(msg_part).ok_or_else(|| framing(line))?;
        Ok(Reply {
            id,
            status: ReplyStatus::Error { code, message },
        })
    } else {
        Err(framing(line))
    }
}

fn framing(line: &str) -> ProdigyError {
    ProdigyError::ProtocolFraming(line.to_string())
}

/// Parse a space-separated `Key:Value` list into an ordered map. Values are typed
/// heuristically: `[...]` is an array, a quoted run is a string, otherwise a bare
/// token (which callers coerce as needed).
fn parse_kv_list(s: &str) -> Result<BTreeMap<String, Value>, ()> {
    let mut map = BTreeMap::new();
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i] == b' ' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b':' {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(());
        }
        let key = s[key_start..i].to_string();
        i += 1; // skip ':'

        let (value, next) = parse_value(s, i)?;
        map.insert(key, value);
        i = next;
    }
    Ok(map)
}

fn parse_value(s: &str, start: usize) -> Result<(Value, usize), ()> {
    let bytes = s.as_bytes();
    if start >= bytes.len() {
        return Err(());
    }
    match bytes[start] {
        b'"' => {
            let (string, end) = scan_quoted(s, start)?;
            Ok((Value::QuotedString(string), end))
        }
        b'[' => {
            let end = find_matching_bracket(s, start).ok_or(())?;
            let inner = &s[start + 1..end - 1];
            match parse_numeric_array(inner) {
                Some(values) => Ok((Value::Array(values), end)),
                // Not a numeric array (e.g. a quoted string list like
                // Names:["Pass Energy [eV]","Lens Mode"]): keep the bracketed
                // text verbatim as a token rather than lossily emptying it.
                None => Ok((Value::Token(s[start..end].to_string()), end)),
            }
        }
        _ => {
            let end = s[start..]
                .find(' ')
                .map(|p| start + p)
                .unwrap_or(s.len());
            let token = &s[start..end];
            Ok((Value::Token(token.to_string()), end))
        }
    }
}

/// Find the `]` matching the `[` at `start`, skipping over quoted runs so a
/// `]` inside a quoted element (e.g. the unit suffix in `"Pass Energy [eV]"`)
/// does not prematurely close the bracket.
fn find_matching_bracket(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = start + 1;
    let mut in_quotes = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_quotes && i + 1 < bytes.len() => i += 2,
            b'"' => {
                in_quotes = !in_quotes;
                i += 1;
            }
            b']' if !in_quotes => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

/// Parse comma-separated content as a pure numeric array; `None` if any element
/// fails to parse as a double, signalling the bracketed value is something else
/// (a quoted string list) rather than a malformed numeric array.
fn parse_numeric_array(inner: &str) -> Option<Vec<f64>> {
    if inner.trim().is_empty() {
        return Some(Vec::new());
    }
    inner
        .split(',')
        .map(|tok| tok.trim().parse::<f64>())
        .collect::<Result<Vec<f64>, _>>()
        .ok()
}

fn scan_quoted(s: &str, start: usize) -> Result<(String, usize), ()> {
    let bytes = s.as_bytes();
    if bytes.get(start) != Some(&b'"') {
        return Err(());
    }
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if i + 1 < bytes.len() => {
                out.push(bytes[i + 1] as char);
                i += 2;
            }
            b'"' => {
                return Ok((out, i + 1));
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    Err(())
}

fn parse_quoted_string(s: &str) -> Option<String> {
    let s = s.trim();
    scan_quoted(s, 0).ok().map(|(string, _)| string)
}

/// Decode the `[v1,v2,...]` grammar used by `GetAcquisitionData`'s `Data` field.
/// Malformed tokens are skipped silently, per the spec's tolerant-array contract.
pub fn parse_array(raw: &str) -> Vec<f64> {
    let raw = raw.trim();
    let inner = raw.strip_prefix('[').and_then(|r| r.strip_suffix(']'));
    match inner {
        Some(inner) if !inner.trim().is_empty() => inner
            .split(',')
            .filter_map(|tok| tok.trim().parse::<f64>().ok())
            .collect(),
        Some(_) => Vec::new(),
        None => Vec::new(),
    }
}
