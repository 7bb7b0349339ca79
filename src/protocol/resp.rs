use bytes::{Buf, BytesMut};
use std::io;

/// RESP (Redis Serialization Protocol) value types.
///
/// Supports RESP2 and RESP3 core types including null variants.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    // RESP2 types
    SimpleString(String),           // +
    Error(String),                  // -
    Integer(i64),                   // :
    BulkString(Option<String>),     // $ (None = null in RESP2)
    Array(Option<Vec<RespValue>>),  // * (None = null in RESP2)

    // RESP3 types
    Null,                          // _ (dedicated null type)
    Boolean(bool),                 // # (true/false)
    Double(f64),                   // , (floating point)
    Set(Vec<RespValue>),          // ~ (unordered collection)
    Map(Vec<(RespValue, RespValue)>), // % (key-value pairs)
}

impl RespValue {
    /// Build the wire form of a command: an array of bulk strings.
    pub fn command<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        RespValue::Array(Some(
            parts
                .into_iter()
                .map(|p| RespValue::BulkString(Some(p.into())))
                .collect(),
        ))
    }

    /// Serialize this value to Redis wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            // RESP2 types
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(e) => format!("-{}\r\n", e).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(Some(s)) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            RespValue::BulkString(None) => b"$-1\r\n".to_vec(),
            RespValue::Array(Some(arr)) => {
                let mut result = format!("*{}\r\n", arr.len()).into_bytes();
                for item in arr {
                    result.extend_from_slice(&item.to_bytes());
                }
                result
            }
            RespValue::Array(None) => b"*-1\r\n".to_vec(),

            // RESP3 types
            RespValue::Null => b"_\r\n".to_vec(),
            RespValue::Boolean(true) => b"#t\r\n".to_vec(),
            RespValue::Boolean(false) => b"#f\r\n".to_vec(),
            RespValue::Double(d) => format!(",{}\r\n", d).into_bytes(),
            RespValue::Set(items) => {
                let mut result = format!("~{}\r\n", items.len()).into_bytes();
                for item in items {
                    result.extend_from_slice(&item.to_bytes());
                }
                result
            }
            RespValue::Map(pairs) => {
                let mut result = format!("%{}\r\n", pairs.len()).into_bytes();
                for (key, value) in pairs {
                    result.extend_from_slice(&key.to_bytes());
                    result.extend_from_slice(&value.to_bytes());
                }
                result
            }
        }
    }

    /// True for every flavour of "no value": null bulk string, null array, RESP3 null.
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            RespValue::Null | RespValue::BulkString(None) | RespValue::Array(None)
        )
    }

    /// Textual payload of string-like replies.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            RespValue::BulkString(Some(s)) | RespValue::SimpleString(s) => s.parse().ok(),
            RespValue::Boolean(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            RespValue::Double(d) => Some(*d),
            RespValue::Integer(i) => Some(*i as f64),
            RespValue::BulkString(Some(s)) | RespValue::SimpleString(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Elements of aggregate replies. Nulls are an empty aggregate.
    pub fn into_elements(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(Some(items)) | RespValue::Set(items) => Some(items),
            RespValue::Array(None) | RespValue::Null => Some(Vec::new()),
            RespValue::Map(pairs) => Some(
                pairs
                    .into_iter()
                    .flat_map(|(k, v)| [k, v])
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// Stateful parser for Redis protocol replies.
///
/// Accumulates data in a buffer and yields complete RESP values. Bytes are
/// only consumed once a whole value is available, so a reply split across
/// several reads is reassembled correctly.
pub struct RespParser {
    buffer: BytesMut,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add incoming bytes to the parser buffer.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Reset the parser buffer to recover from errors.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Parse next complete value. Returns None if incomplete.
    pub fn parse(&mut self) -> Result<Option<RespValue>, io::Error> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        tracing::trace!("Parsing buffer: {} bytes", self.buffer.len());

        match parse_value(&self.buffer, 0)? {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

type Parsed = Option<(RespValue, usize)>;

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

fn parse_value(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    let Some(&type_byte) = buf.get(pos) else {
        return Ok(None);
    };
    let pos = pos + 1;

    match type_byte {
        // RESP2 types
        b'+' => Ok(read_line(buf, pos)?.map(|(l, p)| (RespValue::SimpleString(l), p))),
        b'-' => Ok(read_line(buf, pos)?.map(|(l, p)| (RespValue::Error(l), p))),
        b':' => parse_integer(buf, pos),
        b'$' => parse_bulk_string(buf, pos),
        b'*' => parse_array(buf, pos),

        // RESP3 types
        b'_' => parse_null(buf, pos),
        b'#' => parse_boolean(buf, pos),
        b',' => parse_double(buf, pos),
        b'~' => parse_aggregate(buf, pos, "set"),
        b'%' => parse_map(buf, pos),

        _ => Err(invalid(format!(
            "Invalid RESP type byte: {}",
            type_byte as char
        ))),
    }
}

fn read_line(buf: &[u8], pos: usize) -> Result<Option<(String, usize)>, io::Error> {
    let rest = &buf[pos..];
    match rest.windows(2).position(|w| w == b"\r\n") {
        Some(end) => {
            let line = std::str::from_utf8(&rest[..end]).map_err(|_| invalid("Invalid UTF-8"))?;
            Ok(Some((line.to_string(), pos + end + 2)))
        }
        None => Ok(None),
    }
}

fn read_length(buf: &[u8], pos: usize, what: &str) -> Result<Option<(i64, usize)>, io::Error> {
    match read_line(buf, pos)? {
        Some((line, next)) => {
            let len = line
                .parse::<i64>()
                .map_err(|_| invalid(format!("Invalid {} length", what)))?;
            Ok(Some((len, next)))
        }
        None => Ok(None),
    }
}

fn parse_integer(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    match read_line(buf, pos)? {
        Some((line, next)) => {
            let num = line.parse::<i64>().map_err(|_| invalid("Invalid integer"))?;
            Ok(Some((RespValue::Integer(num), next)))
        }
        None => Ok(None),
    }
}

fn parse_bulk_string(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    let Some((length, pos)) = read_length(buf, pos, "bulk string")? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((RespValue::BulkString(None), pos)));
    }
    if length < 0 {
        return Err(invalid("Invalid bulk string length"));
    }

    let length = length as usize;
    if buf.len().saturating_sub(pos) < length.saturating_add(2) {
        return Ok(None); // Not enough data
    }

    let string = String::from_utf8(buf[pos..pos + length].to_vec())
        .map_err(|_| invalid("Invalid UTF-8"))?;

    if &buf[pos + length..pos + length + 2] != b"\r\n" {
        return Err(invalid("Bulk string not terminated by CRLF"));
    }

    Ok(Some((RespValue::BulkString(Some(string)), pos + length + 2)))
}

fn parse_array(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    let Some((length, pos)) = read_length(buf, pos, "array")? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((RespValue::Array(None), pos)));
    }

    match parse_elements(buf, pos, length, "array")? {
        Some((elements, next)) => Ok(Some((RespValue::Array(Some(elements)), next))),
        None => Ok(None),
    }
}

fn parse_elements(
    buf: &[u8],
    mut pos: usize,
    length: i64,
    what: &str,
) -> Result<Option<(Vec<RespValue>, usize)>, io::Error> {
    if length < 0 {
        return Err(invalid(format!("Invalid {} length", what)));
    }

    // Every element takes at least three bytes, so the declared length is
    // never trusted beyond what the buffer could hold.
    let capacity = (length as usize).min(buf.len().saturating_sub(pos) / 3);
    let mut elements = Vec::with_capacity(capacity);
    for _ in 0..length {
        match parse_value(buf, pos)? {
            Some((element, next)) => {
                elements.push(element);
                pos = next;
            }
            None => return Ok(None), // Not enough data
        }
    }
    Ok(Some((elements, pos)))
}

// RESP3 parsers
fn parse_null(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    // Null is just _\r\n
    if buf.len() >= pos + 2 {
        if &buf[pos..pos + 2] == b"\r\n" {
            Ok(Some((RespValue::Null, pos + 2)))
        } else {
            Err(invalid("Invalid null"))
        }
    } else {
        Ok(None)
    }
}

fn parse_boolean(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    // Boolean is #t\r\n or #f\r\n
    if buf.len() < pos + 3 {
        return Ok(None);
    }

    let value = match buf[pos] {
        b't' => true,
        b'f' => false,
        c => return Err(invalid(format!("Invalid boolean value: {}", c as char))),
    };

    if &buf[pos + 1..pos + 3] == b"\r\n" {
        Ok(Some((RespValue::Boolean(value), pos + 3)))
    } else {
        Err(invalid("Invalid boolean"))
    }
}

fn parse_double(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    match read_line(buf, pos)? {
        Some((line, next)) => {
            let num = match line.as_str() {
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => other.parse::<f64>().map_err(|_| invalid("Invalid double"))?,
            };
            Ok(Some((RespValue::Double(num), next)))
        }
        None => Ok(None),
    }
}

fn parse_aggregate(buf: &[u8], pos: usize, what: &str) -> Result<Parsed, io::Error> {
    let Some((length, pos)) = read_length(buf, pos, what)? else {
        return Ok(None);
    };

    match parse_elements(buf, pos, length, what)? {
        Some((elements, next)) => Ok(Some((RespValue::Set(elements), next))),
        None => Ok(None),
    }
}

fn parse_map(buf: &[u8], pos: usize) -> Result<Parsed, io::Error> {
    let Some((length, pos)) = read_length(buf, pos, "map")? else {
        return Ok(None);
    };

    let Some((flat, next)) = parse_elements(buf, pos, length.saturating_mul(2), "map")? else {
        return Ok(None);
    };

    let mut pairs = Vec::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(Some((RespValue::Map(pairs), next)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_serialization() {
        let value = RespValue::command(["SET", "k", "v"]);
        assert_eq!(value.to_bytes(), b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }

    #[test]
    fn test_null_bulk_string_serialization() {
        let value = RespValue::BulkString(None);
        assert_eq!(value.to_bytes(), b"$-1\r\n");
    }

    #[test]
    fn test_array_serialization() {
        let value = RespValue::Array(Some(vec![
            RespValue::SimpleString("OK".to_string()),
            RespValue::Integer(42),
        ]));
        assert_eq!(value.to_bytes(), b"*2\r\n+OK\r\n:42\r\n");
    }

    #[test]
    fn test_error_reply_parsing() {
        let mut parser = RespParser::new();
        parser.add_data(b"-MOVED 3999 127.0.0.1:6381\r\n");

        let result = parser.parse().unwrap().unwrap();
        assert_eq!(result, RespValue::Error("MOVED 3999 127.0.0.1:6381".to_string()));
    }

    #[test]
    fn test_bulk_string_parsing() {
        let mut parser = RespParser::new();
        parser.add_data(b"$5\r\nhello\r\n");

        let result = parser.parse().unwrap().unwrap();
        assert_eq!(result.as_str(), Some("hello"));
    }

    #[test]
    fn test_null_bulk_string_parsing() {
        let mut parser = RespParser::new();
        parser.add_data(b"$-1\r\n");

        let result = parser.parse().unwrap().unwrap();
        assert!(result.is_null());
    }

    #[test]
    fn test_scan_reply_parsing() {
        let mut parser = RespParser::new();
        parser.add_data(b"*2\r\n$2\r\n17\r\n*2\r\n$2\r\nk1\r\n$2\r\nk2\r\n");

        let result = parser.parse().unwrap().unwrap();
        let parts = result.into_elements().unwrap();
        assert_eq!(parts[0].as_integer(), Some(17));
        assert_eq!(parts[1].clone().into_elements().unwrap().len(), 2);
    }

    #[test]
    fn test_incomplete_data_is_not_consumed() {
        let mut parser = RespParser::new();
        parser.add_data(b"*2\r\n$5\r\nhel");
        assert!(parser.parse().unwrap().is_none());

        parser.add_data(b"lo\r\n:7\r\n");
        let result = parser.parse().unwrap().unwrap();
        assert_eq!(
            result,
            RespValue::Array(Some(vec![
                RespValue::BulkString(Some("hello".to_string())),
                RespValue::Integer(7),
            ]))
        );
    }

    #[test]
    fn test_invalid_length() {
        let mut parser = RespParser::new();
        parser.add_data(b"$-5\r\n");
        assert!(parser.parse().is_err());
    }

    #[test]
    fn test_oversized_aggregate_header_waits_for_data() {
        let mut parser = RespParser::new();
        parser.add_data(b"*9223372036854775807\r\n");
        assert!(parser.parse().unwrap().is_none());

        let mut parser = RespParser::new();
        parser.add_data(b"%9223372036854775807\r\n+f\r\n");
        assert!(parser.parse().unwrap().is_none());

        let mut parser = RespParser::new();
        parser.add_data(b"$9223372036854775807\r\nabc");
        assert!(parser.parse().unwrap().is_none());
    }

    #[test]
    fn test_multiple_replies() {
        let mut parser = RespParser::new();
        parser.add_data(b"+OK\r\n:42\r\n");

        assert_eq!(
            parser.parse().unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(parser.parse().unwrap(), Some(RespValue::Integer(42)));
        assert_eq!(parser.parse().unwrap(), None);
    }

    #[test]
    fn test_resp3_parsing() {
        let mut parser = RespParser::new();
        parser.add_data(b"_\r\n#t\r\n,3.5\r\n%1\r\n+f\r\n:1\r\n");

        assert_eq!(parser.parse().unwrap(), Some(RespValue::Null));
        assert_eq!(parser.parse().unwrap(), Some(RespValue::Boolean(true)));
        assert_eq!(parser.parse().unwrap(), Some(RespValue::Double(3.5)));
        match parser.parse().unwrap().unwrap() {
            RespValue::Map(pairs) => {
                assert_eq!(pairs.len(), 1);
                assert_eq!(pairs[0].1, RespValue::Integer(1));
            }
            other => panic!("Expected Map, got {:?}", other),
        }
    }

    #[test]
    fn test_parser_reset() {
        let mut parser = RespParser::new();
        parser.add_data(b"$-5\r\n");
        assert!(parser.parse().is_err());

        parser.reset();

        parser.add_data(b"+OK\r\n");
        let result = parser.parse().unwrap();
        assert!(matches!(result, Some(RespValue::SimpleString(_))));
    }
}
