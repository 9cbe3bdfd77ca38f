//! RESP (REdis Serialization Protocol) wire codec.
//!
//! Parses inbound command frames (RESP arrays of bulk strings) and packs
//! outbound replies in the five RESP reply kinds. This module owns only the
//! framing; command semantics live in [`crate::commands`].

use std::fmt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

/// A single parsed client command: the raw argv, case-preserved.
pub type Argv = Vec<Vec<u8>>;

/// A value to be written back to a client, covering every RESP reply kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    NullBulk,
    Array(Vec<Reply>),
    NullArray,
}

impl Reply {
    pub fn ok() -> Reply {
        Reply::Simple("OK".into())
    }

    pub fn bulk(v: impl Into<Vec<u8>>) -> Reply {
        Reply::Bulk(v.into())
    }

    pub fn err(msg: impl Into<String>) -> Reply {
        Reply::Error(msg.into())
    }

    /// Encodes this reply into a fresh buffer; convenient for callers (pub/
    /// sub fan-out, replication) that need the bytes in hand rather than
    /// appended to an existing write buffer.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Encodes this reply into its wire representation.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.push(b':');
                out.extend_from_slice(n.to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Bulk(b) => {
                out.push(b'$');
                out.extend_from_slice(b.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            Reply::NullBulk => out.extend_from_slice(b"$-1\r\n"),
            Reply::NullArray => out.extend_from_slice(b"*-1\r\n"),
            Reply::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
            }
        }
    }
}

/// Protocol-level failure: the connection is not salvageable and must close
/// after the error reply is flushed.
#[derive(Debug)]
pub struct ProtocolError(pub String);

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protocol error: {}", self.0)
    }
}

impl std::error::Error for ProtocolError {}

/// Reads one RESP command frame from `reader`.
///
/// Returns `Ok(None)` on clean EOF (no bytes read at all before closing).
/// Accepts only arrays of bulk strings, per the wire contract; anything else
/// is a [`ProtocolError`].
pub async fn read_frame<R>(reader: &mut BufReader<R>) -> Result<Option<Argv>, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = read_line(reader, &mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.is_empty() {
        return Err(ProtocolError("empty request line".into()));
    }

    match line[0] {
        b'*' => {
            let count = parse_i64(&line[1..])?;
            if count < 0 {
                return Ok(Some(Vec::new()));
            }
            let mut argv = Vec::with_capacity(count as usize);
            for _ in 0..count {
                argv.push(read_bulk_string(reader).await?);
            }
            Ok(Some(argv))
        }
        // Inline commands (space-separated, newline-terminated) are accepted
        // as a convenience for plain `nc`/telnet sessions, same as real Redis.
        _ => {
            let text = String::from_utf8(line)
                .map_err(|_| ProtocolError("invalid UTF-8 in inline command".into()))?;
            Ok(Some(
                text.split_ascii_whitespace()
                    .map(|p| p.as_bytes().to_vec())
                    .collect(),
            ))
        }
    }
}

async fn read_bulk_string<R>(reader: &mut BufReader<R>) -> Result<Vec<u8>, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = Vec::new();
    let n = read_line(reader, &mut line).await?;
    if n == 0 {
        return Err(ProtocolError("unexpected EOF reading bulk header".into()));
    }
    if line.first() != Some(&b'$') {
        return Err(ProtocolError(format!(
            "expected '$', got {:?}",
            String::from_utf8_lossy(&line)
        )));
    }
    let len = parse_i64(&line[1..])?;
    if len < 0 {
        return Ok(Vec::new());
    }
    let len = len as usize;
    let mut buf = vec![0u8; len + 2]; // + trailing CRLF
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| ProtocolError(format!("reading bulk body: {e}")))?;
    buf.truncate(len);
    Ok(buf)
}

async fn read_line<R>(reader: &mut BufReader<R>, out: &mut Vec<u8>) -> Result<usize, ProtocolError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let n = reader
        .read_until(b'\n', out)
        .await
        .map_err(|e| ProtocolError(format!("reading line: {e}")))?;
    if n == 0 {
        return Ok(0);
    }
    // Strip the trailing CRLF or LF.
    if out.last() == Some(&b'\n') {
        out.pop();
    }
    if out.last() == Some(&b'\r') {
        out.pop();
    }
    Ok(n)
}

fn parse_i64(bytes: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ProtocolError(format!("invalid integer: {:?}", String::from_utf8_lossy(bytes))))
}

/// Writes a reply to an async writer, flushing once.
pub async fn write_reply<W>(writer: &mut W, reply: &Reply) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    reply.encode(&mut buf);
    writer.write_all(&buf).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn parse(input: &[u8]) -> Option<Argv> {
        let mut reader = BufReader::new(Cursor::new(input.to_vec()));
        read_frame(&mut reader).await.unwrap()
    }

    #[tokio::test]
    async fn parses_bulk_array() {
        let argv = parse(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await.unwrap();
        assert_eq!(argv, vec![b"GET".to_vec(), b"foo".to_vec()]);
    }

    #[tokio::test]
    async fn parses_inline_command() {
        let argv = parse(b"PING\r\n").await.unwrap();
        assert_eq!(argv, vec![b"PING".to_vec()]);
    }

    #[tokio::test]
    async fn eof_returns_none() {
        assert!(parse(b"").await.is_none());
    }

    #[test]
    fn encodes_every_reply_kind() {
        let cases: Vec<(Reply, &[u8])> = vec![
            (Reply::Simple("OK".into()), b"+OK\r\n".as_slice()),
            (Reply::Error("ERR bad".into()), b"-ERR bad\r\n".as_slice()),
            (Reply::Integer(42), b":42\r\n".as_slice()),
            (Reply::Bulk(b"hi".to_vec()), b"$2\r\nhi\r\n".as_slice()),
            (Reply::NullBulk, b"$-1\r\n".as_slice()),
            (Reply::NullArray, b"*-1\r\n".as_slice()),
            (
                Reply::Array(vec![Reply::Integer(1), Reply::Integer(2)]),
                b"*2\r\n:1\r\n:2\r\n".as_slice(),
            ),
        ];
        for (reply, expected) in cases {
            let mut out = Vec::new();
            reply.encode(&mut out);
            assert_eq!(out, expected);
        }
    }
}
