//! Memcached text protocol framing.
//!
//! Only the subset the loader and the stub store need: `set`, `get`, and the
//! replies to them. Both directions are `tokio_util` codecs so either side can
//! be driven through `Framed`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;
/// Longest command or reply line accepted before the peer is considered broken.
const MAX_LINE_LEN: usize = 4096;
/// Largest data block accepted, memcached's default item size.
const MAX_VALUE_LEN: usize = 1024 * 1024;

/// A command sent by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemcacheRequest {
    Set {
        key: String,
        flags: u32,
        exptime: u32,
        value: Bytes,
    },
    Get {
        keys: Vec<String>,
    },
}

/// A reply line (plus data block for `VALUE`) sent by a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemcacheReply {
    Stored,
    NotStored,
    Value { key: String, flags: u32, data: Bytes },
    End,
    Error,
    ClientError(String),
    ServerError(String),
}

/// What the server-side codec yields for each inbound command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerFrame {
    Request(MemcacheRequest),
    Malformed(String),
}

/// Keys must be 1..=250 bytes with no whitespace or control characters.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key.bytes().all(|b| b > b' ' && b != 0x7f)
}

/// Client side: encodes requests, decodes replies.
#[derive(Debug, Default)]
pub struct MemcacheClientCodec;

/// Server side: decodes requests, encodes replies.
#[derive(Debug, Default)]
pub struct MemcacheServerCodec;

impl Encoder<MemcacheRequest> for MemcacheClientCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: MemcacheRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            MemcacheRequest::Set {
                key,
                flags,
                exptime,
                value,
            } => {
                let header = format!("set {key} {flags} {exptime} {}\r\n", value.len());
                dst.reserve(header.len() + value.len() + 2);
                dst.put_slice(header.as_bytes());
                dst.put_slice(&value);
                dst.put_slice(b"\r\n");
            }
            MemcacheRequest::Get { keys } => {
                dst.put_slice(b"get");
                for key in keys {
                    dst.put_u8(b' ');
                    dst.put_slice(key.as_bytes());
                }
                dst.put_slice(b"\r\n");
            }
        }
        Ok(())
    }
}

impl Decoder for MemcacheClientCodec {
    type Item = MemcacheReply;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(line_len) = find_line(src)? else {
            return Ok(None);
        };
        let line = std::str::from_utf8(&src[..line_len])
            .map_err(|_| invalid_data("reply line is not utf-8"))?
            .to_string();

        if let Some(rest) = line.strip_prefix("VALUE ") {
            let mut parts = rest.split(' ');
            let key = parts.next().unwrap_or_default().to_string();
            let flags = parse_field::<u32>(parts.next(), "VALUE flags")?;
            let len = parse_field::<usize>(parts.next(), "VALUE length")?;
            let frame_len = data_frame_len(line_len, len)
                .ok_or_else(|| invalid_data(format!("VALUE length {len} too large")))?;
            if src.len() < frame_len {
                src.reserve(frame_len - src.len());
                return Ok(None);
            }
            src.advance(line_len + 2);
            let data = src.split_to(len).freeze();
            if &src[..2] != b"\r\n" {
                return Err(invalid_data("VALUE data block not terminated"));
            }
            src.advance(2);
            return Ok(Some(MemcacheReply::Value { key, flags, data }));
        }

        src.advance(line_len + 2);
        let reply = match line.as_str() {
            "STORED" => MemcacheReply::Stored,
            "NOT_STORED" => MemcacheReply::NotStored,
            "END" => MemcacheReply::End,
            "ERROR" => MemcacheReply::Error,
            other => {
                if let Some(msg) = other.strip_prefix("CLIENT_ERROR") {
                    MemcacheReply::ClientError(msg.trim().to_string())
                } else if let Some(msg) = other.strip_prefix("SERVER_ERROR") {
                    MemcacheReply::ServerError(msg.trim().to_string())
                } else {
                    return Err(invalid_data(format!("unexpected reply {other:?}")));
                }
            }
        };
        Ok(Some(reply))
    }
}

impl Decoder for MemcacheServerCodec {
    type Item = ServerFrame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(line_len) = find_line(src)? else {
            return Ok(None);
        };
        let line = String::from_utf8_lossy(&src[..line_len]).to_string();
        let mut parts = line.split_ascii_whitespace();
        let cmd = parts.next().unwrap_or_default().to_ascii_lowercase();

        match cmd.as_str() {
            "set" => {
                let fields: Vec<&str> = parts.collect();
                if fields.len() < 4 {
                    src.advance(line_len + 2);
                    return Ok(Some(ServerFrame::Malformed("bad command line format".into())));
                }
                let (Ok(flags), Ok(exptime), Ok(len)) = (
                    fields[1].parse::<u32>(),
                    fields[2].parse::<u32>(),
                    fields[3].parse::<usize>(),
                ) else {
                    src.advance(line_len + 2);
                    return Ok(Some(ServerFrame::Malformed("bad command line format".into())));
                };
                let Some(frame_len) = data_frame_len(line_len, len) else {
                    src.advance(line_len + 2);
                    return Ok(Some(ServerFrame::Malformed("object too large for cache".into())));
                };
                if src.len() < frame_len {
                    src.reserve(frame_len - src.len());
                    return Ok(None);
                }
                let key = fields[0].to_string();
                src.advance(line_len + 2);
                let value = src.split_to(len).freeze();
                let terminated = &src[..2] == b"\r\n";
                src.advance(2);
                if !terminated {
                    return Ok(Some(ServerFrame::Malformed("bad data chunk".into())));
                }
                Ok(Some(ServerFrame::Request(MemcacheRequest::Set {
                    key,
                    flags,
                    exptime,
                    value,
                })))
            }
            "get" => {
                let keys: Vec<String> = parts.map(str::to_string).collect();
                src.advance(line_len + 2);
                if keys.is_empty() {
                    return Ok(Some(ServerFrame::Malformed("get requires a key".into())));
                }
                Ok(Some(ServerFrame::Request(MemcacheRequest::Get { keys })))
            }
            other => {
                src.advance(line_len + 2);
                Ok(Some(ServerFrame::Malformed(format!("unknown command {other:?}"))))
            }
        }
    }
}

impl Encoder<MemcacheReply> for MemcacheServerCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: MemcacheReply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            MemcacheReply::Stored => dst.put_slice(b"STORED\r\n"),
            MemcacheReply::NotStored => dst.put_slice(b"NOT_STORED\r\n"),
            MemcacheReply::End => dst.put_slice(b"END\r\n"),
            MemcacheReply::Error => dst.put_slice(b"ERROR\r\n"),
            MemcacheReply::ClientError(msg) => {
                dst.put_slice(format!("CLIENT_ERROR {msg}\r\n").as_bytes())
            }
            MemcacheReply::ServerError(msg) => {
                dst.put_slice(format!("SERVER_ERROR {msg}\r\n").as_bytes())
            }
            MemcacheReply::Value { key, flags, data } => {
                dst.put_slice(format!("VALUE {key} {flags} {}\r\n", data.len()).as_bytes());
                dst.put_slice(&data);
                dst.put_slice(b"\r\n");
            }
        }
        Ok(())
    }
}

/// Length of the first `\r\n`-terminated line, excluding the terminator.
fn find_line(src: &BytesMut) -> Result<Option<usize>, std::io::Error> {
    match src.windows(2).position(|w| w == b"\r\n") {
        Some(pos) => Ok(Some(pos)),
        None if src.len() > MAX_LINE_LEN => Err(invalid_data("line too long")),
        None => Ok(None),
    }
}

/// Bytes spanned by a command line plus its data block, both `\r\n`-terminated.
fn data_frame_len(line_len: usize, len: usize) -> Option<usize> {
    if len > MAX_VALUE_LEN {
        return None;
    }
    line_len.checked_add(len)?.checked_add(4)
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T, std::io::Error> {
    field
        .and_then(|f| f.parse::<T>().ok())
        .ok_or_else(|| invalid_data(format!("invalid {what}")))
}

fn invalid_data(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}
