//! RESP 인코딩/디코딩
//!
//! 컨트롤 연결이 쓰는 최소한의 RESP2 구현입니다. 명령은 항상 bulk string
//! 배열로 인코딩하고, 응답은 누적 버퍼에서 프레임 단위로 잘라냅니다.
//!
//! ```text
//! *3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$9\r\nmaxmemory\r\n
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use gordo_core::error::ControlError;

/// 응답 하나의 최대 크기 (바이트)
pub const MAX_REPLY_SIZE: usize = 1024 * 1024;

/// 중첩 배열 최대 깊이
const MAX_DEPTH: usize = 8;

/// 서버 응답
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+OK`
    Simple(String),
    /// `-ERR ...`
    Error(String),
    /// `:1`
    Integer(i64),
    /// `$n` (`$-1`이면 `None`)
    Bulk(Option<Bytes>),
    /// `*n` (`*-1`이면 `None`)
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// bulk 또는 simple string을 UTF-8 문자열로 변환합니다.
    pub fn into_string(self) -> Option<String> {
        match self {
            Self::Simple(s) => Some(s),
            Self::Bulk(Some(b)) => Some(String::from_utf8_lossy(&b).into_owned()),
            _ => None,
        }
    }
}

/// 명령을 bulk string 배열로 인코딩합니다.
pub fn encode_command(args: &[&str], dst: &mut BytesMut) {
    dst.put_u8(b'*');
    dst.put_slice(args.len().to_string().as_bytes());
    dst.put_slice(b"\r\n");
    for arg in args {
        dst.put_u8(b'$');
        dst.put_slice(arg.len().to_string().as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(arg.as_bytes());
        dst.put_slice(b"\r\n");
    }
}

/// 버퍼 앞쪽에서 완성된 응답 하나를 꺼냅니다.
///
/// 아직 프레임이 완성되지 않았으면 `Ok(None)`을 반환하고 버퍼는 그대로 둡니다.
pub fn decode_reply(buf: &mut BytesMut) -> Result<Option<Reply>, ControlError> {
    if buf.len() > MAX_REPLY_SIZE {
        return Err(ControlError::Protocol(format!(
            "reply exceeds {MAX_REPLY_SIZE} bytes"
        )));
    }
    let mut cursor = 0;
    match parse(buf, &mut cursor, 0)? {
        Some(reply) => {
            buf.advance(cursor);
            Ok(Some(reply))
        }
        None => Ok(None),
    }
}

fn parse(buf: &[u8], cursor: &mut usize, depth: usize) -> Result<Option<Reply>, ControlError> {
    if depth > MAX_DEPTH {
        return Err(ControlError::Protocol("reply nested too deeply".to_owned()));
    }
    let Some(line) = read_line(buf, cursor)? else {
        return Ok(None);
    };
    let (&tag, rest) = line
        .split_first()
        .ok_or_else(|| ControlError::Protocol("empty reply line".to_owned()))?;

    let reply = match tag {
        b'+' => Reply::Simple(String::from_utf8_lossy(rest).into_owned()),
        b'-' => Reply::Error(String::from_utf8_lossy(rest).into_owned()),
        b':' => Reply::Integer(parse_int(rest)?),
        b'$' => {
            let len = parse_int(rest)?;
            if len < 0 {
                Reply::Bulk(None)
            } else {
                let len = len as usize;
                if buf.len() < *cursor + len + 2 {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&buf[*cursor..*cursor + len]);
                if &buf[*cursor + len..*cursor + len + 2] != b"\r\n" {
                    return Err(ControlError::Protocol(
                        "bulk string not terminated by CRLF".to_owned(),
                    ));
                }
                *cursor += len + 2;
                Reply::Bulk(Some(data))
            }
        }
        b'*' => {
            let len = parse_int(rest)?;
            if len < 0 {
                Reply::Array(None)
            } else {
                let mut items = Vec::with_capacity((len as usize).min(64));
                for _ in 0..len {
                    match parse(buf, cursor, depth + 1)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                Reply::Array(Some(items))
            }
        }
        other => {
            return Err(ControlError::Protocol(format!(
                "unexpected reply type byte 0x{other:02x}"
            )));
        }
    };
    Ok(Some(reply))
}

fn read_line<'a>(buf: &'a [u8], cursor: &mut usize) -> Result<Option<&'a [u8]>, ControlError> {
    let start = *cursor;
    let Some(pos) = buf[start..].windows(2).position(|w| w == b"\r\n") else {
        return Ok(None);
    };
    *cursor = start + pos + 2;
    Ok(Some(&buf[start..start + pos]))
}

fn parse_int(raw: &[u8]) -> Result<i64, ControlError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            ControlError::Protocol(format!(
                "invalid integer '{}'",
                String::from_utf8_lossy(raw)
            ))
        })
}
