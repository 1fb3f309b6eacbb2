//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields};
use crate::{Error, Result};

/// Largest message accepted during startup and ping.
///
/// Nothing exchanged before ReadyForQuery comes close; a larger length field means the
/// peer is not speaking the protocol (or is hostile).
const MAX_MESSAGE_LENGTH: usize = 1024 * 1024;

/// Decode one backend message from the front of `data`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((msg, consumed)))` for a
/// complete frame. The caller advances its buffer by `consumed`.
pub fn decode_message(data: &[u8]) -> Result<Option<(BackendMessage, usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(Error::Protocol(format!(
            "invalid length {} for message tag 0x{:02X}",
            len, tag
        )));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(Error::Protocol(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }

    let frame_len = len + 1;
    if data.len() < frame_len {
        return Ok(None);
    }

    let body = &data[5..frame_len];
    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(body)?,
        tags::BACKEND_KEY_DATA => {
            let mut reader = Reader::new(body);
            BackendMessage::BackendKeyData {
                process_id: reader.i32()?,
                secret_key: reader.i32()?,
            }
        }
        tags::PARAMETER_STATUS => {
            let mut reader = Reader::new(body);
            BackendMessage::ParameterStatus {
                name: reader.cstr()?,
                value: reader.cstr()?,
            }
        }
        tags::READY_FOR_QUERY => BackendMessage::ReadyForQuery {
            status: Reader::new(body).u8()?,
        },
        tags::COMMAND_COMPLETE => BackendMessage::CommandComplete(Reader::new(body).cstr()?),
        tags::EMPTY_QUERY_RESPONSE => BackendMessage::EmptyQueryResponse,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
        other => BackendMessage::Other { tag: other },
    };

    Ok(Some((msg, frame_len)))
}

fn decode_authentication(body: &[u8]) -> Result<BackendMessage> {
    let mut reader = Reader::new(body);
    let auth_type = reader.i32()?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let salt = reader.take(4)?;
            AuthenticationMessage::Md5Password {
                salt: [salt[0], salt[1], salt[2], salt[3]],
            }
        }
        auth::SASL => {
            let mut mechanisms = Vec::new();
            loop {
                let mechanism = reader.cstr()?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: reader.rest().to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: reader.rest().to_vec(),
        },
        other => {
            return Err(Error::Authentication(format!(
                "unsupported authentication request type {}",
                other
            )))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_error_fields(body: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut reader = Reader::new(body);

    loop {
        let field_type = reader.u8()?;
        if field_type == 0 {
            break;
        }
        let value = reader.cstr()?;
        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {}
        }
    }

    Ok(fields)
}

/// Cursor over a message body
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(Error::Protocol("message body truncated".into()));
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn cstr(&mut self) -> Result<String> {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::Protocol("missing null terminator in string".into()))?;
        let s = String::from_utf8_lossy(&self.data[..end]).into_owned();
        self.data = &self.data[end + 1..];
        Ok(s)
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }
}
