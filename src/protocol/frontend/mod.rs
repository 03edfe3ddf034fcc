//! PostgreSQL frontend (client → server) messages.
//!
//! The `write_*` functions append one framed message to a buffer. The
//! [`FrontendMessage`] enum covers the same set as a value that can be
//! written and parsed back, which the test backend uses to inspect what the
//! client sent.

pub mod auth;
pub mod copy;
pub mod extended;
pub mod simple;
pub mod startup;

pub use auth::{
    ScramClient, md5_password, write_password, write_sasl_initial_response, write_sasl_response,
};
pub use copy::{write_copy_data, write_copy_done, write_copy_fail};
pub use extended::{
    Target, write_bind, write_close, write_close_portal, write_close_statement, write_describe,
    write_describe_portal, write_describe_statement, write_execute, write_flush, write_parse,
    write_sync,
};
pub use simple::write_query;
pub use startup::{write_cancel_request, write_ssl_request, write_startup, write_terminate};

use crate::error::{Error, Result};
use crate::protocol::codec::{
    MessageBuilder, read_bytes, read_cstr, read_i16, read_i32, read_u8, read_u32,
};
use crate::protocol::types::{FormatCode, Oid};

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    pub const QUERY: u8 = b'Q';
    pub const PARSE: u8 = b'P';
    pub const BIND: u8 = b'B';
    pub const EXECUTE: u8 = b'E';
    pub const DESCRIBE: u8 = b'D';
    pub const CLOSE: u8 = b'C';
    pub const SYNC: u8 = b'S';
    pub const FLUSH: u8 = b'H';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const COPY_FAIL: u8 = b'f';
    pub const TERMINATE: u8 = b'X';
}

/// A client → server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage<'a> {
    Startup {
        version: i32,
        params: Vec<(&'a str, &'a str)>,
    },
    SslRequest,
    CancelRequest {
        pid: u32,
        secret_key: u32,
    },
    Query(&'a str),
    Parse {
        name: &'a str,
        query: &'a str,
        param_oids: Vec<Oid>,
    },
    Bind {
        portal: &'a str,
        statement: &'a str,
        param_formats: Vec<FormatCode>,
        params: Vec<Option<&'a [u8]>>,
        result_formats: Vec<FormatCode>,
    },
    Describe {
        target: Target,
        name: &'a str,
    },
    Execute {
        portal: &'a str,
        max_rows: u32,
    },
    Close {
        target: Target,
        name: &'a str,
    },
    Flush,
    Sync,
    Terminate,
    Password(&'a str),
    SaslInitialResponse {
        mechanism: &'a str,
        data: &'a [u8],
    },
    SaslResponse(&'a [u8]),
    CopyData(&'a [u8]),
    CopyDone,
    CopyFail(&'a str),
}

impl<'a> FrontendMessage<'a> {
    /// Append the framed message to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        match self {
            Self::Startup { version, params } => {
                let mut msg = MessageBuilder::new_untagged(buf);
                msg.write_i32(*version);
                for (name, value) in params {
                    msg.write_cstr(name);
                    msg.write_cstr(value);
                }
                msg.write_u8(0);
                msg.finish();
            }
            Self::SslRequest => write_ssl_request(buf),
            Self::CancelRequest { pid, secret_key } => {
                write_cancel_request(buf, *pid, *secret_key)
            }
            Self::Query(sql) => write_query(buf, sql),
            Self::Parse {
                name,
                query,
                param_oids,
            } => write_parse(buf, name, query, param_oids),
            Self::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => write_bind(buf, portal, statement, param_formats, params, result_formats),
            Self::Describe { target, name } => write_describe(buf, *target, name),
            Self::Execute { portal, max_rows } => write_execute(buf, portal, *max_rows),
            Self::Close { target, name } => write_close(buf, *target, name),
            Self::Flush => write_flush(buf),
            Self::Sync => write_sync(buf),
            Self::Terminate => write_terminate(buf),
            Self::Password(password) => write_password(buf, password),
            Self::SaslInitialResponse { mechanism, data } => {
                write_sasl_initial_response(buf, mechanism, data)
            }
            Self::SaslResponse(data) => write_sasl_response(buf, data),
            Self::CopyData(data) => write_copy_data(buf, data),
            Self::CopyDone => write_copy_done(buf),
            Self::CopyFail(message) => write_copy_fail(buf, message),
        }
    }

    /// Decode a tagged message.
    ///
    /// The `p` tag is shared by every authentication response and its layout
    /// depends on the exchange, so it decodes as [`FrontendMessage::SaslResponse`];
    /// use [`parse_password`](Self::parse_password) or
    /// [`parse_sasl_initial_response`](Self::parse_sasl_initial_response) when
    /// the context is known.
    pub fn parse(tag: u8, payload: &'a [u8]) -> Result<Self> {
        let msg = match tag {
            msg_type::QUERY => Self::Query(read_cstr(payload)?.0),
            msg_type::PARSE => {
                let (name, rest) = read_cstr(payload)?;
                let (query, rest) = read_cstr(rest)?;
                let (count, mut rest) = read_count(rest)?;
                let mut param_oids = Vec::with_capacity(count);
                for _ in 0..count {
                    let (oid, remaining) = read_u32(rest)?;
                    param_oids.push(oid);
                    rest = remaining;
                }
                Self::Parse {
                    name,
                    query,
                    param_oids,
                }
            }
            msg_type::BIND => parse_bind(payload)?,
            msg_type::DESCRIBE => {
                let (target, name) = parse_target(payload)?;
                Self::Describe { target, name }
            }
            msg_type::EXECUTE => {
                let (portal, rest) = read_cstr(payload)?;
                let (max_rows, _) = read_u32(rest)?;
                Self::Execute { portal, max_rows }
            }
            msg_type::CLOSE => {
                let (target, name) = parse_target(payload)?;
                Self::Close { target, name }
            }
            msg_type::FLUSH => Self::Flush,
            msg_type::SYNC => Self::Sync,
            msg_type::TERMINATE => Self::Terminate,
            msg_type::PASSWORD => Self::SaslResponse(payload),
            msg_type::COPY_DATA => Self::CopyData(payload),
            msg_type::COPY_DONE => Self::CopyDone,
            msg_type::COPY_FAIL => Self::CopyFail(read_cstr(payload)?.0),
            other => {
                return Err(Error::Protocol(format!(
                    "unknown frontend message type {:?}",
                    other as char
                )));
            }
        };
        Ok(msg)
    }

    /// Decode an untagged message (StartupMessage, SSLRequest, CancelRequest)
    /// from the bytes following its length field.
    pub fn parse_startup(payload: &'a [u8]) -> Result<Self> {
        let (code, rest) = read_i32(payload)?;
        match code {
            startup::SSL_REQUEST_CODE => Ok(Self::SslRequest),
            startup::CANCEL_REQUEST_CODE => {
                let (pid, rest) = read_u32(rest)?;
                let (secret_key, _) = read_u32(rest)?;
                Ok(Self::CancelRequest { pid, secret_key })
            }
            version => {
                let mut params = Vec::new();
                let mut data = rest;
                while data.first().is_some_and(|&b| b != 0) {
                    let (name, remaining) = read_cstr(data)?;
                    let (value, remaining) = read_cstr(remaining)?;
                    params.push((name, value));
                    data = remaining;
                }
                Ok(Self::Startup { version, params })
            }
        }
    }

    /// Decode a `p` message as a PasswordMessage.
    pub fn parse_password(payload: &'a [u8]) -> Result<Self> {
        Ok(Self::Password(read_cstr(payload)?.0))
    }

    /// Decode a `p` message as a SASLInitialResponse.
    pub fn parse_sasl_initial_response(payload: &'a [u8]) -> Result<Self> {
        let (mechanism, rest) = read_cstr(payload)?;
        let (len, rest) = read_i32(rest)?;
        let data = match len {
            -1 => &[][..],
            len => read_bytes(rest, usize::try_from(len).map_err(|_e| {
                Error::Protocol(format!("SASLInitialResponse: invalid length {len}"))
            })?)?
            .0,
        };
        Ok(Self::SaslInitialResponse { mechanism, data })
    }
}

fn read_count(data: &[u8]) -> Result<(usize, &[u8])> {
    let (count, rest) = read_i16(data)?;
    let count = usize::try_from(count)
        .map_err(|_e| Error::Protocol(format!("negative count {count}")))?;
    Ok((count, rest))
}

fn read_formats(data: &[u8]) -> Result<(Vec<FormatCode>, &[u8])> {
    let (count, mut rest) = read_count(data)?;
    let mut formats = Vec::with_capacity(count);
    for _ in 0..count {
        let (fmt, remaining) = read_i16(rest)?;
        formats.push(FormatCode::from_wire(fmt)?);
        rest = remaining;
    }
    Ok((formats, rest))
}

fn parse_target(payload: &[u8]) -> Result<(Target, &str)> {
    let (byte, rest) = read_u8(payload)?;
    let target = Target::from_byte(byte)
        .ok_or_else(|| Error::Protocol(format!("invalid describe/close target {:?}", byte as char)))?;
    let (name, _) = read_cstr(rest)?;
    Ok((target, name))
}

fn parse_bind(payload: &[u8]) -> Result<FrontendMessage<'_>> {
    let (portal, rest) = read_cstr(payload)?;
    let (statement, rest) = read_cstr(rest)?;
    let (param_formats, rest) = read_formats(rest)?;

    let (count, mut rest) = read_count(rest)?;
    let mut params = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, remaining) = read_i32(rest)?;
        if len == -1 {
            params.push(None);
            rest = remaining;
            continue;
        }
        let len = usize::try_from(len)
            .map_err(|_e| Error::Protocol(format!("Bind: invalid parameter length {len}")))?;
        let (value, remaining) = read_bytes(remaining, len)?;
        params.push(Some(value));
        rest = remaining;
    }

    let (result_formats, _) = read_formats(rest)?;
    Ok(FrontendMessage::Bind {
        portal,
        statement,
        param_formats,
        params,
        result_formats,
    })
}
