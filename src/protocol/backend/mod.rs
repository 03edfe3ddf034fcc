//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod copy;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{
    AuthenticationMessage, BackendKeyData, NegotiateProtocolVersion, NotificationResponse,
    ParameterStatus,
};
pub use copy::CopyResponse;
pub use extended::ParameterDescription;
pub use query::{
    CommandComplete, DataRow, DataRowIter, FieldDescription, FieldDescriptionTail, RowDescription,
};

use crate::error::{Error, Result, ServerError};
use crate::protocol::types::TransactionStatus;

/// Backend message type bytes.
pub mod msg_type {
    pub const AUTHENTICATION: u8 = b'R';
    pub const BACKEND_KEY_DATA: u8 = b'K';
    pub const PARAMETER_STATUS: u8 = b'S';
    pub const READY_FOR_QUERY: u8 = b'Z';
    pub const ROW_DESCRIPTION: u8 = b'T';
    pub const DATA_ROW: u8 = b'D';
    pub const COMMAND_COMPLETE: u8 = b'C';
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    pub const ERROR_RESPONSE: u8 = b'E';
    pub const NOTICE_RESPONSE: u8 = b'N';
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    pub const PARSE_COMPLETE: u8 = b'1';
    pub const BIND_COMPLETE: u8 = b'2';
    pub const CLOSE_COMPLETE: u8 = b'3';
    pub const PARAMETER_DESCRIPTION: u8 = b't';
    pub const NO_DATA: u8 = b'n';
    pub const PORTAL_SUSPENDED: u8 = b's';
    pub const COPY_IN_RESPONSE: u8 = b'G';
    pub const COPY_OUT_RESPONSE: u8 = b'H';
    pub const COPY_BOTH_RESPONSE: u8 = b'W';
    pub const COPY_DATA: u8 = b'd';
    pub const COPY_DONE: u8 = b'c';
    pub const NEGOTIATE_PROTOCOL_VERSION: u8 = b'v';
}

/// A decoded backend message.
///
/// Payloads borrow from the read buffer where possible. Dispatch is a closed
/// match over the tag byte; an unknown tag is a protocol error.
#[derive(Debug, Clone)]
pub enum BackendMessage<'a> {
    Authentication(AuthenticationMessage<'a>),
    BackendKeyData(BackendKeyData),
    ParameterStatus(ParameterStatus<'a>),
    ReadyForQuery(TransactionStatus),
    RowDescription(RowDescription<'a>),
    DataRow(DataRow<'a>),
    CommandComplete(CommandComplete<'a>),
    EmptyQueryResponse,
    ErrorResponse(ServerError),
    NoticeResponse(ServerError),
    NotificationResponse(NotificationResponse<'a>),
    ParseComplete,
    BindComplete,
    CloseComplete,
    NoData,
    PortalSuspended,
    ParameterDescription(ParameterDescription),
    CopyInResponse(CopyResponse),
    CopyOutResponse(CopyResponse),
    CopyBothResponse(CopyResponse),
    CopyData(&'a [u8]),
    CopyDone,
    NegotiateProtocolVersion(NegotiateProtocolVersion<'a>),
}

impl<'a> BackendMessage<'a> {
    /// Decode the payload of a message whose tag byte is `type_byte`.
    pub fn parse(type_byte: u8, payload: &'a [u8]) -> Result<Self> {
        let msg = match type_byte {
            msg_type::AUTHENTICATION => Self::Authentication(AuthenticationMessage::parse(payload)?),
            msg_type::BACKEND_KEY_DATA => Self::BackendKeyData(BackendKeyData::parse(payload)?),
            msg_type::PARAMETER_STATUS => Self::ParameterStatus(ParameterStatus::parse(payload)?),
            msg_type::READY_FOR_QUERY => Self::ReadyForQuery(auth::parse_ready_for_query(payload)?),
            msg_type::ROW_DESCRIPTION => Self::RowDescription(RowDescription::parse(payload)?),
            msg_type::DATA_ROW => Self::DataRow(DataRow::parse(payload)?),
            msg_type::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete::parse(payload)?),
            msg_type::EMPTY_QUERY_RESPONSE => empty(Self::EmptyQueryResponse, payload)?,
            msg_type::ERROR_RESPONSE => Self::ErrorResponse(error::parse_fields(payload)?),
            msg_type::NOTICE_RESPONSE => Self::NoticeResponse(error::parse_fields(payload)?),
            msg_type::NOTIFICATION_RESPONSE => {
                Self::NotificationResponse(NotificationResponse::parse(payload)?)
            }
            msg_type::PARSE_COMPLETE => empty(Self::ParseComplete, payload)?,
            msg_type::BIND_COMPLETE => empty(Self::BindComplete, payload)?,
            msg_type::CLOSE_COMPLETE => empty(Self::CloseComplete, payload)?,
            msg_type::NO_DATA => empty(Self::NoData, payload)?,
            msg_type::PORTAL_SUSPENDED => empty(Self::PortalSuspended, payload)?,
            msg_type::PARAMETER_DESCRIPTION => {
                Self::ParameterDescription(ParameterDescription::parse(payload)?)
            }
            msg_type::COPY_IN_RESPONSE => Self::CopyInResponse(CopyResponse::parse(payload)?),
            msg_type::COPY_OUT_RESPONSE => Self::CopyOutResponse(CopyResponse::parse(payload)?),
            msg_type::COPY_BOTH_RESPONSE => Self::CopyBothResponse(CopyResponse::parse(payload)?),
            msg_type::COPY_DATA => Self::CopyData(payload),
            msg_type::COPY_DONE => empty(Self::CopyDone, payload)?,
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                Self::NegotiateProtocolVersion(NegotiateProtocolVersion::parse(payload)?)
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unknown backend message type {:?}",
                    other as char
                )));
            }
        };
        Ok(msg)
    }

    /// Short name used in protocol error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "Authentication",
            Self::BackendKeyData(_) => "BackendKeyData",
            Self::ParameterStatus(_) => "ParameterStatus",
            Self::ReadyForQuery(_) => "ReadyForQuery",
            Self::RowDescription(_) => "RowDescription",
            Self::DataRow(_) => "DataRow",
            Self::CommandComplete(_) => "CommandComplete",
            Self::EmptyQueryResponse => "EmptyQueryResponse",
            Self::ErrorResponse(_) => "ErrorResponse",
            Self::NoticeResponse(_) => "NoticeResponse",
            Self::NotificationResponse(_) => "NotificationResponse",
            Self::ParseComplete => "ParseComplete",
            Self::BindComplete => "BindComplete",
            Self::CloseComplete => "CloseComplete",
            Self::NoData => "NoData",
            Self::PortalSuspended => "PortalSuspended",
            Self::ParameterDescription(_) => "ParameterDescription",
            Self::CopyInResponse(_) => "CopyInResponse",
            Self::CopyOutResponse(_) => "CopyOutResponse",
            Self::CopyBothResponse(_) => "CopyBothResponse",
            Self::CopyData(_) => "CopyData",
            Self::CopyDone => "CopyDone",
            Self::NegotiateProtocolVersion(_) => "NegotiateProtocolVersion",
        }
    }

    /// Messages the server may send at any time, outside any request cycle.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::NoticeResponse(_) | Self::NotificationResponse(_) | Self::ParameterStatus(_)
        )
    }
}

fn empty<'a>(msg: BackendMessage<'a>, payload: &[u8]) -> Result<BackendMessage<'a>> {
    if payload.is_empty() {
        Ok(msg)
    } else {
        Err(Error::Protocol(format!(
            "{}: unexpected {} byte payload",
            msg.name(),
            payload.len()
        )))
    }
}
