//! Action types for state machine I/O requests.

use crate::error::{Error, ServerError};
use crate::protocol::backend::BackendMessage;

/// Action requested by a state machine.
///
/// The caller should perform the requested I/O and then call `step()` again.
/// Anything the machine wants written has already been appended to
/// `buffer_set.write_buffer`.
#[derive(Debug)]
pub enum Action {
    /// Write `buffer_set.write_buffer` to the server, then read a single byte
    /// into `buffer_set.type_byte`.
    ///
    /// Used for SSL negotiation: write SSL request, then read response ('S' or 'N').
    WriteAndReadByte,

    /// Perform TLS handshake.
    ///
    /// After successful handshake, call `step()` again.
    TlsHandshake,

    /// Write `buffer_set.write_buffer` to the server, then call `step()`
    /// again without reading.
    Write,

    /// Read a PostgreSQL message from the server.
    ///
    /// The caller should:
    /// 1. Read the message type byte (1 byte)
    /// 2. Read the length (4 bytes, big-endian i32)
    /// 3. Read (length - 4) bytes of payload into the buffer set
    /// 4. Call the state machine's `step()` method again
    ReadMessage,

    /// Write `buffer_set.write_buffer` to the server, then read a message.
    WriteAndReadMessage,

    /// An asynchronous message was received.
    ///
    /// The caller should handle the message, read the next message,
    /// then call `step()` again.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// A recoverable error occurred. The caller keeps the first such error
    /// of a cycle, continues as `then` says, and raises the error once the
    /// machine finishes.
    StashError { error: Error, then: Resume },

    /// The server entered COPY IN mode.
    ///
    /// The caller streams CopyData messages and appends CopyDone or CopyFail
    /// to `buffer_set.write_buffer`, then calls `step()` again without reading.
    CopyIn,

    /// `buffer_set.read_buffer` holds a CopyData payload for the caller's sink.
    /// Forward it, read the next message, then call `step()` again.
    ForwardCopyDataAndReadMessage,

    /// The state machine has finished successfully.
    Finished,
}

/// How to continue after [`Action::StashError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    ReadMessage,
    WriteAndReadMessage,
}

/// A LISTEN/NOTIFY notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// PID of the notifying backend process
    pub pid: u32,
    pub channel: String,
    pub payload: String,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time during query execution.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification(Notification),

    /// Non-fatal notice/warning from server.
    Notice(ServerError),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Convert an asynchronous backend message, `None` for everything else.
    pub fn from_backend(msg: &BackendMessage<'_>) -> Option<Self> {
        match msg {
            BackendMessage::NoticeResponse(notice) => Some(AsyncMessage::Notice(notice.clone())),
            BackendMessage::NotificationResponse(n) => {
                Some(AsyncMessage::Notification(Notification {
                    pid: n.pid,
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                }))
            }
            BackendMessage::ParameterStatus(p) => Some(AsyncMessage::ParameterChanged {
                name: p.name.to_string(),
                value: p.value.to_string(),
            }),
            _ => None,
        }
    }
}

/// Error for a message that is not valid in the current machine state.
pub(crate) fn unexpected(msg: &BackendMessage<'_>, context: &str) -> Error {
    Error::Protocol(format!("unexpected {} {}", msg.name(), context))
}

