//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{BackendMessage, RowDescription};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::StateMachine;
use super::action::{Action, AsyncMessage, Resume, unexpected};

/// Simple query state machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    CopyIn,
    CopyOut,
    Finished,
}

/// Simple query protocol state machine.
///
/// Sends one Query message and drains the responses up to ReadyForQuery.
/// Server errors are stashed, so the connection is left ready for the next
/// command.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    query: &'a str,
    handler: &'a mut H,
    handler_failed: bool,
    transaction_status: Option<TransactionStatus>,
}

impl<'a, H: ResultHandler> SimpleQueryStateMachine<'a, H> {
    /// Create a new simple query state machine.
    pub fn new(query: &'a str, handler: &'a mut H) -> Self {
        Self {
            state: State::Initial,
            query,
            handler,
            handler_failed: false,
            transaction_status: None,
        }
    }

    /// True while the server is in COPY OUT mode.
    pub fn in_copy_out(&self) -> bool {
        self.state == State::CopyOut
    }

    fn handler_result(&mut self, result: Result<()>) -> Action {
        match result {
            Ok(()) => Action::ReadMessage,
            Err(error) => {
                self.handler_failed = true;
                Action::StashError {
                    error,
                    then: Resume::ReadMessage,
                }
            }
        }
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let msg = BackendMessage::parse(buffer_set.type_byte, &buffer_set.read_buffer)?;
        if let Some(async_msg) = AsyncMessage::from_backend(&msg) {
            return Ok(Action::HandleAsyncMessageAndReadMessage(async_msg));
        }

        match (self.state, msg) {
            (_, BackendMessage::ErrorResponse(err)) => {
                if err.is_fatal() {
                    return Err(Error::Server(err));
                }
                // The server abandons the rest of the query string and sends ReadyForQuery
                self.state = State::WaitingResponse;
                Ok(Action::StashError {
                    error: Error::Server(err),
                    then: Resume::ReadMessage,
                })
            }
            (State::WaitingResponse, BackendMessage::RowDescription(cols)) => {
                self.state = State::ProcessingRows;
                if self.handler_failed {
                    return Ok(Action::ReadMessage);
                }
                let result = self.handler.result_start(cols);
                buffer_set.column_buffer.clear();
                buffer_set
                    .column_buffer
                    .extend_from_slice(&buffer_set.read_buffer);
                Ok(self.handler_result(result))
            }
            (State::ProcessingRows, BackendMessage::DataRow(row)) => {
                if self.handler_failed {
                    return Ok(Action::ReadMessage);
                }
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let result = self.handler.row(cols, row);
                Ok(self.handler_result(result))
            }
            (
                State::WaitingResponse | State::ProcessingRows,
                BackendMessage::CommandComplete(complete),
            ) => {
                // More commands may follow in a multi-statement query
                self.state = State::WaitingResponse;
                if self.handler_failed {
                    return Ok(Action::ReadMessage);
                }
                let result = self.handler.result_end(complete);
                Ok(self.handler_result(result))
            }
            (State::WaitingResponse, BackendMessage::EmptyQueryResponse) => {
                Ok(Action::ReadMessage)
            }
            (State::WaitingResponse, BackendMessage::CopyInResponse(_)) => {
                self.state = State::CopyIn;
                Ok(Action::CopyIn)
            }
            (State::WaitingResponse, BackendMessage::CopyOutResponse(_)) => {
                self.state = State::CopyOut;
                Ok(Action::ReadMessage)
            }
            (State::CopyOut, BackendMessage::CopyData(_)) => {
                Ok(Action::ForwardCopyDataAndReadMessage)
            }
            (State::CopyOut, BackendMessage::CopyDone) => {
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            (
                State::WaitingResponse | State::ProcessingRows,
                BackendMessage::ReadyForQuery(status),
            ) => {
                self.transaction_status = Some(status);
                self.state = State::Finished;
                Ok(Action::Finished)
            }
            (_, other) => Err(unexpected(&other, "in simple query response")),
        }
    }
}

impl<H: ResultHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.state {
            State::Initial => {
                write_query(&mut buffer_set.write_buffer, self.query);
                self.state = State::WaitingResponse;
                Ok(Action::WriteAndReadMessage)
            }
            State::CopyIn => {
                // The driver has queued CopyDone or CopyFail
                self.state = State::WaitingResponse;
                Ok(Action::WriteAndReadMessage)
            }
            State::Finished => Err(Error::Protocol("simple query already finished".into())),
            State::WaitingResponse | State::ProcessingRows | State::CopyOut => {
                self.handle(buffer_set)
            }
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}
