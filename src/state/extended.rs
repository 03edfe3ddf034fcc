//! Extended query protocol state machine.

use std::collections::VecDeque;

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    BackendMessage, FieldDescription, FieldDescriptionTail, RowDescription,
};
use crate::protocol::frontend::{
    write_bind, write_close_portal, write_close_statement, write_describe_portal,
    write_describe_statement, write_execute, write_flush, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus};

use super::StateMachine;
use super::action::{Action, AsyncMessage, Resume, unexpected};

/// Prepared statement information.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Statement name
    pub name: String,
    /// Parameter type OIDs
    pub param_oids: Vec<Oid>,
    /// Column descriptions (if the statement returns rows)
    pub columns: Option<Vec<ColumnInfo>>,
}

/// A bound portal.
#[derive(Debug, Clone)]
pub struct Portal {
    pub name: String,
    /// Statement the portal was bound from
    pub statement: String,
    pub result_formats: Vec<FormatCode>,
}

/// Column information from RowDescription.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub tail: FieldDescriptionTail,
}

impl ColumnInfo {
    pub fn from_field(field: &FieldDescription<'_>) -> Self {
        Self {
            name: field.name.to_string(),
            tail: *field.tail,
        }
    }

    /// Table OID (0 if not a table column)
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid()
    }

    /// Column attribute number (0 if not a table column)
    pub fn column_id(&self) -> i16 {
        self.tail.column_id()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid()
    }

    /// Type size (-1 for variable, -2 for null-terminated)
    pub fn type_size(&self) -> i16 {
        self.tail.type_size()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier()
    }

    pub fn format(&self) -> FormatCode {
        self.tail.format()
    }
}

/// A response the server owes us, in the order the requests were written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    ParseComplete,
    /// ParameterDescription of a statement Describe
    ParameterDescription,
    /// RowDescription or NoData of a statement Describe
    StatementDescription,
    BindComplete,
    /// RowDescription or NoData of a portal Describe
    PortalDescription,
    /// Rows, COPY traffic and the completion of an Execute
    ExecuteResult,
    CloseComplete,
    ReadyForQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Initial,
    Reading,
    /// The driver is streaming CopyData and will queue CopyDone or CopyFail
    CopyIn,
    CopyOut,
    /// Nothing was expected; the write has been flushed
    Written,
    Finished,
}

/// Extended query protocol state machine.
///
/// Requests are queued with the builder methods, which append the frontend
/// messages to a write buffer and record the response each one produces.
/// The machine then matches every backend message against the oldest
/// outstanding expectation.
///
/// After a non-fatal ErrorResponse the server skips everything up to the
/// next Sync. The machine drops the matching expectations, stashes the
/// error and keeps reading until ReadyForQuery. If no Sync was queued it
/// writes one itself so the cycle still ends on ReadyForQuery.
pub struct ExtendedQueryStateMachine<'a, H> {
    phase: Phase,
    expect: VecDeque<Expect>,
    handler: &'a mut H,
    handler_failed: bool,
    has_columns: bool,
    suspended: bool,
    param_oids: Option<Vec<Oid>>,
    statement_columns: Option<Vec<ColumnInfo>>,
    transaction_status: Option<TransactionStatus>,
}

impl<'a, H: ResultHandler> ExtendedQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H) -> Self {
        Self {
            phase: Phase::Initial,
            expect: VecDeque::new(),
            handler,
            handler_failed: false,
            has_columns: false,
            suspended: false,
            param_oids: None,
            statement_columns: None,
            transaction_status: None,
        }
    }

    pub fn parse(&mut self, buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
        write_parse(buf, name, query, param_oids);
        self.expect.push_back(Expect::ParseComplete);
    }

    /// Describe a prepared statement. Fills [`Self::take_param_oids`] and
    /// [`Self::take_statement_columns`].
    pub fn describe_statement(&mut self, buf: &mut Vec<u8>, name: &str) {
        write_describe_statement(buf, name);
        self.expect.push_back(Expect::ParameterDescription);
        self.expect.push_back(Expect::StatementDescription);
    }

    pub fn bind<P: AsRef<[u8]>>(
        &mut self,
        buf: &mut Vec<u8>,
        portal: &str,
        statement: &str,
        param_formats: &[FormatCode],
        params: &[Option<P>],
        result_formats: &[FormatCode],
    ) {
        write_bind(buf, portal, statement, param_formats, params, result_formats);
        self.expect.push_back(Expect::BindComplete);
    }

    /// Describe a portal. Its RowDescription starts a result set on the handler.
    pub fn describe_portal(&mut self, buf: &mut Vec<u8>, name: &str) {
        write_describe_portal(buf, name);
        self.expect.push_back(Expect::PortalDescription);
    }

    /// Execute a portal. `max_rows == 0` fetches every row.
    pub fn execute(&mut self, buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
        write_execute(buf, portal, max_rows);
        self.expect.push_back(Expect::ExecuteResult);
    }

    pub fn close_statement(&mut self, buf: &mut Vec<u8>, name: &str) {
        write_close_statement(buf, name);
        self.expect.push_back(Expect::CloseComplete);
    }

    pub fn close_portal(&mut self, buf: &mut Vec<u8>, name: &str) {
        write_close_portal(buf, name);
        self.expect.push_back(Expect::CloseComplete);
    }

    pub fn sync(&mut self, buf: &mut Vec<u8>) {
        write_sync(buf);
        self.expect.push_back(Expect::ReadyForQuery);
    }

    /// Ask the server to deliver pending output without ending the cycle.
    pub fn flush(&mut self, buf: &mut Vec<u8>) {
        write_flush(buf);
    }

    /// True if the last Execute stopped at its row limit.
    pub fn suspended(&self) -> bool {
        self.suspended
    }

    /// Parameter types from a statement Describe.
    pub fn take_param_oids(&mut self) -> Option<Vec<Oid>> {
        self.param_oids.take()
    }

    /// Result columns from a statement Describe, `None` if it returns no rows.
    pub fn take_statement_columns(&mut self) -> Option<Vec<ColumnInfo>> {
        self.statement_columns.take()
    }

    fn stash_handler_error(&mut self, result: Result<()>) -> Action {
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

    fn next_or_finish(&mut self) -> Action {
        if self.expect.is_empty() {
            self.phase = Phase::Finished;
            Action::Finished
        } else {
            Action::ReadMessage
        }
    }

    fn handle(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let msg = BackendMessage::parse(buffer_set.type_byte, &buffer_set.read_buffer)?;
        if let Some(async_msg) = AsyncMessage::from_backend(&msg) {
            return Ok(Action::HandleAsyncMessageAndReadMessage(async_msg));
        }

        if let BackendMessage::ErrorResponse(err) = msg {
            return self.handle_error(err, &mut buffer_set.write_buffer);
        }

        if self.phase == Phase::CopyOut {
            return match msg {
                BackendMessage::CopyData(_) => Ok(Action::ForwardCopyDataAndReadMessage),
                BackendMessage::CopyDone => {
                    self.phase = Phase::Reading;
                    Ok(Action::ReadMessage)
                }
                other => Err(unexpected(&other, "during COPY OUT")),
            };
        }

        let Some(&expected) = self.expect.front() else {
            return Err(unexpected(&msg, "after the extended query completed"));
        };

        match (expected, msg) {
            (Expect::ParseComplete, BackendMessage::ParseComplete)
            | (Expect::BindComplete, BackendMessage::BindComplete)
            | (Expect::CloseComplete, BackendMessage::CloseComplete) => {
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (Expect::ParameterDescription, BackendMessage::ParameterDescription(desc)) => {
                self.param_oids = Some(desc.into_oids());
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (Expect::StatementDescription, BackendMessage::RowDescription(cols)) => {
                self.statement_columns = Some(cols.iter().map(ColumnInfo::from_field).collect());
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (Expect::StatementDescription | Expect::PortalDescription, BackendMessage::NoData) => {
                self.statement_columns = None;
                self.has_columns = false;
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (Expect::PortalDescription, BackendMessage::RowDescription(cols)) => {
                self.expect.pop_front();
                self.has_columns = true;
                let result = if self.handler_failed {
                    Ok(())
                } else {
                    self.handler.result_start(cols)
                };
                buffer_set.column_buffer.clear();
                buffer_set
                    .column_buffer
                    .extend_from_slice(&buffer_set.read_buffer);
                Ok(self.stash_handler_error(result))
            }
            (Expect::ExecuteResult, BackendMessage::DataRow(row)) => {
                if !self.has_columns {
                    return Err(Error::Protocol(
                        "DataRow received for a portal without a RowDescription".into(),
                    ));
                }
                if self.handler_failed {
                    return Ok(Action::ReadMessage);
                }
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                let result = self.handler.row(cols, row);
                Ok(self.stash_handler_error(result))
            }
            (Expect::ExecuteResult, BackendMessage::CommandComplete(complete)) => {
                self.expect.pop_front();
                self.has_columns = false;
                self.suspended = false;
                if self.handler_failed {
                    return Ok(self.next_or_finish());
                }
                match self.handler.result_end(complete) {
                    Ok(()) => Ok(self.next_or_finish()),
                    Err(error) => {
                        self.handler_failed = true;
                        Ok(Action::StashError {
                            error,
                            then: Resume::ReadMessage,
                        })
                    }
                }
            }
            (Expect::ExecuteResult, BackendMessage::EmptyQueryResponse) => {
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (Expect::ExecuteResult, BackendMessage::PortalSuspended) => {
                self.expect.pop_front();
                self.suspended = true;
                Ok(self.next_or_finish())
            }
            (Expect::ExecuteResult, BackendMessage::CopyInResponse(_)) => {
                self.phase = Phase::CopyIn;
                Ok(Action::CopyIn)
            }
            (Expect::ExecuteResult, BackendMessage::CopyOutResponse(_)) => {
                self.phase = Phase::CopyOut;
                Ok(Action::ReadMessage)
            }
            (Expect::ReadyForQuery, BackendMessage::ReadyForQuery(status)) => {
                self.transaction_status = Some(status);
                self.expect.pop_front();
                Ok(self.next_or_finish())
            }
            (_, other) => Err(unexpected(
                &other,
                &format!("while waiting for {expected:?}"),
            )),
        }
    }

    fn handle_error(
        &mut self,
        err: ServerError,
        write_buffer: &mut Vec<u8>,
    ) -> Result<Action> {
        if err.is_fatal() {
            return Err(Error::Server(err));
        }
        self.phase = Phase::Reading;
        self.has_columns = false;

        if let Some(pos) = self.expect.iter().position(|e| *e == Expect::ReadyForQuery) {
            self.expect.drain(..pos);
            Ok(Action::StashError {
                error: Error::Server(err),
                then: Resume::ReadMessage,
            })
        } else {
            self.expect.clear();
            write_sync(write_buffer);
            self.expect.push_back(Expect::ReadyForQuery);
            Ok(Action::StashError {
                error: Error::Server(err),
                then: Resume::WriteAndReadMessage,
            })
        }
    }
}

impl<H: ResultHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.phase {
            Phase::Initial => {
                if self.expect.is_empty() {
                    self.phase = Phase::Written;
                    Ok(Action::Write)
                } else {
                    self.phase = Phase::Reading;
                    Ok(Action::WriteAndReadMessage)
                }
            }
            Phase::Written => {
                self.phase = Phase::Finished;
                Ok(Action::Finished)
            }
            Phase::CopyIn => {
                // Sync messages sent during COPY IN are ignored by the server
                if self.expect.contains(&Expect::ReadyForQuery) {
                    write_sync(&mut buffer_set.write_buffer);
                }
                self.phase = Phase::Reading;
                Ok(Action::WriteAndReadMessage)
            }
            Phase::Finished => Err(Error::Protocol("extended query already finished".into())),
            Phase::Reading | Phase::CopyOut => self.handle(buffer_set),
        }
    }

    fn transaction_status(&self) -> Option<TransactionStatus> {
        self.transaction_status
    }
}
