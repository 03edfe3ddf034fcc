//! Synchronous PostgreSQL connection.

use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::{CollectHandler, DropHandler, QueryResult, ResultHandler};
use crate::opts::Opts;
use crate::protocol::backend::{BackendKeyData, DataRow, RowDescription};
use crate::protocol::frontend::{write_copy_data, write_copy_done, write_copy_fail, write_terminate};
use crate::protocol::types::{FormatCode, Oid, TransactionStatus, oid};
use crate::rewrite::{ParamStyle, Params, rewrite};
use crate::state::{
    Action, AsyncMessage, ColumnInfo, ConnectionState, ExtendedQueryStateMachine, Notification,
    Portal, PreparedStatement, Resume, SimpleQueryStateMachine, StartupStateMachine, StateMachine,
};
use crate::types::{TypeRegistry, Value};

use super::stream::Stream;

/// Size of the CopyData messages sent for COPY FROM STDIN.
const COPY_CHUNK: usize = 8192;

/// Largest message accepted from the server: a 1 GiB field plus framing.
const MAX_MESSAGE_LEN: u32 = (1 << 30) + (1 << 20);

/// Prefix of the names generated by [`Conn::prepare`].
const STATEMENT_PREFIX: &str = "_pgwe_";

/// Read a message from the stream into the buffer set.
fn read_message_into(stream: &mut Stream, buffer_set: &mut BufferSet) -> Result<()> {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header)?;
    buffer_set.type_byte = header[0];
    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if !(4..=MAX_MESSAGE_LEN).contains(&length) {
        return Err(Error::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }

    let payload_len = (length - 4) as usize;
    buffer_set.read_buffer.clear();
    buffer_set.read_buffer.resize(payload_len, 0);
    stream.read_exact(&mut buffer_set.read_buffer)?;
    trace!(
        tag = %char::from(buffer_set.type_byte),
        len = payload_len,
        "received message"
    );

    Ok(())
}

/// Caller-side ends of a COPY, if the cycle has any.
#[derive(Default)]
struct CopyIo<'a> {
    source: Option<&'a mut dyn Read>,
    sink: Option<&'a mut dyn Write>,
    sink_failed: bool,
}

/// Records the column layout of a portal.
#[derive(Default)]
struct ColumnsHandler {
    columns: Option<Vec<ColumnInfo>>,
}

impl ResultHandler for ColumnsHandler {
    fn result_start(&mut self, cols: RowDescription<'_>) -> Result<()> {
        self.columns = Some(cols.iter().map(ColumnInfo::from_field).collect());
        Ok(())
    }

    fn row(&mut self, _cols: RowDescription<'_>, _row: DataRow<'_>) -> Result<()> {
        Ok(())
    }
}

/// Synchronous PostgreSQL connection.
///
/// Every method blocks until the server has answered. Server errors are
/// raised only after the connection has read up to ReadyForQuery, so a
/// failed statement leaves the connection usable.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    state: ConnectionState,
    transaction_status: TransactionStatus,
    backend_key: Option<BackendKeyData>,
    server_params: HashMap<String, String>,
    client_encoding: String,
    statements: HashMap<String, PreparedStatement>,
    portals: HashMap<String, Portal>,
    notices: VecDeque<ServerError>,
    notifications: VecDeque<Notification>,
    notice_capacity: usize,
    pending_error: Option<Error>,
    paramstyle: ParamStyle,
    autocommit: bool,
    statement_counter: u64,
    registry: Arc<TypeRegistry>,
    host: String,
    #[cfg(feature = "sync-tls")]
    tls_connector: Option<native_tls::TlsConnector>,
}

impl Conn {
    /// Connect to a PostgreSQL server.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;

        let stream = match opts.socket_path() {
            Some(path) => Stream::connect_unix(&path)?,
            None => {
                if opts.host.is_empty() {
                    return Err(Error::InvalidUsage("host is empty".into()));
                }
                Stream::connect_tcp(&opts.host, opts.port, opts.connect_timeout, opts.keepalive)?
            }
        };

        Self::new_with_stream(stream, opts)
    }

    /// Run the startup exchange over an existing stream.
    pub fn new_with_stream(stream: Stream, opts: Opts) -> Result<Self> {
        let mut machine = StartupStateMachine::new(&opts, stream.is_unix())?;
        let mut conn = Self {
            stream,
            buffer_set: BufferSet::new(),
            state: ConnectionState::Startup,
            transaction_status: TransactionStatus::Idle,
            backend_key: None,
            server_params: HashMap::new(),
            client_encoding: "UTF8".to_string(),
            statements: HashMap::new(),
            portals: HashMap::new(),
            notices: VecDeque::new(),
            notifications: VecDeque::new(),
            notice_capacity: opts.notice_capacity,
            pending_error: None,
            paramstyle: opts.paramstyle,
            autocommit: opts.autocommit,
            statement_counter: 0,
            registry: Arc::clone(&opts.registry),
            host: opts.host.clone(),
            #[cfg(feature = "sync-tls")]
            tls_connector: opts.tls_connector.clone(),
        };

        if let Err(e) = conn.run(&mut machine, &mut CopyIo::default()) {
            debug!(error = %e, "startup failed");
            conn.state = ConnectionState::Failed;
            return Err(e);
        }
        if let Some(e) = conn.pending_error.take() {
            conn.state = ConnectionState::Failed;
            return Err(e);
        }

        conn.backend_key = machine.backend_key();
        if let Some(status) = machine.transaction_status() {
            conn.transaction_status = status;
        }
        conn.state = machine.connection_state();
        debug!(
            pid = conn.connection_id(),
            server_version = conn.server_param("server_version").unwrap_or("unknown"),
            "connection ready"
        );
        Ok(conn)
    }

    // === Driver ===

    fn ensure_usable(&self) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Failed | ConnectionState::Closed => Err(Error::ConnectionBroken),
            other => Err(Error::InvalidState(format!(
                "connection is busy ({:?})",
                other
            ))),
        }
    }

    /// Run one cycle of `machine` and raise its pending error, if any.
    fn drive<M: StateMachine>(&mut self, machine: &mut M, copy: &mut CopyIo<'_>) -> Result<()> {
        if let Err(e) = self.ensure_usable() {
            self.buffer_set.write_buffer.clear();
            return Err(e);
        }

        self.state = ConnectionState::QueryInFlight;
        match self.run(machine, copy) {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                if let Some(status) = machine.transaction_status() {
                    self.transaction_status = status;
                    if status == TransactionStatus::Idle {
                        self.portals.clear();
                    }
                }
                match self.pending_error.take() {
                    Some(e) => Err(e),
                    None => Ok(()),
                }
            }
            Err(e) => {
                warn!(error = %e, "connection failed");
                self.state = ConnectionState::Failed;
                self.pending_error = None;
                self.buffer_set.write_buffer.clear();
                Err(e)
            }
        }
    }

    /// Perform the I/O `machine` asks for until it finishes.
    fn run<M: StateMachine>(&mut self, machine: &mut M, copy: &mut CopyIo<'_>) -> Result<()> {
        let mut action = machine.step(&mut self.buffer_set)?;
        loop {
            match action {
                Action::WriteAndReadByte => {
                    self.flush_write()?;
                    let mut byte = [0u8; 1];
                    self.stream.read_exact(&mut byte)?;
                    self.buffer_set.type_byte = byte[0];
                }
                Action::TlsHandshake => self.tls_handshake()?,
                Action::Write => self.flush_write()?,
                Action::ReadMessage => self.read_message()?,
                Action::WriteAndReadMessage => {
                    self.flush_write()?;
                    self.read_message()?;
                }
                Action::HandleAsyncMessageAndReadMessage(msg) => {
                    self.absorb(msg);
                    self.read_message()?;
                }
                Action::StashError { error, then } => {
                    self.stash(error);
                    if then == Resume::WriteAndReadMessage {
                        self.flush_write()?;
                    }
                    self.read_message()?;
                }
                Action::CopyIn => {
                    self.state = ConnectionState::CopyIn;
                    self.send_copy_data(copy)?;
                    self.state = ConnectionState::QueryInFlight;
                }
                Action::ForwardCopyDataAndReadMessage => {
                    self.state = ConnectionState::CopyOut;
                    self.forward_copy_data(copy);
                    self.read_message()?;
                }
                Action::Finished => return Ok(()),
            }
            action = machine.step(&mut self.buffer_set)?;
        }
    }

    fn read_message(&mut self) -> Result<()> {
        read_message_into(&mut self.stream, &mut self.buffer_set)
    }

    fn flush_write(&mut self) -> Result<()> {
        if !self.buffer_set.write_buffer.is_empty() {
            self.stream.write_all(&self.buffer_set.write_buffer)?;
            self.stream.flush()?;
            self.buffer_set.write_buffer.clear();
        }
        Ok(())
    }

    #[cfg(feature = "sync-tls")]
    fn tls_handshake(&mut self) -> Result<()> {
        let connector = match self.tls_connector.take() {
            Some(connector) => connector,
            None => native_tls::TlsConnector::new()?,
        };
        self.stream.upgrade_to_tls(&connector, &self.host)?;
        debug!(host = %self.host, "TLS established");
        Ok(())
    }

    #[cfg(not(feature = "sync-tls"))]
    fn tls_handshake(&mut self) -> Result<()> {
        Err(Error::Unsupported(format!(
            "TLS to {} requires the sync-tls feature",
            self.host
        )))
    }

    /// Keep the first error of a cycle.
    fn stash(&mut self, error: Error) {
        match self.pending_error {
            None => self.pending_error = Some(error),
            Some(_) => debug!(error = %error, "discarding error after the first of this cycle"),
        }
    }

    fn absorb(&mut self, msg: AsyncMessage) {
        match msg {
            AsyncMessage::Notice(notice) => {
                debug!(
                    severity = notice.severity().unwrap_or_default(),
                    message = notice.message.as_deref().unwrap_or_default(),
                    "server notice"
                );
                push_bounded(&mut self.notices, notice, self.notice_capacity, "notice");
            }
            AsyncMessage::Notification(notification) => {
                debug!(
                    pid = notification.pid,
                    channel = %notification.channel,
                    "notification"
                );
                push_bounded(
                    &mut self.notifications,
                    notification,
                    self.notice_capacity,
                    "notification",
                );
            }
            AsyncMessage::ParameterChanged { name, value } => {
                if name == "client_encoding" {
                    self.client_encoding = value.clone();
                }
                self.server_params.insert(name, value);
            }
        }
    }

    /// Stream the COPY source as CopyData, ending with CopyDone or CopyFail.
    fn send_copy_data(&mut self, copy: &mut CopyIo<'_>) -> Result<()> {
        let Some(source) = copy.source.as_deref_mut() else {
            write_copy_fail(&mut self.buffer_set.write_buffer, "no COPY source was provided");
            self.stash(Error::InvalidUsage(
                "COPY FROM STDIN needs a source; use copy_from".into(),
            ));
            return Ok(());
        };

        let mut chunk = vec![0u8; COPY_CHUNK];
        let mut sent = 0usize;
        loop {
            match source.read(&mut chunk) {
                Ok(0) => {
                    write_copy_done(&mut self.buffer_set.write_buffer);
                    debug!(bytes = sent, "COPY IN complete");
                    return Ok(());
                }
                Ok(n) => {
                    write_copy_data(&mut self.buffer_set.write_buffer, &chunk[..n]);
                    self.flush_write()?;
                    sent += n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    write_copy_fail(
                        &mut self.buffer_set.write_buffer,
                        &format!("COPY source failed: {}", e),
                    );
                    self.stash(Error::CopyStream(e));
                    return Ok(());
                }
            }
        }
    }

    /// Hand a CopyData payload to the sink. A failed sink stops receiving
    /// data but the stream is still drained.
    fn forward_copy_data(&mut self, copy: &mut CopyIo<'_>) {
        if copy.sink_failed {
            return;
        }
        let error = match copy.sink.as_deref_mut() {
            Some(sink) => match sink.write_all(&self.buffer_set.read_buffer) {
                Ok(()) => return,
                Err(e) => Error::CopyStream(e),
            },
            None => Error::InvalidUsage("COPY TO STDOUT needs a sink; use copy_to".into()),
        };
        copy.sink_failed = true;
        self.stash(error);
    }

    // === Simple Query Protocol ===

    /// Issue `BEGIN` if autocommit is off and no transaction is open.
    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.autocommit && self.transaction_status == TransactionStatus::Idle {
            debug!("autocommit off, opening a transaction");
            self.simple_query("BEGIN", &mut DropHandler::new(), &mut CopyIo::default())?;
        }
        Ok(())
    }

    /// Refuse COMMIT/END in a failed transaction. The server would answer
    /// with a ROLLBACK and discard the transaction's work.
    fn check_commit_allowed(&self, sql: &str) -> Result<()> {
        if self.transaction_status.is_failed() && ends_transaction(sql) {
            return Err(Error::InvalidState(
                "in failed transaction block; roll back instead of committing".into(),
            ));
        }
        Ok(())
    }

    fn simple_query<H: ResultHandler>(
        &mut self,
        sql: &str,
        handler: &mut H,
        copy: &mut CopyIo<'_>,
    ) -> Result<()> {
        self.check_commit_allowed(sql)?;
        let mut machine = SimpleQueryStateMachine::new(sql, handler);
        let result = self.drive(&mut machine, copy);
        // A simple query replaces the unnamed statement and portal
        self.statements.remove("");
        self.portals.remove("");
        result
    }

    /// Execute a simple query and collect the result of its last statement.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let mut handler = CollectHandler::new(Arc::clone(&self.registry));
        self.query_with(sql, &mut handler)?;
        Ok(handler.into_result(self.server_version_major()))
    }

    /// Execute a simple query with a handler.
    pub fn query_with<H: ResultHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.ensure_usable()?;
        self.begin_if_needed()?;
        self.simple_query(sql, handler, &mut CopyIo::default())
    }

    /// Execute a simple query and discard results.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query_with(sql, &mut handler)?;
        Ok(handler.rows_affected(self.server_version_major()))
    }

    /// Run `COPY ... FROM STDIN`, streaming `source` to the server.
    ///
    /// Returns the number of rows copied.
    pub fn copy_from<R: Read>(&mut self, sql: &str, source: &mut R) -> Result<Option<u64>> {
        self.ensure_usable()?;
        self.begin_if_needed()?;
        let mut handler = DropHandler::new();
        let mut copy = CopyIo {
            source: Some(source as &mut dyn Read),
            ..CopyIo::default()
        };
        self.simple_query(sql, &mut handler, &mut copy)?;
        Ok(handler.rows_affected(self.server_version_major()))
    }

    /// Run `COPY ... TO STDOUT`, writing every CopyData payload to `sink`.
    ///
    /// Returns the number of rows copied.
    pub fn copy_to<W: Write>(&mut self, sql: &str, sink: &mut W) -> Result<Option<u64>> {
        self.ensure_usable()?;
        self.begin_if_needed()?;
        let mut handler = DropHandler::new();
        {
            let mut copy = CopyIo {
                sink: Some(&mut *sink as &mut dyn Write),
                ..CopyIo::default()
            };
            self.simple_query(sql, &mut handler, &mut copy)?;
        }
        sink.flush().map_err(Error::CopyStream)?;
        Ok(handler.rows_affected(self.server_version_major()))
    }

    // === Extended Query Protocol ===

    /// Parse and describe `sql` as `name`, replacing the registry entry.
    fn prepare_named(&mut self, name: &str, sql: &str, param_oids: &[Oid]) -> Result<PreparedStatement> {
        if name.is_empty() {
            self.statements.remove("");
        }
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.parse(buf, name, sql, param_oids);
        machine.describe_statement(buf, name);
        machine.sync(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;

        let stmt = PreparedStatement {
            name: name.to_string(),
            param_oids: machine.take_param_oids().unwrap_or_else(|| param_oids.to_vec()),
            columns: machine.take_statement_columns(),
        };
        self.statements.insert(stmt.name.clone(), stmt.clone());
        Ok(stmt)
    }

    /// Encode `params` for Bind against the statement's parameter types.
    fn encode_params(
        &self,
        param_oids: &[Oid],
        params: &[Value],
    ) -> Result<(Vec<FormatCode>, Vec<Option<Vec<u8>>>)> {
        let mut formats = Vec::with_capacity(params.len());
        let mut encoded = Vec::with_capacity(params.len());
        for (i, value) in params.iter().enumerate() {
            let type_oid = param_oids.get(i).copied().unwrap_or(oid::UNSPECIFIED);
            match self.registry.encode(type_oid, value)? {
                Some((format, bytes)) => {
                    formats.push(format);
                    encoded.push(Some(bytes));
                }
                None => {
                    formats.push(FormatCode::Text);
                    encoded.push(None);
                }
            }
        }
        Ok((formats, encoded))
    }

    fn result_formats(&self, columns: Option<&[ColumnInfo]>) -> Vec<FormatCode> {
        columns.map_or_else(Vec::new, |columns| {
            columns
                .iter()
                .map(|c| self.registry.result_format(c.type_oid()))
                .collect()
        })
    }

    /// Look up a live statement, failing before anything is written.
    fn live_statement(&self, name: &str) -> Result<PreparedStatement> {
        self.statements.get(name).cloned().ok_or_else(|| {
            Error::InvalidState(format!("prepared statement {:?} does not exist", name))
        })
    }

    fn live_portal(&self, name: &str) -> Result<&Portal> {
        self.portals
            .get(name)
            .ok_or_else(|| Error::InvalidState(format!("portal {:?} does not exist", name)))
    }

    /// Bind the unnamed portal to `stmt` and run it to completion.
    fn bind_execute<H: ResultHandler>(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
        handler: &mut H,
    ) -> Result<()> {
        if params.len() != stmt.param_oids.len() {
            return Err(Error::Param(format!(
                "statement takes {} parameters, {} given",
                stmt.param_oids.len(),
                params.len()
            )));
        }
        let (param_formats, encoded) = self.encode_params(&stmt.param_oids, params)?;
        let result_formats = self.result_formats(stmt.columns.as_deref());

        let mut machine = ExtendedQueryStateMachine::new(handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.bind(buf, "", &stmt.name, &param_formats, &encoded, &result_formats);
        machine.describe_portal(buf, "");
        machine.execute(buf, "", 0);
        machine.sync(buf);
        self.portals.insert(
            String::new(),
            Portal {
                name: String::new(),
                statement: stmt.name.clone(),
                result_formats,
            },
        );
        self.drive(&mut machine, &mut CopyIo::default())
    }

    /// Execute `sql` with parameters written in the connection's paramstyle.
    ///
    /// The statement is parsed and described in one round trip, then bound
    /// and executed in a second one.
    pub fn execute<P: Into<Params<Value>>>(&mut self, sql: &str, params: P) -> Result<QueryResult> {
        self.ensure_usable()?;
        let (sql, args) = rewrite(self.paramstyle, sql, params.into())?;
        self.check_commit_allowed(&sql)?;
        self.begin_if_needed()?;

        let natural: Vec<Oid> = args.iter().map(Value::natural_oid).collect();
        let stmt = self.prepare_named("", &sql, &natural)?;

        let mut handler = CollectHandler::new(Arc::clone(&self.registry));
        self.bind_execute(&stmt, &args, &mut handler)?;
        Ok(handler.into_result(self.server_version_major()))
    }

    /// Prepare a statement under a generated name.
    pub fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        self.statement_counter += 1;
        let name = format!("{}{}", STATEMENT_PREFIX, self.statement_counter);
        self.prepare_typed(&name, sql, &[])
    }

    /// Prepare a statement with explicit parameter types. `0` lets the
    /// server infer a type.
    pub fn prepare_typed(
        &mut self,
        name: &str,
        sql: &str,
        param_oids: &[Oid],
    ) -> Result<PreparedStatement> {
        self.ensure_usable()?;
        self.prepare_named(name, sql, param_oids)
    }

    /// Execute a prepared statement and collect its result.
    pub fn execute_prepared(
        &mut self,
        stmt: &PreparedStatement,
        params: &[Value],
    ) -> Result<QueryResult> {
        self.ensure_usable()?;
        let stmt = self.live_statement(&stmt.name)?;
        self.begin_if_needed()?;
        let mut handler = CollectHandler::new(Arc::clone(&self.registry));
        self.bind_execute(&stmt, params, &mut handler)?;
        Ok(handler.into_result(self.server_version_major()))
    }

    /// Close a prepared statement and remove it from the registry.
    pub fn close_statement(&mut self, stmt: &PreparedStatement) -> Result<()> {
        self.ensure_usable()?;
        self.live_statement(&stmt.name)?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.close_statement(buf, &stmt.name);
        machine.sync(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        self.statements.remove(&stmt.name);
        Ok(())
    }

    /// A statement in the registry.
    pub fn statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    // === Low-level extended protocol ===
    //
    // Each call is followed by Flush and waits for its own reply only. The
    // transaction state is reported by `lowlevel_sync`.

    /// Send Parse and register the statement.
    pub fn lowlevel_parse(&mut self, name: &str, sql: &str, param_oids: &[Oid]) -> Result<()> {
        self.ensure_usable()?;
        if name.is_empty() {
            self.statements.remove("");
        }
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.parse(buf, name, sql, param_oids);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        self.statements.insert(
            name.to_string(),
            PreparedStatement {
                name: name.to_string(),
                param_oids: param_oids.to_vec(),
                columns: None,
            },
        );
        Ok(())
    }

    /// Describe a registered statement and record its parameter and column types.
    pub fn lowlevel_describe_statement(&mut self, name: &str) -> Result<PreparedStatement> {
        self.ensure_usable()?;
        let mut stmt = self.live_statement(name)?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.describe_statement(buf, name);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        if let Some(param_oids) = machine.take_param_oids() {
            stmt.param_oids = param_oids;
        }
        stmt.columns = machine.take_statement_columns();
        self.statements.insert(name.to_string(), stmt.clone());
        Ok(stmt)
    }

    /// Bind `portal` to a registered statement.
    pub fn lowlevel_bind(&mut self, portal: &str, statement: &str, params: &[Value]) -> Result<()> {
        self.ensure_usable()?;
        let stmt = self.live_statement(statement)?;
        let (param_formats, encoded) = self.encode_params(&stmt.param_oids, params)?;
        let result_formats = self.result_formats(stmt.columns.as_deref());

        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.bind(buf, portal, statement, &param_formats, &encoded, &result_formats);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        self.portals.insert(
            portal.to_string(),
            Portal {
                name: portal.to_string(),
                statement: statement.to_string(),
                result_formats,
            },
        );
        Ok(())
    }

    /// Describe a bound portal. `None` means it returns no rows.
    pub fn lowlevel_describe_portal(&mut self, portal: &str) -> Result<Option<Vec<ColumnInfo>>> {
        self.ensure_usable()?;
        self.live_portal(portal)?;
        let mut handler = ColumnsHandler::default();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.describe_portal(buf, portal);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        Ok(handler.columns)
    }

    /// Execute a bound portal, fetching at most `max_rows` rows (0 = all).
    ///
    /// Returns true if the portal was suspended at the row limit and can be
    /// executed again for more rows.
    pub fn lowlevel_execute<H: ResultHandler>(
        &mut self,
        portal: &str,
        max_rows: u32,
        handler: &mut H,
    ) -> Result<bool> {
        self.ensure_usable()?;
        self.live_portal(portal)?;
        let mut machine = ExtendedQueryStateMachine::new(handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.describe_portal(buf, portal);
        machine.execute(buf, portal, max_rows);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        Ok(machine.suspended())
    }

    pub fn lowlevel_close_statement(&mut self, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.close_statement(buf, name);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        self.statements.remove(name);
        Ok(())
    }

    pub fn lowlevel_close_portal(&mut self, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        let buf = &mut self.buffer_set.write_buffer;
        machine.close_portal(buf, name);
        machine.flush(buf);
        self.drive(&mut machine, &mut CopyIo::default())?;
        self.portals.remove(name);
        Ok(())
    }

    /// Send Sync and wait for ReadyForQuery.
    pub fn lowlevel_sync(&mut self) -> Result<TransactionStatus> {
        self.ensure_usable()?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        machine.sync(&mut self.buffer_set.write_buffer);
        self.drive(&mut machine, &mut CopyIo::default())?;
        Ok(self.transaction_status)
    }

    /// Send Flush without waiting for anything.
    pub fn lowlevel_flush(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler);
        machine.flush(&mut self.buffer_set.write_buffer);
        self.drive(&mut machine, &mut CopyIo::default())
    }

    // === Transactions ===

    /// Commit the open transaction. Does nothing when none is open.
    ///
    /// Fails with [`Error::InvalidState`] in a failed transaction, which the
    /// server would roll back instead.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        match self.transaction_status {
            TransactionStatus::Idle => Ok(()),
            TransactionStatus::Failed => Err(Error::InvalidState(
                "transaction has failed; roll back instead of committing".into(),
            )),
            TransactionStatus::InTransaction => {
                self.simple_query("COMMIT", &mut DropHandler::new(), &mut CopyIo::default())
            }
        }
    }

    /// Roll back the open transaction. Does nothing when none is open.
    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.transaction_status.in_transaction() {
            return Ok(());
        }
        self.simple_query("ROLLBACK", &mut DropHandler::new(), &mut CopyIo::default())
    }

    /// Run `f` inside a transaction.
    ///
    /// Commits if `f` succeeds and rolls back otherwise. Returns
    /// `Error::InvalidUsage` if called while already in a transaction.
    pub fn transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Conn) -> Result<R>,
    {
        self.ensure_usable()?;
        if self.in_transaction() {
            return Err(Error::InvalidUsage("nested transactions are not supported".into()));
        }

        self.simple_query("BEGIN", &mut DropHandler::new(), &mut CopyIo::default())?;

        match f(self).and_then(|value| self.commit().map(|()| value)) {
            Ok(value) => Ok(value),
            Err(e) => {
                if self.in_transaction() && !self.is_broken() {
                    if let Err(rollback_error) = self.rollback() {
                        debug!(error = %rollback_error, "rollback after failed transaction");
                    }
                }
                Err(e)
            }
        }
    }

    // === Accessors ===

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Get the backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get the connection ID (backend process ID).
    ///
    /// Returns 0 if the backend key data is not available.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.as_ref().map_or(0, |k| k.process_id())
    }

    /// Parameters reported by ParameterStatus.
    pub fn server_params(&self) -> &HashMap<String, String> {
        &self.server_params
    }

    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params.get(name).map(String::as_str)
    }

    /// Major version from the `server_version` parameter.
    pub fn server_version_major(&self) -> Option<u32> {
        let version = self.server_param("server_version")?;
        let digits: String = version.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    pub fn client_encoding(&self) -> &str {
        &self.client_encoding
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        matches!(self.state, ConnectionState::Failed | ConnectionState::Closed)
    }

    pub fn paramstyle(&self) -> ParamStyle {
        self.paramstyle
    }

    pub fn set_paramstyle(&mut self, paramstyle: ParamStyle) {
        self.paramstyle = paramstyle;
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Switch autocommit. An open transaction stays open.
    pub fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Mutable registry. A registry shared with other connections is cloned first.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        Arc::make_mut(&mut self.registry)
    }

    /// Drain the queued notices, oldest first.
    pub fn take_notices(&mut self) -> Vec<ServerError> {
        self.notices.drain(..).collect()
    }

    /// Drain the queued notifications, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Close the connection gracefully.
    pub fn close(mut self) -> Result<()> {
        self.ensure_usable()?;
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        self.state = ConnectionState::Closed;
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer);
        self.flush_write()
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if matches!(self.state, ConnectionState::Ready) {
            // Best effort; the socket closes either way
            let _ = self.terminate();
        }
    }
}

/// True if the first keyword of `sql` is COMMIT or END.
fn ends_transaction(sql: &str) -> bool {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.split_once('\n').map_or("", |(_, after)| after);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.split_once("*/").map_or("", |(_, after)| after);
        } else {
            break;
        }
    }
    let keyword = rest
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    keyword.eq_ignore_ascii_case("commit") || keyword.eq_ignore_ascii_case("end")
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize, kind: &str) {
    if capacity == 0 {
        warn!(kind, "queue capacity is zero, dropping message");
        return;
    }
    while queue.len() >= capacity {
        queue.pop_front();
        warn!(kind, capacity, "queue full, dropping the oldest message");
    }
    queue.push_back(item);
}
