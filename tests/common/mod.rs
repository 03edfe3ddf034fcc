//! Scripted in-process PostgreSQL backend for driving `Conn` without a server.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pgwire_engine::protocol::FrontendMessage;
use pgwire_engine::sync::{Conn, Stream};
use pgwire_engine::{Oid, Opts};

const TIMEOUT: Duration = Duration::from_secs(5);

/// One side of the socket pair, playing the server.
pub struct Backend {
    stream: UnixStream,
}

/// A frontend message as received by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl Received {
    pub fn message(&self) -> FrontendMessage<'_> {
        FrontendMessage::parse(self.tag, &self.payload).unwrap()
    }

    pub fn query(&self) -> &str {
        match self.message() {
            FrontendMessage::Query(sql) => sql,
            other => panic!("expected Query, got {other:?}"),
        }
    }
}

impl Backend {
    /// Read the untagged StartupMessage and return its parameters.
    pub fn read_startup(&mut self) -> Vec<(String, String)> {
        let mut len = [0u8; 4];
        self.stream.read_exact(&mut len).unwrap();
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize - 4];
        self.stream.read_exact(&mut payload).unwrap();
        match FrontendMessage::parse_startup(&payload).unwrap() {
            FrontendMessage::Startup { version, params } => {
                assert_eq!(version, 196_608);
                params
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }
            other => panic!("expected StartupMessage, got {other:?}"),
        }
    }

    pub fn recv(&mut self) -> Received {
        let mut header = [0u8; 5];
        self.stream.read_exact(&mut header).unwrap();
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).unwrap();
        Received {
            tag: header[0],
            payload,
        }
    }

    /// Receive a message and check its tag.
    pub fn expect(&mut self, tag: u8) -> Received {
        let msg = self.recv();
        assert_eq!(
            msg.tag as char, tag as char,
            "unexpected frontend message {:?}",
            msg
        );
        msg
    }

    /// Receive messages up to and including the next Sync.
    pub fn until_sync(&mut self) -> Vec<Received> {
        let mut messages = Vec::new();
        loop {
            let msg = self.recv();
            let done = msg.tag == b'S';
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    /// Receive messages up to and including the next Flush.
    pub fn until_flush(&mut self) -> Vec<Received> {
        let mut messages = Vec::new();
        loop {
            let msg = self.recv();
            let done = msg.tag == b'H';
            messages.push(msg);
            if done {
                return messages;
            }
        }
    }

    pub fn send(&mut self, tag: u8, payload: &[u8]) {
        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(tag);
        frame.extend_from_slice(&(payload.len() as u32 + 4).to_be_bytes());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).unwrap();
    }

    pub fn auth(&mut self, code: i32, data: &[u8]) {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(data);
        self.send(b'R', &payload);
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) {
        self.send(b'S', &cstrs(&[name, value]));
    }

    pub fn backend_key(&mut self, pid: u32, secret: u32) {
        let mut payload = pid.to_be_bytes().to_vec();
        payload.extend_from_slice(&secret.to_be_bytes());
        self.send(b'K', &payload);
    }

    pub fn ready(&mut self, status: u8) {
        self.send(b'Z', &[status]);
    }

    /// AuthenticationOk through ReadyForQuery.
    pub fn accept(&mut self) {
        self.auth(0, &[]);
        self.parameter_status("server_version", "16.2");
        self.parameter_status("client_encoding", "UTF8");
        self.backend_key(4242, 7);
        self.ready(b'I');
    }

    /// Read the StartupMessage and accept without a password.
    pub fn handshake(&mut self) {
        self.read_startup();
        self.accept();
    }

    /// Columns as (name, type OID, format).
    pub fn row_description(&mut self, columns: &[(&str, Oid, i16)]) {
        let mut payload = (columns.len() as i16).to_be_bytes().to_vec();
        for (name, type_oid, format) in columns {
            payload.extend_from_slice(name.as_bytes());
            payload.push(0);
            payload.extend_from_slice(&0u32.to_be_bytes());
            payload.extend_from_slice(&0i16.to_be_bytes());
            payload.extend_from_slice(&type_oid.to_be_bytes());
            payload.extend_from_slice(&(-1i16).to_be_bytes());
            payload.extend_from_slice(&(-1i32).to_be_bytes());
            payload.extend_from_slice(&format.to_be_bytes());
        }
        self.send(b'T', &payload);
    }

    pub fn data_row(&mut self, values: &[Option<&[u8]>]) {
        let mut payload = (values.len() as i16).to_be_bytes().to_vec();
        for value in values {
            match value {
                Some(bytes) => {
                    payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    payload.extend_from_slice(bytes);
                }
                None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.send(b'D', &payload);
    }

    pub fn command_complete(&mut self, tag: &str) {
        self.send(b'C', &cstrs(&[tag]));
    }

    pub fn error(&mut self, severity: &str, code: &str, message: &str) {
        self.send(b'E', &fields(severity, code, message));
    }

    pub fn notice(&mut self, message: &str) {
        self.send(b'N', &fields("NOTICE", "00000", message));
    }

    pub fn notification(&mut self, pid: u32, channel: &str, payload: &str) {
        let mut data = pid.to_be_bytes().to_vec();
        data.extend_from_slice(&cstrs(&[channel, payload]));
        self.send(b'A', &data);
    }

    pub fn parse_complete(&mut self) {
        self.send(b'1', &[]);
    }

    pub fn bind_complete(&mut self) {
        self.send(b'2', &[]);
    }

    pub fn close_complete(&mut self) {
        self.send(b'3', &[]);
    }

    pub fn no_data(&mut self) {
        self.send(b'n', &[]);
    }

    pub fn portal_suspended(&mut self) {
        self.send(b's', &[]);
    }

    pub fn parameter_description(&mut self, oids: &[Oid]) {
        let mut payload = (oids.len() as i16).to_be_bytes().to_vec();
        for oid in oids {
            payload.extend_from_slice(&oid.to_be_bytes());
        }
        self.send(b't', &payload);
    }

    pub fn copy_in_response(&mut self, columns: i16) {
        self.send(b'G', &copy_response(columns));
    }

    pub fn copy_out_response(&mut self, columns: i16) {
        self.send(b'H', &copy_response(columns));
    }

    pub fn copy_data(&mut self, data: &[u8]) {
        self.send(b'd', data);
    }

    pub fn copy_done(&mut self) {
        self.send(b'c', &[]);
    }

    /// Write bytes as they are, without framing.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).unwrap();
    }

    /// Answer a simple `BEGIN`.
    pub fn begin(&mut self) {
        assert_eq!(self.expect(b'Q').query(), "BEGIN");
        self.command_complete("BEGIN");
        self.ready(b'T');
    }
}

/// A text-format column value.
pub fn text(s: &str) -> Option<&[u8]> {
    Some(s.as_bytes())
}

fn cstrs(values: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out
}

fn fields(severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for (field, value) in [(b'S', severity), (b'V', severity), (b'C', code), (b'M', message)] {
        out.push(field);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    out.push(0);
    out
}

fn copy_response(columns: i16) -> Vec<u8> {
    let mut payload = vec![0u8];
    payload.extend_from_slice(&columns.to_be_bytes());
    for _ in 0..columns {
        payload.extend_from_slice(&0i16.to_be_bytes());
    }
    payload
}

/// Options for scripted connections, with autocommit on.
pub fn opts() -> Opts {
    Opts {
        user: "alice".into(),
        database: Some("app".into()),
        autocommit: true,
        ..Opts::default()
    }
}

/// Start `script` on a backend thread and connect to it.
pub fn connect_with<F>(opts: Opts, script: F) -> (pgwire_engine::Result<Conn>, JoinHandle<()>)
where
    F: FnOnce(Backend) + Send + 'static,
{
    let (client, server) = UnixStream::pair().unwrap();
    client.set_read_timeout(Some(TIMEOUT)).unwrap();
    server.set_read_timeout(Some(TIMEOUT)).unwrap();
    let handle = thread::spawn(move || script(Backend { stream: server }));
    let conn = Conn::new_with_stream(Stream::unix(client), opts);
    (conn, handle)
}

/// Connect to a backend that completes the handshake and then runs `script`.
pub fn connect<F>(script: F) -> (Conn, JoinHandle<()>)
where
    F: FnOnce(&mut Backend) + Send + 'static,
{
    let (conn, handle) = connect_with(opts(), move |mut backend| {
        backend.handshake();
        script(&mut backend);
    });
    (conn.unwrap(), handle)
}
