//! Query cycles against a scripted backend.

mod common;

use std::io::{self, Cursor, Read};
use std::sync::{Arc, Mutex};

use pgwire_engine::protocol::FrontendMessage;
use pgwire_engine::protocol::types::oid;
use pgwire_engine::sync::Conn;
use pgwire_engine::{
    CollectHandler, ConnectionState, DropHandler, Error, FormatCode, Opts, ParamStyle, Params,
    TransactionStatus, Value,
};

use common::{Backend, connect, connect_with, opts, text};

fn tags(messages: &[common::Received]) -> Vec<u8> {
    messages.iter().map(|m| m.tag).collect()
}

/// Answer a `SELECT 1` so a test can prove the connection still works.
fn answer_select_one(backend: &mut Backend) {
    assert_eq!(backend.expect(b'Q').query(), "SELECT 1");
    backend.row_description(&[("?column?", oid::INT4, 0)]);
    backend.data_row(&[text("1")]);
    backend.command_complete("SELECT 1");
    backend.ready(b'I');
}

fn select_one(conn: &mut Conn) {
    let result = conn.query("SELECT 1").unwrap();
    assert_eq!(result.collect::<(i32,)>().unwrap(), [(1,)]);
}

#[test]
fn simple_query_collects_rows() {
    let (mut conn, server) = connect(|backend| {
        assert_eq!(backend.expect(b'Q').query(), "SELECT id, name FROM users");
        backend.row_description(&[("id", oid::INT4, 0), ("name", oid::TEXT, 0)]);
        backend.data_row(&[text("1"), text("ann")]);
        backend.data_row(&[text("2"), None]);
        backend.command_complete("SELECT 2");
        backend.ready(b'I');
    });

    let result = conn.query("SELECT id, name FROM users").unwrap();
    server.join().unwrap();

    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.columns[1].name, "name");
    assert_eq!(result.command.as_deref(), Some("SELECT 2"));
    assert_eq!(result.rows_affected, Some(2));
    let rows: Vec<(i32, Option<String>)> = result.collect().unwrap();
    assert_eq!(rows, [(1, Some("ann".to_string())), (2, None)]);
}

#[test]
fn multi_statement_keeps_the_last_result() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.row_description(&[("a", oid::INT4, 0)]);
        backend.data_row(&[text("1")]);
        backend.command_complete("SELECT 1");
        backend.command_complete("UPDATE 4");
        backend.ready(b'I');
    });

    let result = conn.query("SELECT 1 AS a; UPDATE t SET x = 1").unwrap();
    server.join().unwrap();
    assert!(result.is_empty());
    assert_eq!(result.rows_affected, Some(4));
}

#[test]
fn empty_query_is_accepted() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.send(b'I', &[]);
        backend.ready(b'I');
    });
    assert_eq!(conn.query_drop("").unwrap(), None);
    server.join().unwrap();
}

#[test]
fn server_error_drains_then_raises_and_the_connection_survives() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.error("ERROR", "42P01", "table \"nope\" does not exist");
        backend.notice("drained after the error");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    let err = conn.query_drop("DROP TABLE nope").unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(!err.is_connection_broken());
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.take_notices().len(), 1);

    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn decode_failure_is_raised_after_draining() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.row_description(&[("n", oid::INT4, 0)]);
        backend.data_row(&[text("not a number")]);
        backend.data_row(&[text("2")]);
        backend.command_complete("SELECT 2");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    assert!(matches!(conn.query("SELECT n FROM t"), Err(Error::Decode(_))));
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn async_messages_are_absorbed() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.notification(99, "jobs", "started");
        backend.row_description(&[("n", oid::INT4, 0)]);
        backend.notice("first");
        backend.data_row(&[text("7")]);
        backend.parameter_status("client_encoding", "LATIN1");
        backend.command_complete("SELECT 1");
        backend.notification(99, "jobs", "done");
        backend.ready(b'I');
    });

    let result = conn.query("SELECT n FROM t").unwrap();
    server.join().unwrap();

    assert_eq!(result.first::<(i32,)>().unwrap(), Some((7,)));
    assert_eq!(conn.client_encoding(), "LATIN1");
    assert_eq!(conn.server_param("client_encoding"), Some("LATIN1"));
    let notifications = conn.take_notifications();
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[0].channel, "jobs");
    assert_eq!(notifications[1].payload, "done");
    assert_eq!(notifications[1].pid, 99);
    assert_eq!(conn.take_notices()[0].message.as_deref(), Some("first"));
    assert!(conn.take_notifications().is_empty());
}

#[test]
fn notice_queue_evicts_the_oldest() {
    let opts = Opts {
        notice_capacity: 2,
        ..opts()
    };
    let (conn, server) = connect_with(opts, |mut backend| {
        backend.handshake();
        backend.expect(b'Q');
        for message in ["one", "two", "three"] {
            backend.notice(message);
        }
        backend.command_complete("DO");
        backend.ready(b'I');
    });
    let mut conn = conn.unwrap();
    conn.query_drop("DO $$ BEGIN RAISE NOTICE 'x'; END $$").unwrap();
    server.join().unwrap();

    let messages: Vec<_> = conn
        .take_notices()
        .into_iter()
        .filter_map(|n| n.message)
        .collect();
    assert_eq!(messages, ["two", "three"]);
}

#[test]
fn execute_rewrites_parses_then_binds() {
    let (mut conn, server) = connect(|backend| {
        let parse = backend.until_sync();
        assert_eq!(tags(&parse), b"PDS");
        assert_eq!(
            parse[0].message(),
            FrontendMessage::Parse {
                name: "",
                query: "SELECT $1::int4 + $2, $1",
                param_oids: vec![oid::INT4, oid::UNSPECIFIED],
            }
        );
        backend.parse_complete();
        backend.parameter_description(&[oid::INT4, oid::INT4]);
        backend.row_description(&[("sum", oid::INT4, 0), ("a", oid::INT4, 0)]);
        backend.ready(b'I');

        let exec = backend.until_sync();
        assert_eq!(tags(&exec), b"BDES");
        match exec[0].message() {
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                params,
                result_formats,
            } => {
                assert_eq!((portal, statement), ("", ""));
                assert_eq!(param_formats, [FormatCode::Binary, FormatCode::Text]);
                assert_eq!(params, [Some(&41_i32.to_be_bytes()[..]), Some(&b"1"[..])]);
                assert_eq!(result_formats, [FormatCode::Binary, FormatCode::Binary]);
            }
            other => panic!("expected Bind, got {other:?}"),
        }
        backend.bind_complete();
        backend.row_description(&[("sum", oid::INT4, 1), ("a", oid::INT4, 1)]);
        backend.data_row(&[Some(&42_i32.to_be_bytes()[..]), Some(&41_i32.to_be_bytes()[..])]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');
    });

    conn.set_paramstyle(ParamStyle::Named);
    let result = conn
        .execute(
            "SELECT :a::int4 + :b, :a",
            Params::named([("a", Value::from(41)), ("b", Value::from("1"))]),
        )
        .unwrap();
    server.join().unwrap();
    assert_eq!(result.collect::<(i32, i32)>().unwrap(), [(42, 41)]);
}

#[test]
fn execute_parse_error_skips_the_bind() {
    let (mut conn, server) = connect(|backend| {
        backend.until_sync();
        backend.error("ERROR", "42601", "syntax error at or near \"SELEC\"");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    conn.set_paramstyle(ParamStyle::Qmark);
    let err = conn.execute("SELEC ?", vec![Value::from(1)]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42601"));
    assert!(conn.statement("").is_none());
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn rewrite_errors_send_nothing() {
    let (mut conn, server) = connect(answer_select_one);
    conn.set_paramstyle(ParamStyle::Qmark);
    assert!(matches!(
        conn.execute("SELECT ?, ?", vec![Value::from(1)]),
        Err(Error::Param(_))
    ));
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn prepared_statements_round_trip() {
    let (mut conn, server) = connect(|backend| {
        let parse = backend.until_sync();
        match parse[0].message() {
            FrontendMessage::Parse { name, .. } => assert_eq!(name, "_pgwe_1"),
            other => panic!("expected Parse, got {other:?}"),
        }
        backend.parse_complete();
        backend.parameter_description(&[oid::INT8]);
        backend.no_data();
        backend.ready(b'I');

        let exec = backend.until_sync();
        assert_eq!(tags(&exec), b"BDES");
        match exec[0].message() {
            FrontendMessage::Bind { statement, params, .. } => {
                assert_eq!(statement, "_pgwe_1");
                // int4 widened to the int8 slot
                assert_eq!(params, [Some(&5_i64.to_be_bytes()[..])]);
            }
            other => panic!("expected Bind, got {other:?}"),
        }
        backend.bind_complete();
        backend.no_data();
        backend.command_complete("DELETE 3");
        backend.ready(b'I');

        let close = backend.until_sync();
        assert_eq!(tags(&close), b"CS");
        backend.close_complete();
        backend.ready(b'I');
    });

    let stmt = conn.prepare("DELETE FROM t WHERE id < $1").unwrap();
    assert_eq!(stmt.param_oids, [oid::INT8]);
    assert!(stmt.columns.is_none());

    let result = conn.execute_prepared(&stmt, &[Value::from(5)]).unwrap();
    assert_eq!(result.rows_affected, Some(3));

    conn.close_statement(&stmt).unwrap();
    assert!(matches!(
        conn.execute_prepared(&stmt, &[Value::from(5)]),
        Err(Error::InvalidState(_))
    ));
    server.join().unwrap();
}

#[test]
fn parameter_count_must_match_the_statement() {
    let (mut conn, server) = connect(|backend| {
        backend.until_sync();
        backend.parse_complete();
        backend.parameter_description(&[oid::INT4, oid::INT4]);
        backend.no_data();
        backend.ready(b'I');
        answer_select_one(backend);
    });
    let stmt = conn.prepare("SELECT $1 + $2").unwrap();
    assert!(matches!(
        conn.execute_prepared(&stmt, &[Value::from(1)]),
        Err(Error::Param(_))
    ));
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn out_of_order_extended_calls_are_state_errors() {
    let (mut conn, server) = connect(answer_select_one);

    assert!(matches!(
        conn.lowlevel_bind("", "never_parsed", &[]),
        Err(Error::InvalidState(_))
    ));
    let mut handler = DropHandler::new();
    assert!(matches!(
        conn.lowlevel_execute("never_bound", 0, &mut handler),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        conn.lowlevel_describe_portal("never_bound"),
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        conn.lowlevel_describe_statement("never_parsed"),
        Err(Error::InvalidState(_))
    ));

    // Nothing reached the server: the next message it sees is this query
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn lowlevel_portal_with_row_limit() {
    let (mut conn, server) = connect(|backend| {
        assert_eq!(tags(&backend.until_flush()), b"PH");
        backend.parse_complete();

        assert_eq!(tags(&backend.until_flush()), b"DH");
        backend.parameter_description(&[]);
        backend.row_description(&[("n", oid::INT4, 0)]);

        assert_eq!(tags(&backend.until_flush()), b"BH");
        backend.bind_complete();

        let first = backend.until_flush();
        assert_eq!(tags(&first), b"DEH");
        assert_eq!(
            first[1].message(),
            FrontendMessage::Execute {
                portal: "p1",
                max_rows: 2
            }
        );
        backend.row_description(&[("n", oid::INT4, 1)]);
        backend.data_row(&[Some(&1_i32.to_be_bytes()[..])]);
        backend.data_row(&[Some(&2_i32.to_be_bytes()[..])]);
        backend.portal_suspended();

        assert_eq!(tags(&backend.until_flush()), b"DEH");
        backend.row_description(&[("n", oid::INT4, 1)]);
        backend.data_row(&[Some(&3_i32.to_be_bytes()[..])]);
        backend.command_complete("SELECT 1");

        assert_eq!(tags(&backend.until_flush()), b"CH");
        backend.close_complete();

        backend.expect(b'S');
        backend.ready(b'T');
    });

    conn.lowlevel_parse("s1", "SELECT n FROM t", &[]).unwrap();
    let stmt = conn.lowlevel_describe_statement("s1").unwrap();
    assert_eq!(stmt.columns.as_ref().map(Vec::len), Some(1));
    conn.lowlevel_bind("p1", "s1", &[]).unwrap();

    let mut first = CollectHandler::new(Arc::clone(conn.registry()));
    assert!(conn.lowlevel_execute("p1", 2, &mut first).unwrap());
    let first: Vec<(i32,)> = first.into_result(None).collect().unwrap();
    assert_eq!(first, [(1,), (2,)]);

    let mut rest = CollectHandler::new(Arc::clone(conn.registry()));
    assert!(!conn.lowlevel_execute("p1", 2, &mut rest).unwrap());
    let rest: Vec<(i32,)> = rest.into_result(None).collect().unwrap();
    assert_eq!(rest, [(3,)]);

    conn.lowlevel_close_portal("p1").unwrap();
    assert_eq!(conn.lowlevel_sync().unwrap(), TransactionStatus::InTransaction);
    server.join().unwrap();
}

#[test]
fn lowlevel_error_without_sync_resyncs() {
    let (mut conn, server) = connect(|backend| {
        assert_eq!(tags(&backend.until_flush()), b"PH");
        backend.error("ERROR", "42601", "syntax error");
        // the client sends the Sync itself so the server leaves error mode
        backend.expect(b'S');
        backend.ready(b'I');
        answer_select_one(backend);
    });

    let err = conn.lowlevel_parse("bad", "SELEC", &[]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42601"));
    assert!(conn.statement("bad").is_none());
    assert!(matches!(
        conn.lowlevel_bind("", "bad", &[]),
        Err(Error::InvalidState(_))
    ));
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn portals_are_forgotten_when_the_transaction_ends() {
    let (mut conn, server) = connect(|backend| {
        backend.until_flush();
        backend.parse_complete();
        backend.until_flush();
        backend.bind_complete();
        backend.expect(b'S');
        backend.ready(b'I');
    });

    conn.lowlevel_parse("", "SELECT 1", &[]).unwrap();
    conn.lowlevel_bind("", "", &[]).unwrap();
    conn.lowlevel_sync().unwrap();
    let mut handler = DropHandler::new();
    assert!(matches!(
        conn.lowlevel_execute("", 0, &mut handler),
        Err(Error::InvalidState(_))
    ));
    server.join().unwrap();
}

#[test]
fn autocommit_off_begins_and_commit_checks_for_failure() {
    let opts = Opts {
        autocommit: false,
        ..opts()
    };
    let (conn, server) = connect_with(opts, |mut backend| {
        backend.handshake();
        backend.begin();
        assert_eq!(backend.expect(b'Q').query(), "INSERT INTO t VALUES (1)");
        backend.error("ERROR", "23505", "duplicate key value violates unique constraint");
        backend.ready(b'E');

        // commit() sends nothing; the next message is the rollback
        assert_eq!(backend.expect(b'Q').query(), "ROLLBACK");
        backend.command_complete("ROLLBACK");
        backend.ready(b'I');
    });
    let mut conn = conn.unwrap();

    let err = conn.query_drop("INSERT INTO t VALUES (1)").unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);

    assert!(matches!(conn.commit(), Err(Error::InvalidState(_))));
    conn.rollback().unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    server.join().unwrap();
}

#[test]
fn raw_commit_in_a_failed_transaction_is_refused() {
    let (mut conn, server) = connect(|backend| {
        backend.begin();
        assert_eq!(backend.expect(b'Q').query(), "SELECT 1/0");
        backend.error("ERROR", "22012", "division by zero");
        backend.ready(b'E');

        // neither COMMIT reaches the server
        assert_eq!(backend.expect(b'Q').query(), "ROLLBACK");
        backend.command_complete("ROLLBACK");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    conn.query_drop("BEGIN").unwrap();
    let err = conn.query_drop("SELECT 1/0").unwrap_err();
    assert_eq!(err.sqlstate(), Some("22012"));
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);

    let err = conn.query_drop("COMMIT").unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");
    let err = conn.execute("  end", Vec::<Value>::new()).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)), "{err:?}");
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.query_drop("ROLLBACK").unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn transaction_commits_on_success() {
    let (mut conn, server) = connect(|backend| {
        backend.begin();
        backend.expect(b'Q');
        backend.command_complete("UPDATE 3");
        backend.ready(b'T');
        assert_eq!(backend.expect(b'Q').query(), "COMMIT");
        backend.command_complete("COMMIT");
        backend.ready(b'I');
    });

    let updated = conn
        .transaction(|conn| conn.query_drop("UPDATE t SET x = 1"))
        .unwrap();
    assert_eq!(updated, Some(3));
    assert!(!conn.in_transaction());
    server.join().unwrap();
}

#[test]
fn transaction_rolls_back_on_error() {
    let (mut conn, server) = connect(|backend| {
        backend.begin();
        assert_eq!(backend.expect(b'Q').query(), "ROLLBACK");
        backend.command_complete("ROLLBACK");
        backend.ready(b'I');
    });

    let result: pgwire_engine::Result<()> =
        conn.transaction(|_conn| Err(Error::InvalidUsage("changed my mind".into())));
    assert!(matches!(result, Err(Error::InvalidUsage(_))));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    server.join().unwrap();
}

/// Backend side of COPY FROM STDIN: collect CopyData until CopyDone.
fn receive_copy_in(backend: &mut Backend) -> Vec<u8> {
    backend.copy_in_response(1);
    let mut received = Vec::new();
    loop {
        let msg = backend.recv();
        match msg.tag {
            b'd' => {
                assert!(msg.payload.len() <= 8192);
                received.extend_from_slice(&msg.payload);
            }
            b'c' => return received,
            other => panic!("unexpected message {:?} during COPY IN", other as char),
        }
    }
}

#[test]
fn copy_in_then_out_reproduces_the_bytes() {
    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let stored = Arc::new(Mutex::new(Vec::new()));
    let server_store = Arc::clone(&stored);

    let (mut conn, server) = connect(move |backend| {
        assert_eq!(backend.expect(b'Q').query(), "COPY t FROM STDIN");
        let received = receive_copy_in(backend);
        backend.command_complete("COPY 20000");
        backend.ready(b'I');

        assert_eq!(backend.expect(b'Q').query(), "COPY t TO STDOUT");
        backend.copy_out_response(1);
        for chunk in received.chunks(7000) {
            backend.copy_data(chunk);
        }
        backend.copy_done();
        backend.command_complete("COPY 20000");
        backend.ready(b'I');
        *server_store.lock().unwrap() = received;
    });

    let copied = conn
        .copy_from("COPY t FROM STDIN", &mut Cursor::new(data.clone()))
        .unwrap();
    assert_eq!(copied, Some(20_000));

    let mut out = Vec::new();
    assert_eq!(conn.copy_to("COPY t TO STDOUT", &mut out).unwrap(), Some(20_000));
    server.join().unwrap();

    assert_eq!(*stored.lock().unwrap(), data);
    assert_eq!(out, data);
}

/// Yields one chunk of data, then fails.
struct FailingReader {
    sent: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::other("disk on fire"));
        }
        self.sent = true;
        buf[..3].copy_from_slice(b"1\n2");
        Ok(3)
    }
}

#[test]
fn copy_source_failure_sends_copy_fail() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.copy_in_response(1);
        assert_eq!(backend.expect(b'd').payload, b"1\n2");
        let fail = backend.expect(b'f');
        match fail.message() {
            FrontendMessage::CopyFail(reason) => assert!(reason.contains("disk on fire")),
            other => panic!("expected CopyFail, got {other:?}"),
        }
        backend.error("ERROR", "57014", "COPY from stdin failed: disk on fire");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    let err = conn
        .copy_from("COPY t FROM STDIN", &mut FailingReader { sent: false })
        .unwrap_err();
    assert!(matches!(err, Error::CopyStream(_)), "{err:?}");
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn copy_in_without_a_source_is_refused() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.copy_in_response(1);
        backend.expect(b'f');
        backend.error("ERROR", "57014", "COPY from stdin failed");
        backend.ready(b'I');
    });

    assert!(matches!(
        conn.query_drop("COPY t FROM STDIN"),
        Err(Error::InvalidUsage(_))
    ));
    assert_eq!(conn.state(), ConnectionState::Ready);
    server.join().unwrap();
}

#[test]
fn copy_out_without_a_sink_still_drains() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.copy_out_response(1);
        backend.copy_data(b"1\n");
        backend.copy_data(b"2\n");
        backend.copy_done();
        backend.command_complete("COPY 2");
        backend.ready(b'I');
        answer_select_one(backend);
    });

    assert!(matches!(
        conn.query("COPY t TO STDOUT"),
        Err(Error::InvalidUsage(_))
    ));
    select_one(&mut conn);
    server.join().unwrap();
}

#[test]
fn fatal_error_breaks_the_connection() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.error("FATAL", "57P01", "terminating connection due to administrator command");
    });

    let err = conn.query_drop("SELECT pg_sleep(10)").unwrap_err();
    assert_eq!(err.sqlstate(), Some("57P01"));
    assert!(conn.is_broken());
    assert!(matches!(conn.query_drop("SELECT 1"), Err(Error::ConnectionBroken)));
    server.join().unwrap();
}

#[test]
fn unknown_message_type_is_a_protocol_error() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.send(b'?', &[]);
    });
    assert!(matches!(conn.query_drop("SELECT 1"), Err(Error::Protocol(_))));
    assert_eq!(conn.state(), ConnectionState::Failed);
    server.join().unwrap();
}

#[test]
fn short_length_field_is_a_protocol_error() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.send_raw(&[b'C', 0, 0, 0, 3]);
    });
    assert!(matches!(conn.query_drop("SELECT 1"), Err(Error::Protocol(_))));
    assert!(conn.is_broken());
    server.join().unwrap();
}

#[test]
fn close_sends_terminate() {
    let (conn, server) = connect(|backend| {
        assert_eq!(backend.recv().tag, b'X');
    });
    conn.close().unwrap();
    server.join().unwrap();
}

#[test]
fn registry_overrides_apply_to_results() {
    let (mut conn, server) = connect(|backend| {
        backend.expect(b'Q');
        backend.row_description(&[("n", oid::INT4, 0)]);
        backend.data_row(&[text("12")]);
        backend.command_complete("SELECT 1");
        backend.ready(b'I');
    });

    conn.registry_mut().unregister(oid::INT4);
    let result = conn.query("SELECT 12").unwrap();
    assert_eq!(result.rows[0].value(0), Some(&Value::Text("12".into())));
    server.join().unwrap();
}
