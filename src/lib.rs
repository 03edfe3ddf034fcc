//! A blocking PostgreSQL wire-protocol (v3) client engine.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Zero-copy parsing**: Message payloads are parsed directly from the read buffer
//! - **Authentication**: cleartext, MD5 and SCRAM-SHA-256
//! - **Simple and extended query protocols**, COPY in both directions
//! - **Placeholder rewriting**: qmark, numeric, named, format and pyformat styles
//! - **Pluggable codecs**: an OID-keyed [`TypeRegistry`] decides how values travel
//!
//! # Example
//!
//! ```no_run
//! use pgwire_engine::sync::Conn;
//! use pgwire_engine::{Opts, ParamStyle, Value};
//!
//! fn main() -> pgwire_engine::Result<()> {
//!     let opts = Opts {
//!         host: "localhost".into(),
//!         user: "postgres".into(),
//!         database: Some("mydb".into()),
//!         password: Some("secret".into()),
//!         autocommit: true,
//!         paramstyle: ParamStyle::Qmark,
//!         ..Default::default()
//!     };
//!
//!     let mut conn = Conn::new(opts)?;
//!
//!     let result = conn.execute("SELECT ?::int4 + 1 AS answer", vec![Value::Int4(41)])?;
//!     let rows: Vec<(i32,)> = result.collect()?;
//!     assert_eq!(rows, [(42,)]);
//!
//!     conn.close()?;
//!     Ok(())
//! }
//! ```

pub mod buffer_set;
pub mod error;
pub mod handler;
pub mod opts;
pub mod protocol;
pub mod rewrite;
pub mod row;
pub mod state;
pub mod types;

#[cfg(feature = "sync")]
pub mod sync;

pub use buffer_set::BufferSet;
pub use error::{DatabaseErrorClass, Error, ErrorKind, Result, ServerError};
pub use handler::{CollectHandler, DropHandler, QueryResult, ResultHandler};
pub use opts::{Opts, SslMode};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use rewrite::{ParamStyle, Params, rewrite};
pub use row::{FromRow, Row};
pub use state::{ColumnInfo, ConnectionState, Notification, Portal, PreparedStatement};
pub use types::{FromValue, TypeCodec, TypeRegistry, Value};
