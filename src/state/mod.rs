//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! They produce `Action` values that tell the caller what to do next.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

pub use action::{Action, AsyncMessage, Notification, Resume};
pub use connection::{ConnectionState, StartupStateMachine};
pub use extended::{ColumnInfo, ExtendedQueryStateMachine, Portal, PreparedStatement};
pub use simple_query::SimpleQueryStateMachine;

use crate::buffer_set::BufferSet;
use crate::error::Result;
use crate::protocol::types::TransactionStatus;

/// A protocol state machine driven by an I/O loop.
///
/// The first call happens before anything is read, so the machine can queue
/// its opening messages. Every later call sees the message the driver just
/// read in `buffer_set`. An `Err` is fatal for the connection.
pub trait StateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status from the last ReadyForQuery, if one was seen.
    fn transaction_status(&self) -> Option<TransactionStatus>;
}
