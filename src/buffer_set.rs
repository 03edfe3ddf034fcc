//! Buffers shared between the I/O driver and the state machines.

/// Buffer set for state machine operations.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read (without type byte and length)
    pub read_buffer: Vec<u8>,
    /// Outgoing messages, flushed by the driver
    pub write_buffer: Vec<u8>,
    /// Copy of the current RowDescription payload, parsed again for each DataRow
    pub column_buffer: Vec<u8>,
    /// Type byte of the last message read, or the SSL response byte
    pub type_byte: u8,
}

impl BufferSet {
    /// Create a new buffer set.
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            column_buffer: Vec::with_capacity(512),
            type_byte: 0,
        }
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
