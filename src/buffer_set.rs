//! Buffers shared between a driver and the state machines it runs.

/// Buffer set for state machine operations.
///
/// Drivers read each backend message into `read_buffer` (payload only) and
/// record its tag in `type_byte`; machines append outgoing frames to
/// `write_buffer`.
#[derive(Debug)]
pub struct BufferSet {
    /// Payload of the last message read
    pub read_buffer: Vec<u8>,
    /// Frames waiting to be written
    pub write_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }

    /// Load a message, as a driver does after reading one off the wire.
    pub fn set_message(&mut self, type_byte: u8, payload: &[u8]) {
        self.type_byte = type_byte;
        self.read_buffer.clear();
        self.read_buffer.extend_from_slice(payload);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
