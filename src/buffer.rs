//! Command and data buffers of a controller
//!
//! Both buffers are reused across commands. Their capacity only ever grows,
//! so a chunked data transfer never reallocates halfway through; the logical
//! sizes (CDB length, transfer window) are tracked separately.

/// Minimum number of command bytes, enough for any 16-byte CDB
pub const MIN_COMMAND_SIZE: usize = 16;

/// Command descriptor and data payload buffers plus transfer cursors
#[derive(Debug, Clone)]
pub struct TransferBuffer {
    cmd: Vec<u8>,
    cmd_len: usize,
    data: Vec<u8>,
    offset: usize,
    length: u32,
    length_valid: bool,
    /// Blocks still to be transferred after the current window
    blocks: u32,
    /// Logical block the next chunk starts at
    next_block: u64,
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferBuffer {
    pub fn new() -> Self {
        TransferBuffer {
            cmd: vec![0; MIN_COMMAND_SIZE],
            cmd_len: 0,
            data: Vec::new(),
            offset: 0,
            length: 0,
            length_valid: false,
            blocks: 0,
            next_block: 0,
        }
    }

    /// Ensure the command buffer holds at least `min_size` bytes
    pub fn allocate_command(&mut self, min_size: usize) {
        if self.cmd.len() < min_size {
            self.cmd.resize(min_size, 0);
        }
    }

    /// Ensure the data buffer holds at least `min_size` bytes
    pub fn allocate_data(&mut self, min_size: usize) {
        if self.data.len() < min_size {
            self.data.resize(min_size, 0);
        }
    }

    /// The whole command buffer; bytes past the current CDB are stale
    pub fn cmd(&self) -> &[u8] {
        &self.cmd
    }

    pub fn cmd_mut(&mut self) -> &mut [u8] {
        &mut self.cmd
    }

    /// The CDB of the current command
    pub fn cdb(&self) -> &[u8] {
        &self.cmd[..self.cmd_len]
    }

    /// Store a complete CDB
    pub fn set_command(&mut self, cdb: &[u8]) {
        self.allocate_command(cdb.len());
        self.cmd[..cdb.len()].copy_from_slice(cdb);
        self.cmd_len = cdb.len();
    }

    pub fn set_command_length(&mut self, len: usize) {
        self.allocate_command(len);
        self.cmd_len = len;
    }

    pub fn command_length(&self) -> usize {
        self.cmd_len
    }

    /// The whole data buffer
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn set_length(&mut self, length: u32) {
        self.length = length;
        self.length_valid = true;
    }

    /// Bytes left in the current window; 0 until a length has been set
    pub fn get_length(&self) -> u32 {
        self.length
    }

    pub fn has_valid_length(&self) -> bool {
        self.length_valid
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn reset_offset(&mut self) {
        self.offset = 0;
    }

    /// Consume the window that was just transferred.
    ///
    /// The offset moves past the window and the length drops to 0. Whether
    /// another window follows is up to the command that owns the transfer.
    pub fn update_offset_and_length(&mut self) {
        self.offset += self.length as usize;
        self.length = 0;
    }

    /// Bytes still to be transferred in the current window
    pub fn window(&self) -> &[u8] {
        let end = (self.offset + self.length as usize).min(self.data.len());
        &self.data[self.offset.min(end)..end]
    }

    pub fn window_mut(&mut self) -> &mut [u8] {
        let end = (self.offset + self.length as usize).min(self.data.len());
        let start = self.offset.min(end);
        &mut self.data[start..end]
    }

    /// Bytes already transferred in the current chunk
    pub fn transferred(&self) -> &[u8] {
        &self.data[..self.offset.min(self.data.len())]
    }

    /// Load `bytes` as the next window to send, starting at offset 0
    pub fn load(&mut self, bytes: &[u8]) {
        self.allocate_data(bytes.len());
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.reset_offset();
        self.set_length(bytes.len() as u32);
    }

    /// Open an empty window of `length` bytes to receive into
    pub fn expect(&mut self, length: usize) {
        self.allocate_data(length);
        self.reset_offset();
        self.set_length(length as u32);
    }

    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    pub fn next_block(&self) -> u64 {
        self.next_block
    }

    /// Record the block-level progress of a chunked transfer
    pub fn set_block_progress(&mut self, next_block: u64, blocks: u32) {
        self.next_block = next_block;
        self.blocks = blocks;
    }

    /// Forget the current transaction. Capacities are kept.
    pub fn clear(&mut self) {
        self.cmd_len = 0;
        self.offset = 0;
        self.length = 0;
        self.length_valid = false;
        self.blocks = 0;
        self.next_block = 0;
    }

    pub fn command_capacity(&self) -> usize {
        self.cmd.len()
    }

    pub fn data_capacity(&self) -> usize {
        self.data.len()
    }
}
