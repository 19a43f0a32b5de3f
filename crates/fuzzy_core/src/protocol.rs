//! One-command-per-connection binary protocol.
//!
//! Command (72 bytes):
//!   opcode[1]  = 0 check, 1 write, 2 delete
//!   pad[3]
//!   block_size[4] (LE)
//!   hash[64]
//!
//! Reply: `OK\r\n` or `ERR\r\n`, then the connection closes.

use crate::consts::{CMD_OFF_BLOCK, CMD_OFF_HASH, CMD_SIZE, HASH_LEN, REPLY_ERR, REPLY_OK};
use crate::digest::Digest;
use crate::index::FuzzyStore;
use crate::similarity::Similarity;
use byteorder::{ByteOrder, LittleEndian as LE};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Check,
    Write,
    Delete,
    Unknown(u8),
}

impl Opcode {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Opcode::Check,
            1 => Opcode::Write,
            2 => Opcode::Delete,
            other => Opcode::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Opcode::Check => 0,
            Opcode::Write => 1,
            Opcode::Delete => 2,
            Opcode::Unknown(b) => b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub op: Opcode,
    pub digest: Digest,
}

impl Command {
    pub fn new(op: Opcode, digest: Digest) -> Self {
        Self { op, digest }
    }

    pub fn decode(buf: &[u8; CMD_SIZE]) -> Self {
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(&buf[CMD_OFF_HASH..]);
        Self {
            op: Opcode::from_byte(buf[0]),
            digest: Digest::new(LE::read_u32(&buf[CMD_OFF_BLOCK..]), hash),
        }
    }

    pub fn encode(&self) -> [u8; CMD_SIZE] {
        let mut out = [0u8; CMD_SIZE];
        out[0] = self.op.to_byte();
        LE::write_u32(&mut out[CMD_OFF_BLOCK..CMD_OFF_HASH], self.digest.block_size);
        out[CMD_OFF_HASH..].copy_from_slice(&self.digest.hash);
        out
    }

    /// Route to the store. Unknown opcodes fail without touching it.
    pub fn execute<S: Similarity>(&self, store: &mut FuzzyStore<S>) -> Reply {
        let ok = match self.op {
            Opcode::Check => store.check(&self.digest),
            Opcode::Write => store.write(&self.digest),
            Opcode::Delete => store.delete(&self.digest),
            Opcode::Unknown(b) => {
                debug!(opcode = b, "unknown fuzzy command");
                false
            }
        };
        Reply::from(ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ok,
    Err,
}

impl Reply {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Reply::Ok => REPLY_OK,
            Reply::Err => REPLY_ERR,
        }
    }

    pub fn parse(line: &[u8]) -> Option<Self> {
        match line {
            REPLY_OK => Some(Reply::Ok),
            REPLY_ERR => Some(Reply::Err),
            _ => None,
        }
    }
}

impl From<bool> for Reply {
    fn from(ok: bool) -> Self {
        if ok { Reply::Ok } else { Reply::Err }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingCommand,
    Dispatching,
    Closed,
}

/// Per-connection receive state. Transport agnostic: the caller reads into
/// `recv_buf()` and reports what happened.
#[derive(Debug)]
pub struct Session {
    buf: [u8; CMD_SIZE],
    pos: usize,
    state: SessionState,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self { buf: [0u8; CMD_SIZE], pos: 0, state: SessionState::AwaitingCommand }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn received(&self) -> usize {
        self.pos
    }

    /// Unfilled tail of the command buffer; empty unless awaiting a command.
    pub fn recv_buf(&mut self) -> &mut [u8] {
        match self.state {
            SessionState::AwaitingCommand => &mut self.buf[self.pos..],
            _ => &mut self.buf[CMD_SIZE..],
        }
    }

    /// `n` bytes landed in `recv_buf()`. Zero means EOF.
    pub fn on_read(&mut self, n: usize) -> SessionState {
        if self.state != SessionState::AwaitingCommand {
            return self.state;
        }
        if n == 0 {
            debug!(received = self.pos, "peer closed before a full command");
            self.state = SessionState::Closed;
            return self.state;
        }
        self.pos = (self.pos + n).min(CMD_SIZE);
        if self.pos == CMD_SIZE {
            self.state = SessionState::Dispatching;
        }
        self.state
    }

    pub fn on_error(&mut self) -> SessionState {
        self.state = SessionState::Closed;
        self.state
    }

    pub fn on_timeout(&mut self) -> SessionState {
        if self.state == SessionState::AwaitingCommand {
            debug!(received = self.pos, "session idle timeout");
        }
        self.state = SessionState::Closed;
        self.state
    }

    /// Execute the assembled command and close. `None` unless dispatching.
    pub fn dispatch<S: Similarity>(&mut self, store: &mut FuzzyStore<S>) -> Option<Reply> {
        if self.state != SessionState::Dispatching {
            return None;
        }
        let reply = Command::decode(&self.buf).execute(store);
        self.state = SessionState::Closed;
        Some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(op: Opcode, bs: u32, s: &str) -> [u8; CMD_SIZE] {
        Command::new(op, Digest::from_pattern(bs, s.as_bytes()).unwrap()).encode()
    }

    fn feed(sess: &mut Session, bytes: &[u8]) -> SessionState {
        let dst = sess.recv_buf();
        let n = bytes.len().min(dst.len());
        dst[..n].copy_from_slice(&bytes[..n]);
        sess.on_read(n)
    }

    #[test]
    fn command_layout() {
        let raw = cmd(Opcode::Delete, 0x0A0B_0C0D, "xyz");
        assert_eq!(raw[0], 2);
        assert_eq!(&raw[1..4], &[0, 0, 0]);
        assert_eq!(&raw[4..8], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(&raw[8..11], b"xyz");
        let back = Command::decode(&raw);
        assert_eq!(back.op, Opcode::Delete);
        assert_eq!(back.digest.block_size, 0x0A0B_0C0D);
    }

    #[test]
    fn partial_reads_accumulate() {
        let raw = cmd(Opcode::Write, 3, "abcdef");
        let mut sess = Session::new();
        assert_eq!(feed(&mut sess, &raw[..10]), SessionState::AwaitingCommand);
        assert_eq!(sess.received(), 10);
        assert_eq!(feed(&mut sess, &raw[10..50]), SessionState::AwaitingCommand);
        assert_eq!(feed(&mut sess, &raw[50..]), SessionState::Dispatching);

        let mut store = FuzzyStore::new(1_000, 0.001);
        assert_eq!(sess.dispatch(&mut store), Some(Reply::Ok));
        assert_eq!(sess.state(), SessionState::Closed);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eof_before_full_command_closes_silently() {
        let raw = cmd(Opcode::Write, 3, "abcdef");
        let mut sess = Session::new();
        feed(&mut sess, &raw[..20]);
        assert_eq!(sess.on_read(0), SessionState::Closed);
        let mut store = FuzzyStore::new(1_000, 0.001);
        assert_eq!(sess.dispatch(&mut store), None);
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_opcode_is_err_and_untouched() {
        let raw = cmd(Opcode::Unknown(9), 3, "abcdef");
        let mut sess = Session::new();
        feed(&mut sess, &raw);
        let mut store = FuzzyStore::new(1_000, 0.001);
        assert_eq!(sess.dispatch(&mut store), Some(Reply::Err));
        assert!(store.is_empty());
        assert_eq!(store.pending_mods(), 0);
    }

    #[test]
    fn closed_is_terminal() {
        let mut sess = Session::new();
        sess.on_timeout();
        assert!(sess.recv_buf().is_empty());
        assert_eq!(sess.on_read(5), SessionState::Closed);
        sess.on_error();
        assert_eq!(sess.state(), SessionState::Closed);
    }

    #[test]
    fn write_delete_check_sequence() {
        let mut store = FuzzyStore::new(1_000, 0.001);
        let run = |store: &mut FuzzyStore, raw: [u8; CMD_SIZE]| {
            let mut sess = Session::new();
            feed(&mut sess, &raw);
            sess.dispatch(store).unwrap()
        };
        assert_eq!(run(&mut store, cmd(Opcode::Write, 6, "spam")), Reply::Ok);
        assert_eq!(run(&mut store, cmd(Opcode::Write, 6, "spam")), Reply::Err);
        assert_eq!(run(&mut store, cmd(Opcode::Check, 6, "spam")), Reply::Ok);
        assert_eq!(run(&mut store, cmd(Opcode::Delete, 6, "spam")), Reply::Ok);
        assert_eq!(run(&mut store, cmd(Opcode::Check, 6, "spam")), Reply::Err);
    }

    #[test]
    fn reply_bytes() {
        assert_eq!(Reply::Ok.as_bytes(), b"OK\r\n");
        assert_eq!(Reply::Err.as_bytes(), b"ERR\r\n");
        assert_eq!(Reply::parse(b"ERR\r\n"), Some(Reply::Err));
        assert_eq!(Reply::parse(b"MAYBE\r\n"), None);
    }
}
