use std::iter;

use itertools::Itertools;

use crate::{NetOpcode, PacketData, OPCODE_LEN};

/// Several packets in one buffer, each one still goes out in its own envelope
#[derive(Debug, Default, Clone)]
pub struct PacketBuf {
    buf: Vec<u8>,
    ix: Vec<usize>,
}

impl PacketBuf {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            ix: Vec::new(),
        }
    }

    /// Appends a packet built from the opcode and its fields
    pub fn push(&mut self, op: impl NetOpcode, payload: &[u8]) {
        let op: u32 = op.into();
        self.ix.push(self.buf.len());
        self.buf.reserve(OPCODE_LEN + payload.len());
        self.buf.extend_from_slice(&op.to_be_bytes());
        self.buf.extend_from_slice(payload);
    }

    pub fn push_packet(&mut self, pkt: &PacketData) {
        self.ix.push(self.buf.len());
        self.buf.extend_from_slice(pkt.as_slice());
    }

    /// Iterator over the buffered packets, opcode included
    pub fn packets(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.ix
            .iter()
            .copied()
            .chain(iter::once(self.buf.len()))
            .tuple_windows()
            .map(|(l, r)| &self.buf[l..r])
    }

    pub fn len(&self) -> usize {
        self.ix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ix.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.ix.clear();
    }
}
