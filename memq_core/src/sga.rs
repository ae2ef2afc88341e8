use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// One contiguous buffer of a scatter-gather array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub buf: Vec<u8>,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl From<Vec<u8>> for Segment {
    fn from(buf: Vec<u8>) -> Self {
        Segment { buf }
    }
}

impl From<&[u8]> for Segment {
    fn from(buf: &[u8]) -> Self {
        Segment { buf: buf.to_vec() }
    }
}

/// The unit of data moved through a queue.
///
/// The queue never looks inside; it only moves whole arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatterGatherArray {
    pub segments: Vec<Segment>,
    /// Peer address for network transports. Memory queues leave it as is.
    pub addr: Option<SocketAddr>,
}

impl ScatterGatherArray {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            addr: None,
        }
    }

    pub fn single(buf: impl Into<Segment>) -> Self {
        Self::new(vec![buf.into()])
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Sum of all segment lengths in bytes.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Copies every segment, in order, into one buffer.
    pub fn flatten(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        for segment in &self.segments {
            out.extend_from_slice(&segment.buf);
        }
        out
    }
}
