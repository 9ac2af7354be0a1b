//! MCPF fragment codec and reassembly.
//!
//! Messages larger than one datagram are split into numbered fragments, each
//! carried in its own datagram as
//!
//! ```text
//! MCPF:<msg_id>:<index>:<total>:<payload bytes>
//! ```
//!
//! The receiver keeps one pre-sized arena per in-flight message id and writes
//! each fragment at `index * max_payload`. Completion is detected once every
//! index has arrived, in any order.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant},
};

use thiserror::Error;

use hostwire_shared::time::get_timestamp_secs;

use crate::config::DEFAULT_MAX_PENDING_BYTES;

/// Prefix identifying a fragment datagram
pub const FRAGMENT_MARKER: &[u8] = b"MCPF:";

static MESSAGE_COUNTER: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Malformed fragment header: {0}")]
    MalformedHeader(&'static str),

    #[error("Fragment index {index} out of range for {total} fragments")]
    IndexOutOfRange { index: usize, total: usize },

    #[error("Message declares {total} fragments, limit is {max}")]
    TooManyFragments { total: usize, max: usize },

    #[error("Fragment payload of {size} bytes exceeds {max}")]
    OversizedPayload { size: usize, max: usize },

    #[error("Non-final fragment {index} carries {size} bytes, expected {expected}")]
    ShortFragment {
        index: usize,
        size: usize,
        expected: usize,
    },

    #[error("Fragment count {got} does not match {expected} for message {msg_id}")]
    TotalMismatch {
        msg_id: String,
        expected: usize,
        got: usize,
    },

    #[error("Duplicate fragment {index} for message {msg_id}")]
    DuplicateIndex { msg_id: String, index: usize },

    #[error("Message {msg_id} needs {needed} bytes, only {available} left for {pending} pending messages")]
    TooManyPending {
        msg_id: String,
        needed: usize,
        available: usize,
        pending: usize,
    },
}

/// A parsed fragment datagram borrowing from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fragment<'a> {
    pub msg_id: &'a str,
    pub index: usize,
    pub total: usize,
    pub payload: &'a [u8],
}

pub fn is_fragment(datagram: &[u8]) -> bool {
    datagram.starts_with(FRAGMENT_MARKER)
}

/// Fresh outbound message id: `<unix secs hex 8><counter hex 4>`
pub fn next_message_id() -> String {
    let counter = MESSAGE_COUNTER.fetch_add(1, Ordering::Relaxed) & 0xFFFF;
    format!("{:08x}{:04x}", get_timestamp_secs() as u32, counter)
}

/// Number of fragments a payload of `len` bytes needs; never zero
pub fn fragment_count(len: usize, max_payload: usize) -> usize {
    len.div_ceil(max_payload.max(1)).max(1)
}

/// Split `payload` into framed fragment datagrams
pub fn encode_fragments(msg_id: &str, payload: &[u8], max_payload: usize) -> Vec<Vec<u8>> {
    let max_payload = max_payload.max(1);
    let total = fragment_count(payload.len(), max_payload);

    (0..total)
        .map(|index| {
            let start = index * max_payload;
            let end = (start + max_payload).min(payload.len());
            let chunk = &payload[start..end];

            let header = format!("MCPF:{}:{}:{}:", msg_id, index, total);
            let mut datagram = Vec::with_capacity(header.len() + chunk.len());
            datagram.extend_from_slice(header.as_bytes());
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect()
}

/// Split off the next `:`-terminated header field
fn next_field<'a>(
    rest: &'a [u8],
    what: &'static str,
) -> Result<(&'a [u8], &'a [u8]), FragmentError> {
    let pos = rest
        .iter()
        .position(|b| *b == b':')
        .ok_or(FragmentError::MalformedHeader(what))?;
    Ok((&rest[..pos], &rest[pos + 1..]))
}

fn parse_number(field: &[u8], what: &'static str) -> Result<usize, FragmentError> {
    std::str::from_utf8(field)
        .ok()
        .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or(FragmentError::MalformedHeader(what))
}

/// Parse a fragment datagram; the payload may itself contain `:`
pub fn parse_fragment(datagram: &[u8]) -> Result<Fragment<'_>, FragmentError> {
    let rest = datagram
        .strip_prefix(FRAGMENT_MARKER)
        .ok_or(FragmentError::MalformedHeader("missing marker"))?;

    let (msg_id, rest) = next_field(rest, "missing message id")?;
    let (index, rest) = next_field(rest, "missing fragment index")?;
    let (total, payload) = next_field(rest, "missing fragment count")?;

    let msg_id = std::str::from_utf8(msg_id)
        .ok()
        .filter(|id| !id.is_empty())
        .ok_or(FragmentError::MalformedHeader("invalid message id"))?;
    let index = parse_number(index, "invalid fragment index")?;
    let total = parse_number(total, "invalid fragment count")?;

    if total == 0 {
        return Err(FragmentError::MalformedHeader("zero fragment count"));
    }
    if index >= total {
        return Err(FragmentError::IndexOutOfRange { index, total });
    }

    Ok(Fragment {
        msg_id,
        index,
        total,
        payload,
    })
}

/// In-progress reassembly for one message id
#[derive(Debug)]
struct Assembly {
    total: usize,
    received: usize,
    seen: Vec<bool>,
    buffer: Vec<u8>,
    /// Exact length, known once the final fragment has arrived
    final_len: Option<usize>,
    last_update: Instant,
}

impl Assembly {
    fn new(total: usize, max_payload: usize, now: Instant) -> Self {
        Self {
            total,
            received: 0,
            seen: vec![false; total],
            buffer: vec![0; total * max_payload],
            final_len: None,
            last_update: now,
        }
    }
}

/// Collects fragments per message id until each message is complete.
///
/// Every new message id reserves `total * max_payload` bytes against a shared
/// budget. A message that would overrun the budget is refused until earlier
/// ones complete or go stale.
#[derive(Debug)]
pub struct Reassembler {
    max_payload: usize,
    max_fragments: usize,
    max_pending_bytes: usize,
    pending_bytes: usize,
    assemblies: HashMap<String, Assembly>,
}

impl Reassembler {
    pub fn new(max_payload: usize, max_fragments: usize) -> Self {
        Self {
            max_payload: max_payload.max(1),
            max_fragments: max_fragments.max(1),
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            pending_bytes: 0,
            assemblies: HashMap::new(),
        }
    }

    /// Cap the bytes reserved by incomplete messages
    pub fn with_pending_budget(mut self, max_pending_bytes: usize) -> Self {
        self.max_pending_bytes = max_pending_bytes;
        self
    }

    /// Number of messages still waiting for fragments
    pub fn pending(&self) -> usize {
        self.assemblies.len()
    }

    /// Bytes currently reserved by incomplete messages
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    /// Apply one fragment; returns the full message once its last fragment lands
    pub fn accept(
        &mut self,
        fragment: Fragment<'_>,
        now: Instant,
    ) -> Result<Option<Vec<u8>>, FragmentError> {
        let Fragment {
            msg_id,
            index,
            total,
            payload,
        } = fragment;

        if index >= total {
            return Err(FragmentError::IndexOutOfRange { index, total });
        }
        if total > self.max_fragments {
            return Err(FragmentError::TooManyFragments {
                total,
                max: self.max_fragments,
            });
        }
        if payload.len() > self.max_payload {
            return Err(FragmentError::OversizedPayload {
                size: payload.len(),
                max: self.max_payload,
            });
        }
        let is_final = index == total - 1;
        if !is_final && payload.len() != self.max_payload {
            return Err(FragmentError::ShortFragment {
                index,
                size: payload.len(),
                expected: self.max_payload,
            });
        }

        let max_payload = self.max_payload;
        let pending = self.assemblies.len();
        let assembly = match self.assemblies.entry(msg_id.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let needed = total * max_payload;
                let available = self.max_pending_bytes.saturating_sub(self.pending_bytes);
                if needed > available {
                    return Err(FragmentError::TooManyPending {
                        msg_id: msg_id.to_string(),
                        needed,
                        available,
                        pending,
                    });
                }
                self.pending_bytes += needed;
                entry.insert(Assembly::new(total, max_payload, now))
            }
        };

        if assembly.total != total {
            return Err(FragmentError::TotalMismatch {
                msg_id: msg_id.to_string(),
                expected: assembly.total,
                got: total,
            });
        }
        if assembly.seen[index] {
            return Err(FragmentError::DuplicateIndex {
                msg_id: msg_id.to_string(),
                index,
            });
        }

        let offset = index * max_payload;
        let end = offset + payload.len();
        if end > assembly.buffer.len() {
            return Err(FragmentError::OversizedPayload {
                size: payload.len(),
                max: assembly.buffer.len().saturating_sub(offset),
            });
        }
        assembly.buffer[offset..end].copy_from_slice(payload);
        assembly.seen[index] = true;
        assembly.received += 1;
        assembly.last_update = now;
        if is_final {
            assembly.final_len = Some(end);
        }

        if assembly.received < assembly.total {
            return Ok(None);
        }

        let Some(mut complete) = self.assemblies.remove(msg_id) else {
            return Ok(None);
        };
        self.pending_bytes = self.pending_bytes.saturating_sub(complete.buffer.len());
        let len = complete.final_len.unwrap_or(complete.buffer.len());
        complete.buffer.truncate(len);
        Ok(Some(complete.buffer))
    }

    /// Drop assemblies idle for longer than `timeout`; returns how many were dropped
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) -> usize {
        let before = self.assemblies.len();
        let mut released = 0;
        self.assemblies.retain(|_, a| {
            let keep = now.saturating_duration_since(a.last_update) <= timeout;
            if !keep {
                released += a.buffer.len();
            }
            keep
        });
        self.pending_bytes = self.pending_bytes.saturating_sub(released);
        let evicted = before - self.assemblies.len();

        if evicted > 0 {
            tracing::warn!(
                "Evicted {} stale fragment assembl{} idle longer than {:?}",
                evicted,
                if evicted == 1 { "y" } else { "ies" },
                timeout
            );
        }
        evicted
    }
}
