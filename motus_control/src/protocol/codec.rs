//! Chain frame packing.
//!
//! A frame is the concatenation of one datagram per device. Slot 0 is
//! shifted out first and reaches the device farthest from the controller,
//! so chain position `p` of `n` devices lives in slot `n - 1 - p` on both
//! TX and RX. Callers always work in chain-position order; the slot
//! reversal happens only here.

use heapless::Vec as HVec;

use motus_common::consts::MAX_AXES;
use motus_common::hal::registers::{DATAGRAM_LEN, slot_of};
use motus_common::motion::error::{CommunicationError, ConfigurationError};

use super::model::{Datagram, Reply, StatusFlags};

/// Largest frame the chain can carry.
pub const MAX_FRAME_LEN: usize = MAX_AXES * DATAGRAM_LEN;

/// Raw frame buffer.
pub type Frame = HVec<u8, MAX_FRAME_LEN>;

/// Per-device replies in chain-position order.
pub type Replies = HVec<Reply, MAX_AXES>;

/// Pack datagrams (indexed by chain position) into a bus frame.
pub fn encode_frame(datagrams: &[Datagram]) -> Result<Frame, ConfigurationError> {
    let n = datagrams.len();
    if n == 0 || n > MAX_AXES {
        return Err(ConfigurationError::Invalid {
            field: "chain_length",
            reason: "frame must carry 1..=MAX_AXES datagrams",
        });
    }
    let mut frame = Frame::new();
    // Resize cannot fail: n * DATAGRAM_LEN <= MAX_FRAME_LEN.
    let _ = frame.resize(n * DATAGRAM_LEN, 0);
    for (position, datagram) in datagrams.iter().enumerate() {
        let start = slot_of(position, n) * DATAGRAM_LEN;
        frame[start..start + DATAGRAM_LEN].copy_from_slice(&datagram.to_bytes());
    }
    Ok(frame)
}

/// Unpack a received frame into replies indexed by chain position.
///
/// A reserved status bit in any slot fails the whole frame.
pub fn decode_frame(rx: &[u8], chain_len: usize) -> Result<Replies, CommunicationError> {
    if chain_len == 0 || chain_len > MAX_AXES || rx.len() != chain_len * DATAGRAM_LEN {
        return Err(CommunicationError::Framing { slot: 0 });
    }
    // Wire order: the first corrupt slot on the bus is the one reported.
    for (slot, bytes) in rx.chunks_exact(DATAGRAM_LEN).enumerate() {
        if StatusFlags::decode(bytes[0]).is_none() {
            return Err(CommunicationError::Framing { slot: slot as u8 });
        }
    }
    let mut replies = Replies::new();
    for position in 0..chain_len {
        let slot = slot_of(position, chain_len);
        let bytes = &rx[slot * DATAGRAM_LEN..(slot + 1) * DATAGRAM_LEN];
        let status = StatusFlags::decode(bytes[0]).ok_or(CommunicationError::Framing { slot: slot as u8 })?;
        let data = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        // Capacity is chain_len <= MAX_AXES.
        let _ = replies.push(Reply { status, data });
    }
    Ok(replies)
}
