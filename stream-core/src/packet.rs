//! STREAM packet and frames
//!
//! The STREAM packet travels encrypted inside the data field of every ILP
//! packet. The sender's packet says how much the receiver should get at
//! least; the receiver's reply says how much actually arrived.

use crate::types::Denomination;
use serde::{Deserialize, Serialize};

/// STREAM protocol version
pub const STREAM_VERSION: u8 = 1;

/// Which ILP packet a STREAM packet rides in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum IlpPacketType {
    /// Sender → receiver
    Prepare = 12,
    /// Receiver accepted
    Fulfill = 13,
    /// Receiver (or a connector) refused
    Reject = 14,
}

/// Reason carried by close frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CloseCode {
    /// Normal close
    NoError = 0x01,
    /// Endpoint hit an internal error
    InternalError = 0x02,
    /// Endpoint cannot accept more data or money right now
    EndpointBusy = 0x03,
    /// Flow control limits exceeded
    FlowControlError = 0x04,
    /// Stream id not acceptable
    StreamIdError = 0x05,
    /// Stream in the wrong state
    StreamStateError = 0x06,
    /// Frame could not be parsed
    FrameFormatError = 0x07,
    /// Peer violated the protocol
    ProtocolViolation = 0x08,
    /// Application level close
    ApplicationError = 0x09,
}

/// Typed sub-message inside a STREAM packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Close the whole connection
    ConnectionClose {
        /// Close reason
        code: CloseCode,
        /// Free text
        message: String,
    },

    /// Tell the peer where to send replies
    ConnectionNewAddress {
        /// Sender's ILP address
        source_address: String,
    },

    /// Announce the sending endpoint's asset
    ConnectionAssetDetails {
        /// Asset code and scale
        denomination: Denomination,
    },

    /// Money on a stream, split by shares
    StreamMoney {
        /// Stream id
        stream_id: u64,
        /// Relative share of the packet amount
        shares: u64,
    },

    /// Receive limit advertised by the peer
    StreamMaxMoney {
        /// Stream id
        stream_id: u64,
        /// Maximum the peer will accept in total
        receive_max: u64,
        /// Total the peer received so far
        total_received: u64,
    },

    /// Close a single stream
    StreamClose {
        /// Stream id
        stream_id: u64,
        /// Close reason
        code: CloseCode,
        /// Free text
        message: String,
    },
}

/// Decrypted STREAM packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPacket {
    /// Protocol version
    pub version: u8,

    /// ILP packet type this rides in
    pub ilp_packet_type: IlpPacketType,

    /// Sequence number, unique per connection and direction
    pub sequence: u64,

    /// In a Prepare: minimum the receiver must credit.
    /// In a reply: what the receiver actually got.
    pub prepare_amount: u64,

    /// Frames in order
    pub frames: Vec<Frame>,
}

impl StreamPacket {
    /// Create new packet
    pub fn new(
        ilp_packet_type: IlpPacketType,
        sequence: u64,
        prepare_amount: u64,
        frames: Vec<Frame>,
    ) -> Self {
        Self {
            version: STREAM_VERSION,
            ilp_packet_type,
            sequence,
            prepare_amount,
            frames,
        }
    }

    /// Does the packet close the connection or any stream
    pub fn has_close_frame(&self) -> bool {
        self.frames.iter().any(|frame| {
            matches!(
                frame,
                Frame::ConnectionClose { .. } | Frame::StreamClose { .. }
            )
        })
    }

    /// Asset details announced in this packet, if any
    pub fn asset_details(&self) -> Option<&Denomination> {
        self.frames.iter().find_map(|frame| match frame {
            Frame::ConnectionAssetDetails { denomination } => Some(denomination),
            _ => None,
        })
    }

    /// Receive limit advertised in this packet, if any
    pub fn receive_max(&self) -> Option<u64> {
        self.frames.iter().find_map(|frame| match frame {
            Frame::StreamMaxMoney { receive_max, .. } => Some(*receive_max),
            _ => None,
        })
    }
}
