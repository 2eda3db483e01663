//! Core types for ILP packets
//!
//! All amounts are unsigned 64-bit integers in the smallest unit of the
//! asset, as carried on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ILP address (e.g. `g.connector.alice`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IlpAddress(String);

impl IlpAddress {
    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Allocation scheme (first segment, e.g. `g` or `test`)
    pub fn scheme(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }
}

impl fmt::Display for IlpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Asset denomination of an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Denomination {
    /// Asset code (e.g. `USD`, `XRP`)
    pub asset_code: String,

    /// Orders of magnitude between the base unit and the account unit
    pub asset_scale: u8,
}

impl Denomination {
    /// Create new denomination
    pub fn new(asset_code: impl Into<String>, asset_scale: u8) -> Self {
        Self {
            asset_code: asset_code.into(),
            asset_scale,
        }
    }
}

impl fmt::Display for Denomination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (scale {})", self.asset_code, self.asset_scale)
    }
}

/// Error family, taken from the first character of the code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
    /// F: final, retrying the same packet will not help
    Final,
    /// T: temporary, the packet may succeed later
    Temporary,
    /// R: relative, the packet expired or was otherwise mistimed
    Relative,
    /// Anything else
    Unknown,
}

/// Three character ILP error code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode([u8; 3]);

impl ErrorCode {
    /// Generic final error
    pub const F00_BAD_REQUEST: Self = Self(*b"F00");
    /// Final: invalid packet
    pub const F01_INVALID_PACKET: Self = Self(*b"F01");
    /// Final: unreachable
    pub const F02_UNREACHABLE: Self = Self(*b"F02");
    /// Final: invalid amount
    pub const F03_INVALID_AMOUNT: Self = Self(*b"F03");
    /// Final: receiver could not decrypt or interpret the data
    pub const F06_UNEXPECTED_PAYMENT: Self = Self(*b"F06");
    /// Final: amount larger than the hop allows
    pub const F08_AMOUNT_TOO_LARGE: Self = Self(*b"F08");
    /// Final: application error (STREAM receiver reject)
    pub const F99_APPLICATION_ERROR: Self = Self(*b"F99");
    /// Temporary: generic
    pub const T00_INTERNAL_ERROR: Self = Self(*b"T00");
    /// Temporary: peer unreachable
    pub const T01_PEER_UNREACHABLE: Self = Self(*b"T01");
    /// Temporary: insufficient liquidity
    pub const T04_INSUFFICIENT_LIQUIDITY: Self = Self(*b"T04");
    /// Relative: transfer timed out
    pub const R00_TRANSFER_TIMED_OUT: Self = Self(*b"R00");

    /// Create from raw bytes
    pub fn new(code: [u8; 3]) -> Self {
        Self(code)
    }

    /// Error family
    pub fn family(&self) -> ErrorFamily {
        match self.0[0] {
            b'F' => ErrorFamily::Final,
            b'T' => ErrorFamily::Temporary,
            b'R' => ErrorFamily::Relative,
            _ => ErrorFamily::Unknown,
        }
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// ILP Prepare packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlpPrepare {
    /// Destination address
    pub destination: IlpAddress,

    /// Amount in source units
    pub amount: u64,

    /// SHA-256 hash the fulfillment must match
    pub execution_condition: [u8; 32],

    /// Expiry of the prepared transfer
    pub expires_at: DateTime<Utc>,

    /// Encrypted STREAM packet
    pub data: Vec<u8>,
}

/// ILP Fulfill packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlpFulfill {
    /// Preimage of the execution condition
    pub fulfillment: [u8; 32],

    /// Encrypted STREAM reply
    pub data: Vec<u8>,
}

/// ILP Reject packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IlpReject {
    /// Error code
    pub code: ErrorCode,

    /// Address of the node that rejected
    pub triggered_by: Option<IlpAddress>,

    /// Human readable message
    pub message: String,

    /// Encrypted STREAM reply, or F08 metadata
    pub data: Vec<u8>,
}

impl IlpReject {
    /// Create a reject without data
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            triggered_by: None,
            message: message.into(),
            data: Vec::new(),
        }
    }

    /// Attach data
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Attach the address of the rejecting node
    pub fn triggered_by(mut self, address: IlpAddress) -> Self {
        self.triggered_by = Some(address);
        self
    }
}

/// Reply to a Prepare
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IlpReply {
    /// Money was delivered
    Fulfill(IlpFulfill),
    /// Packet was rejected somewhere on the path
    Reject(IlpReject),
}

impl IlpReply {
    /// Is this a fulfill
    pub fn is_fulfill(&self) -> bool {
        matches!(self, IlpReply::Fulfill(_))
    }

    /// Reject, if any
    pub fn as_reject(&self) -> Option<&IlpReject> {
        match self {
            IlpReply::Reject(reject) => Some(reject),
            IlpReply::Fulfill(_) => None,
        }
    }

    /// Data field of either variant
    pub fn data(&self) -> &[u8] {
        match self {
            IlpReply::Fulfill(fulfill) => &fulfill.data,
            IlpReply::Reject(reject) => &reject.data,
        }
    }
}

/// F08 metadata: what the rejecting hop received and what it allows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountTooLargeData {
    /// Amount the rejecting hop received (its units)
    pub received_amount: u64,

    /// Largest amount the rejecting hop accepts (its units)
    pub maximum_amount: u64,
}

impl AmountTooLargeData {
    /// Encoded length: two big-endian u64
    pub const LEN: usize = 16;

    /// Encode as reject data
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(Self::LEN);
        data.extend_from_slice(&self.received_amount.to_be_bytes());
        data.extend_from_slice(&self.maximum_amount.to_be_bytes());
        data
    }

    /// Decode from reject data; `None` unless exactly 16 bytes
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != Self::LEN {
            return None;
        }
        let (received, maximum) = data.split_at(8);
        Some(Self {
            received_amount: u64::from_be_bytes(received.try_into().ok()?),
            maximum_amount: u64::from_be_bytes(maximum.try_into().ok()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_family() {
        assert_eq!(ErrorCode::F08_AMOUNT_TOO_LARGE.family(), ErrorFamily::Final);
        assert_eq!(
            ErrorCode::T04_INSUFFICIENT_LIQUIDITY.family(),
            ErrorFamily::Temporary
        );
        assert_eq!(ErrorCode::R00_TRANSFER_TIMED_OUT.family(), ErrorFamily::Relative);
        assert_eq!(ErrorCode::new(*b"X12").family(), ErrorFamily::Unknown);
        assert_eq!(ErrorCode::F99_APPLICATION_ERROR.to_string(), "F99");
    }

    #[test]
    fn test_amount_too_large_data() {
        let data = AmountTooLargeData {
            received_amount: 1_000,
            maximum_amount: 250,
        };
        let bytes = data.to_bytes();
        assert_eq!(bytes.len(), AmountTooLargeData::LEN);
        assert_eq!(AmountTooLargeData::from_bytes(&bytes), Some(data));

        // Anything but 16 bytes is unusable metadata
        assert_eq!(AmountTooLargeData::from_bytes(&bytes[..15]), None);
        assert_eq!(AmountTooLargeData::from_bytes(&[]), None);
    }

    #[test]
    fn test_address_scheme() {
        let address = IlpAddress::new("g.us.bank.alice");
        assert_eq!(address.scheme(), "g");
        assert_eq!(address.to_string(), "g.us.bank.alice");
    }
}
