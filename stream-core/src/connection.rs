//! STREAM connection
//!
//! One connection per payment attempt. All in-flight packets share it through
//! an `Arc`, so every mutation is atomic:
//! - the sequence counter is a fetch-add, never handing out a number twice
//! - the state moves forward only, by compare-and-swap

use crate::{crypto::SharedSecret, types::IlpAddress, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use uuid::Uuid;

/// Highest sequence number that may be used with one shared secret.
///
/// AES-GCM with random 96-bit nonces stays within safe collision bounds up
/// to 2^31 messages per key.
pub const MAX_SAFE_SEQUENCE: u64 = (1 << 31) - 1;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, nothing sent yet
    Available = 0,
    /// Packets are flowing
    Open = 1,
    /// No further packets may be sent
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Available,
            1 => ConnectionState::Open,
            _ => ConnectionState::Closed,
        }
    }

    fn next(self) -> Self {
        match self {
            ConnectionState::Available => ConnectionState::Open,
            ConnectionState::Open | ConnectionState::Closed => ConnectionState::Closed,
        }
    }
}

/// Sender side of a STREAM connection
#[derive(Debug)]
pub struct StreamConnection {
    id: Uuid,
    source_address: IlpAddress,
    destination_address: IlpAddress,
    shared_secret: SharedSecret,
    sequence: AtomicU64,
    state: AtomicU8,
    created_at: DateTime<Utc>,
}

impl StreamConnection {
    /// Create new connection
    pub fn new(
        source_address: IlpAddress,
        destination_address: IlpAddress,
        shared_secret: SharedSecret,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_address,
            destination_address,
            shared_secret,
            sequence: AtomicU64::new(0),
            state: AtomicU8::new(ConnectionState::Available as u8),
            created_at: Utc::now(),
        }
    }

    /// Resume numbering after `last_sequence` packets were already sent
    pub fn starting_after(self, last_sequence: u64) -> Self {
        self.sequence.store(last_sequence, Ordering::SeqCst);
        self
    }

    /// Connection id
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Our address
    pub fn source_address(&self) -> &IlpAddress {
        &self.source_address
    }

    /// Receiver address
    pub fn destination_address(&self) -> &IlpAddress {
        &self.destination_address
    }

    /// Shared secret
    pub fn shared_secret(&self) -> &SharedSecret {
        &self.shared_secret
    }

    /// Creation time
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Is the connection closed
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Last sequence number handed out (0 before the first packet)
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Next sequence number; the first call returns 1
    pub fn next_sequence(&self) -> Result<u64> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst).saturating_add(1))
    }

    /// Advance one step: Available → Open → Closed. Idempotent once closed.
    pub fn transition_state(&self) -> ConnectionState {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            let next = ConnectionState::from_u8(current).next();
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    if next != ConnectionState::from_u8(current) {
                        tracing::debug!("Connection {} is now {:?}", self.id, next);
                    }
                    return next;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Jump straight to Closed
    pub fn close(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::SeqCst);
        if previous != ConnectionState::Closed as u8 {
            tracing::info!("Connection {} closed", self.id);
        }
    }

    /// May `sequence` be used under this connection's secret
    pub fn sequence_is_safe_for_single_shared_secret(&self, sequence: u64) -> bool {
        !self.is_closed() && sequence <= MAX_SAFE_SEQUENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn connection() -> StreamConnection {
        StreamConnection::new(
            IlpAddress::new("test.sender"),
            IlpAddress::new("test.receiver"),
            SharedSecret::generate(),
        )
    }

    #[test]
    fn test_sequence_starts_at_one() {
        let conn = connection();
        assert_eq!(conn.current_sequence(), 0);
        assert_eq!(conn.next_sequence().unwrap(), 1);
        assert_eq!(conn.next_sequence().unwrap(), 2);
    }

    #[test]
    fn test_concurrent_sequences_are_unique() {
        let conn = Arc::new(connection());
        let threads = 8;
        let per_thread = 500;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| conn.next_sequence().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for sequence in handle.join().unwrap() {
                assert!(seen.insert(sequence), "duplicate sequence {}", sequence);
            }
        }

        let total = (threads * per_thread) as u64;
        assert_eq!(seen, (1..=total).collect::<HashSet<_>>());
        assert_eq!(conn.next_sequence().unwrap(), total + 1);
    }

    #[test]
    fn test_state_only_moves_forward() {
        let conn = connection();
        assert_eq!(conn.state(), ConnectionState::Available);
        assert_eq!(conn.transition_state(), ConnectionState::Open);
        assert_eq!(conn.transition_state(), ConnectionState::Closed);
        assert_eq!(conn.transition_state(), ConnectionState::Closed);
        assert!(matches!(conn.next_sequence(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_close_from_available() {
        let conn = connection();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_safe_sequence_ceiling() {
        let conn = connection();
        assert!(conn.sequence_is_safe_for_single_shared_secret(1));
        assert!(conn.sequence_is_safe_for_single_shared_secret(MAX_SAFE_SEQUENCE));
        assert!(!conn.sequence_is_safe_for_single_shared_secret(MAX_SAFE_SEQUENCE + 1));

        conn.close();
        assert!(!conn.sequence_is_safe_for_single_shared_secret(1));
    }

    #[test]
    fn test_starting_after() {
        let conn = connection().starting_after(MAX_SAFE_SEQUENCE);
        let next = conn.next_sequence().unwrap();
        assert_eq!(next, MAX_SAFE_SEQUENCE + 1);
        assert!(!conn.sequence_is_safe_for_single_shared_secret(next));
    }
}
