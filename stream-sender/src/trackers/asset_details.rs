//! Denominations of both ends of the connection

use parking_lot::Mutex;
use stream_core::Denomination;

use crate::error::PaymentError;

#[derive(Debug, Default)]
struct AssetState {
    destination: Option<Denomination>,
    conflict: bool,
    remote_replied: bool,
}

/// Source asset, and what the receiver says its asset is
#[derive(Debug)]
pub struct AssetDetailsTracker {
    source: Denomination,
    state: Mutex<AssetState>,
}

impl AssetDetailsTracker {
    /// Create new tracker; `expected_destination` comes from the payment request
    pub fn new(source: Denomination, expected_destination: Option<Denomination>) -> Self {
        Self {
            source,
            state: Mutex::new(AssetState {
                destination: expected_destination,
                ..AssetState::default()
            }),
        }
    }

    /// Our asset
    pub fn source(&self) -> &Denomination {
        &self.source
    }

    /// Receiver asset, if known
    pub fn destination(&self) -> Option<Denomination> {
        self.state.lock().destination.clone()
    }

    /// Receiver announced its asset
    pub fn record_remote(&self, announced: &Denomination) -> Result<(), PaymentError> {
        let mut state = self.state.lock();
        match &state.destination {
            Some(known) if known != announced => {
                if !state.conflict {
                    tracing::warn!(
                        "Receiver announced {} but destination asset is {}",
                        announced,
                        known
                    );
                }
                state.conflict = true;
                Err(PaymentError::DestinationAssetConflict)
            }
            Some(_) => Ok(()),
            None => {
                tracing::info!("Destination asset is {}", announced);
                state.destination = Some(announced.clone());
                Ok(())
            }
        }
    }

    /// Sticky: two different destination assets were seen
    pub fn has_conflict(&self) -> bool {
        self.state.lock().conflict
    }

    /// An authentic reply arrived
    pub fn mark_remote_replied(&self) {
        self.state.lock().remote_replied = true;
    }

    /// Has the receiver replied authentically yet
    pub fn remote_replied(&self) -> bool {
        self.state.lock().remote_replied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learns_destination() {
        let tracker = AssetDetailsTracker::new(Denomination::new("USD", 2), None);
        assert!(tracker.destination().is_none());

        tracker.record_remote(&Denomination::new("EUR", 2)).unwrap();
        assert_eq!(tracker.destination(), Some(Denomination::new("EUR", 2)));

        // Same announcement again is fine
        tracker.record_remote(&Denomination::new("EUR", 2)).unwrap();
        assert!(!tracker.has_conflict());
    }

    #[test]
    fn test_conflict_is_sticky() {
        let tracker = AssetDetailsTracker::new(
            Denomination::new("USD", 2),
            Some(Denomination::new("EUR", 2)),
        );
        assert_eq!(
            tracker.record_remote(&Denomination::new("EUR", 3)),
            Err(PaymentError::DestinationAssetConflict)
        );
        assert!(tracker.has_conflict());
        assert_eq!(tracker.destination(), Some(Denomination::new("EUR", 2)));
    }
}
