//! Rate probing
//!
//! Before money moves, unfulfillable packets of decreasing size discover
//! the exchange rate, the path's packet limit and the receiver's asset. The
//! receiver rejects each probe but reports, encrypted, how much arrived.

use std::collections::HashSet;
use std::sync::Arc;

use crate::{
    channel::PacketChannel,
    config::ProbeConfig,
    error::PaymentError,
    filters::asset_details::announcement_frames,
    trackers::PaymentSharedStateTracker,
    types::StreamPacketRequest,
    Result,
};

/// Probe until one authentic reply arrives.
///
/// Probes go out one at a time, largest first, each capped by what the
/// path is known to carry. Returns `RateProbeFailed` when every amount has
/// been tried without an authentic reply.
pub async fn probe(
    channel: &PacketChannel,
    shared: &Arc<PaymentSharedStateTracker>,
    config: &ProbeConfig,
) -> Result<()> {
    let connection = shared.connection();
    let mut attempted = HashSet::new();

    for &candidate in &config.amounts {
        if shared.max_packet().no_capacity_available() {
            return Err(PaymentError::ConnectorError.into());
        }
        let amount = candidate.min(shared.max_packet().next_max_packet_amount());
        if amount == 0 || !attempted.insert(amount) {
            continue;
        }

        let sequence = connection
            .next_sequence()
            .map_err(|_| PaymentError::ExceededMaxSequence)?;
        if !connection.sequence_is_safe_for_single_shared_secret(sequence) {
            return Err(PaymentError::ExceededMaxSequence.into());
        }

        let request = StreamPacketRequest {
            sequence,
            source_amount: amount,
            frames: announcement_frames(shared),
            ..Default::default()
        };
        let prepare = channel.prepare(&request, false)?;
        let reply = channel.round_trip(sequence, prepare).await;

        if let Some(reject) = reply.reject() {
            shared.max_packet().reduce_max_packet_amount(reject, amount);
        }

        let Some(packet) = &reply.stream_packet else {
            tracing::debug!(
                "Probe of {} got no authentic reply ({:?})",
                amount,
                reply.reject().map(|reject| reject.code)
            );
            continue;
        };

        shared.max_packet().adjust_path_capacity(amount);
        shared.exchange_rate().update_rate(amount, packet.prepare_amount);

        let assets = shared.asset_details();
        assets.mark_remote_replied();
        if let Some(denomination) = packet.asset_details() {
            assets.record_remote(denomination)?;
        }
        if let Some(receive_max) = packet.receive_max() {
            shared.amount().update_remote_max(receive_max);
        }
        if packet.has_close_frame() {
            return Err(PaymentError::ClosedByRecipient.into());
        }

        tracing::info!(
            "Probe of {} delivered {}, max packet {:?}",
            amount,
            packet.prepare_amount,
            shared.max_packet().state()
        );
        return Ok(());
    }

    Err(PaymentError::RateProbeFailed.into())
}
