//! Packet round trips over the link
//!
//! Turns an assembled packet request into an encrypted ILP Prepare, and a
//! link reply back into a `StreamPacketReply`. A reply only counts as
//! authentic when its data decrypts under the connection secret, decodes,
//! and echoes the request's sequence with the matching packet type.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use stream_core::{
    crypto::{fulfillment_and_condition, verify_fulfillment},
    ErrorCode, IlpPacketType, IlpPrepare, IlpReject, IlpReply, StreamCodec, StreamConnection,
    StreamEncryptor, StreamPacket, UNFULFILLABLE_CONDITION,
};

use crate::{
    link::Link,
    types::{StreamPacketReply, StreamPacketRequest},
    Result,
};

/// Encrypting, authenticating wrapper around a link
#[derive(Clone)]
pub struct PacketChannel {
    connection: Arc<StreamConnection>,
    link: Arc<dyn Link>,
    encryptor: Arc<dyn StreamEncryptor>,
    codec: Arc<dyn StreamCodec>,
    packet_expiry: Duration,
}

impl std::fmt::Debug for PacketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketChannel")
            .field("connection", &self.connection.id())
            .field("packet_expiry", &self.packet_expiry)
            .finish()
    }
}

impl PacketChannel {
    /// Create new channel
    pub fn new(
        connection: Arc<StreamConnection>,
        link: Arc<dyn Link>,
        encryptor: Arc<dyn StreamEncryptor>,
        codec: Arc<dyn StreamCodec>,
        packet_expiry: Duration,
    ) -> Self {
        Self {
            connection,
            link,
            encryptor,
            codec,
            packet_expiry,
        }
    }

    /// Connection
    pub fn connection(&self) -> &Arc<StreamConnection> {
        &self.connection
    }

    /// Build the Prepare for `request`.
    ///
    /// Unfulfillable packets carry the all-zero condition so the receiver
    /// can only reject them; probes and close packets use it.
    pub fn prepare(&self, request: &StreamPacketRequest, fulfillable: bool) -> Result<IlpPrepare> {
        let packet = StreamPacket::new(
            IlpPacketType::Prepare,
            request.sequence,
            request.min_destination_amount,
            request.frames.clone(),
        );
        let plaintext = self.codec.encode(&packet)?;
        let data = self
            .encryptor
            .encrypt(self.connection.shared_secret(), &plaintext)?;

        let execution_condition = if fulfillable && !request.is_close {
            fulfillment_and_condition(self.connection.shared_secret(), &data).1
        } else {
            UNFULFILLABLE_CONDITION
        };
        let expiry = chrono::Duration::milliseconds(self.packet_expiry.as_millis() as i64);

        Ok(IlpPrepare {
            destination: self.connection.destination_address().clone(),
            amount: request.source_amount,
            execution_condition,
            expires_at: Utc::now() + expiry,
            data,
        })
    }

    /// Send one Prepare and interpret the reply.
    ///
    /// Never fails: a link that outlives the packet expiry yields an R00
    /// reject, as a connector would.
    pub async fn round_trip(&self, sequence: u64, prepare: IlpPrepare) -> StreamPacketReply {
        let condition = prepare.execution_condition;
        let reply = match tokio::time::timeout(self.packet_expiry, self.link.send(prepare)).await {
            Ok(reply) => reply,
            Err(_) => {
                tracing::debug!("Packet {} expired before a reply", sequence);
                IlpReply::Reject(
                    IlpReject::new(ErrorCode::R00_TRANSFER_TIMED_OUT, "Packet expired")
                        .triggered_by(self.connection.source_address().clone()),
                )
            }
        };
        self.interpret(sequence, &condition, reply)
    }

    fn interpret(&self, sequence: u64, condition: &[u8; 32], reply: IlpReply) -> StreamPacketReply {
        let reply = match reply {
            IlpReply::Fulfill(fulfill) if !verify_fulfillment(&fulfill.fulfillment, condition) => {
                tracing::warn!("Packet {} fulfilled with an invalid fulfillment", sequence);
                IlpReply::Reject(
                    IlpReject::new(ErrorCode::T00_INTERNAL_ERROR, "Invalid fulfillment")
                        .triggered_by(self.connection.source_address().clone()),
                )
            }
            reply => reply,
        };

        let expected_type = if reply.is_fulfill() {
            IlpPacketType::Fulfill
        } else {
            IlpPacketType::Reject
        };
        let stream_packet = self
            .open(reply.data())
            .filter(|packet| packet.sequence == sequence && packet.ilp_packet_type == expected_type);

        StreamPacketReply::new(reply, stream_packet)
    }

    fn open(&self, data: &[u8]) -> Option<StreamPacket> {
        if data.is_empty() {
            return None;
        }
        let plaintext = match self
            .encryptor
            .decrypt(self.connection.shared_secret(), data)
        {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!("Reply data did not decrypt: {}", e);
                return None;
            }
        };
        match self.codec.decode(&plaintext) {
            Ok(packet) => Some(packet),
            Err(e) => {
                tracing::warn!("Reply decrypted but did not decode: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stream_core::{
        crypto::generate_fulfillment, AesGcmEncryptor, BincodeCodec, IlpAddress, IlpFulfill,
        SharedSecret,
    };

    /// Fulfills with the right fulfillment and an echo of the request
    struct EchoLink {
        connection: Arc<StreamConnection>,
        sequence_offset: u64,
    }

    #[async_trait]
    impl Link for EchoLink {
        async fn send(&self, prepare: IlpPrepare) -> IlpReply {
            let secret = self.connection.shared_secret();
            let plaintext = AesGcmEncryptor.decrypt(secret, &prepare.data).unwrap();
            let request = BincodeCodec.decode(&plaintext).unwrap();

            let reply = StreamPacket::new(
                IlpPacketType::Fulfill,
                request.sequence + self.sequence_offset,
                prepare.amount,
                vec![],
            );
            let data = AesGcmEncryptor
                .encrypt(secret, &BincodeCodec.encode(&reply).unwrap())
                .unwrap();
            IlpReply::Fulfill(IlpFulfill {
                fulfillment: generate_fulfillment(secret, &prepare.data),
                data,
            })
        }
    }

    struct SlowLink;

    #[async_trait]
    impl Link for SlowLink {
        async fn send(&self, _prepare: IlpPrepare) -> IlpReply {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            IlpReply::Reject(IlpReject::new(ErrorCode::T00_INTERNAL_ERROR, "unreachable"))
        }
    }

    fn channel(link: impl FnOnce(Arc<StreamConnection>) -> Arc<dyn Link>) -> PacketChannel {
        let connection = Arc::new(StreamConnection::new(
            IlpAddress::new("test.sender"),
            IlpAddress::new("test.receiver"),
            SharedSecret::generate(),
        ));
        PacketChannel::new(
            Arc::clone(&connection),
            link(connection),
            Arc::new(AesGcmEncryptor),
            Arc::new(BincodeCodec),
            Duration::from_secs(30),
        )
    }

    fn money_request(sequence: u64) -> StreamPacketRequest {
        StreamPacketRequest {
            sequence,
            source_amount: 100,
            min_destination_amount: 90,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_authentic_fulfill() {
        let channel = channel(|connection| {
            Arc::new(EchoLink {
                connection,
                sequence_offset: 0,
            })
        });
        let request = money_request(1);
        let prepare = channel.prepare(&request, true).unwrap();
        assert_eq!(prepare.amount, 100);
        assert_ne!(prepare.execution_condition, UNFULFILLABLE_CONDITION);

        let reply = channel.round_trip(1, prepare).await;
        assert!(reply.is_fulfill());
        assert!(reply.is_authentic());
        assert_eq!(reply.destination_amount(), Some(100));
    }

    #[tokio::test]
    async fn test_sequence_mismatch_is_not_authentic() {
        let channel = channel(|connection| {
            Arc::new(EchoLink {
                connection,
                sequence_offset: 1,
            })
        });
        let request = money_request(1);
        let prepare = channel.prepare(&request, true).unwrap();
        let reply = channel.round_trip(1, prepare).await;
        assert!(reply.is_fulfill());
        assert!(!reply.is_authentic());
    }

    #[tokio::test]
    async fn test_fulfillment_must_match_condition() {
        let channel = channel(|connection| {
            Arc::new(EchoLink {
                connection,
                sequence_offset: 0,
            })
        });
        // Unfulfillable: the echoed fulfillment cannot hash to zeros
        let prepare = channel.prepare(&money_request(1), false).unwrap();
        assert_eq!(prepare.execution_condition, UNFULFILLABLE_CONDITION);

        let reply = channel.round_trip(1, prepare).await;
        assert_eq!(
            reply.reject().map(|reject| reject.code),
            Some(ErrorCode::T00_INTERNAL_ERROR)
        );
        assert!(!reply.is_authentic());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_becomes_r00() {
        let channel = channel(|_| Arc::new(SlowLink));
        let prepare = channel.prepare(&money_request(1), true).unwrap();
        let reply = channel.round_trip(1, prepare).await;
        assert_eq!(
            reply.reject().map(|reject| reject.code),
            Some(ErrorCode::R00_TRANSFER_TIMED_OUT)
        );
    }
}
