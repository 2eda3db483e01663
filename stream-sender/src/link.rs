//! Link to the next hop
//!
//! The engine only needs one round trip: hand over a Prepare, get back a
//! Fulfill or Reject. Transport failures are the link's to report, as a
//! temporary reject (T01) from the link itself.

use async_trait::async_trait;
use std::sync::Arc;
use stream_core::{IlpPrepare, IlpReply};

/// Sends a Prepare to the next hop
#[async_trait]
pub trait Link: Send + Sync {
    /// One round trip
    async fn send(&self, prepare: IlpPrepare) -> IlpReply;
}

#[async_trait]
impl<L: Link + ?Sized> Link for Arc<L> {
    async fn send(&self, prepare: IlpPrepare) -> IlpReply {
        (**self).send(prepare).await
    }
}
