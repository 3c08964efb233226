//! # Reactor Port
//!
//! A Reactor is a protocol consumer (consensus, mempool, block sync) bound
//! to exactly one channel.

use async_trait::async_trait;

use crate::domain::types::{Direction, DisconnectReason, Envelope, PeerId};
use crate::service::Channel;

/// Protocol logic driven by the router's dispatcher.
///
/// Messages for one Reactor are delivered sequentially. A slow `on_message`
/// only backs up this Reactor's inbound queue, where the channel's drop
/// policy applies.
///
/// # Example Implementation
///
/// ```rust,ignore
/// struct Echo;
///
/// #[async_trait]
/// impl Reactor for Echo {
///     async fn on_message(&self, envelope: Envelope, channel: &Channel) {
///         if let Some(from) = envelope.from {
///             let _ = channel.send(Envelope::to_peer(from, envelope.payload)).await;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Reactor: Send + Sync {
    /// Handle one inbound envelope. Misbehaving peers are reported through
    /// [`Channel::report_error`].
    async fn on_message(&self, envelope: Envelope, channel: &Channel);

    /// A peer connection came up.
    async fn on_peer_up(&self, _peer: PeerId, _direction: Direction) {}

    /// A peer connection went down.
    async fn on_peer_down(&self, _peer: PeerId, _reason: DisconnectReason) {}
}
