//! Packet identifier allocation fused with reply correlation.
//!
//! SUBSCRIBE and UNSUBSCRIBE each borrow a packet identifier until the
//! matching acknowledgement arrives. The table is a lazily grown vector
//! indexed by identifier; slot 0 is immortally occupied since identifier
//! zero never appears on the wire. Allocation picks the smallest free
//! slot, so identifiers are never reused while outstanding.

use tokio::sync::oneshot;

use mqv5_core::{Packet, PacketId};

use crate::error::ClientError;

/// Completes a waiting subscribe/unsubscribe call with its
/// acknowledgement, or rejects it on disconnect.
pub(crate) type Resolver = oneshot::Sender<Result<Packet, ClientError>>;

pub(crate) struct ReplyTable {
    slots: Vec<Option<Resolver>>,
    outstanding: usize,
}

impl ReplyTable {
    pub fn new() -> Self {
        // index 0 is the permanently occupied sentinel
        Self {
            slots: vec![None],
            outstanding: 0,
        }
    }

    /// Claim the smallest free identifier for `resolver`.
    ///
    /// On exhaustion the resolver is completed with
    /// [`ClientError::ResourceExhausted`] before being dropped.
    pub fn allocate(&mut self, resolver: Resolver) -> Result<PacketId, ClientError> {
        // scan only when there is a hole below the high-water mark
        if self.outstanding + 1 < self.slots.len() {
            for i in 1..self.slots.len() {
                if self.slots[i].is_none() {
                    if let Some(id) = PacketId::new(i as u16) {
                        self.slots[i] = Some(resolver);
                        self.outstanding += 1;
                        return Ok(id);
                    }
                }
            }
        }
        if self.slots.len() <= u16::MAX as usize {
            if let Some(id) = PacketId::new(self.slots.len() as u16) {
                self.slots.push(Some(resolver));
                self.outstanding += 1;
                return Ok(id);
            }
        }
        let _ = resolver.send(Err(ClientError::ResourceExhausted));
        Err(ClientError::ResourceExhausted)
    }

    /// Complete the waiter registered under `id`, if any.
    pub fn resolve(&mut self, id: u16, packet: Packet) -> bool {
        match self.take(id) {
            Some(resolver) => {
                let _ = resolver.send(Ok(packet));
                true
            }
            None => false,
        }
    }

    /// Take back the resolver for `id` (used when the write fails after
    /// allocation).
    pub fn take(&mut self, id: u16) -> Option<Resolver> {
        let resolver = self.slots.get_mut(id as usize).and_then(Option::take);
        if resolver.is_some() {
            self.outstanding -= 1;
        }
        resolver
    }

    /// Reject every outstanding waiter; called on every disconnection.
    pub fn reject_all(&mut self) {
        for slot in self.slots.iter_mut().skip(1) {
            if let Some(resolver) = slot.take() {
                let _ = resolver.send(Err(ClientError::ConnectionClosed));
            }
        }
        self.outstanding = 0;
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}
