//! Tile provider contract and the in-memory provider.
//!
//! Providers answer requests asynchronously by completing a [`TileReply`]. The
//! reply carries a channel sender back to the owning [`Tree`](crate::Tree),
//! which drains responses in [`Tree::poll`](crate::Tree::poll) on its own
//! thread. A provider may complete a reply from any thread, at any time, or
//! never.

use crossbeam_channel::Sender;
use globe_math::TileKey;
use rustc_hash::FxHashMap;

use crate::grid_tile::GridTile;
use crate::tile::ElevationTile;

/// Identifies one request issued by a tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

/// Provider-defined handle used to abort an in-flight request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CancelToken(pub u64);

/// A completed request as seen by the tree.
#[derive(Debug)]
pub struct TileResponse {
    pub request: RequestId,
    /// Raw tile bytes, or `None` when the tile could not be fetched.
    pub data: Option<Vec<u8>>,
}

/// One-shot completion handle for a tile request.
#[derive(Clone, Debug)]
pub struct TileReply {
    request: RequestId,
    sender: Sender<TileResponse>,
}

impl TileReply {
    pub(crate) fn new(request: RequestId, sender: Sender<TileResponse>) -> Self {
        Self { request, sender }
    }

    pub fn request_id(&self) -> RequestId {
        self.request
    }

    /// Deliver the result. Completing after the tree has been dropped is
    /// silently ignored.
    pub fn complete(self, data: Option<Vec<u8>>) {
        let _ = self.sender.send(TileResponse {
            request: self.request,
            data,
        });
    }
}

/// Source of raw elevation tiles.
pub trait TileProvider {
    /// Decoded tile type produced from this provider's bytes.
    type Tile: ElevationTile;

    /// Start fetching `key`. The provider must eventually call
    /// [`TileReply::complete`] unless the request is cancelled.
    fn request_tile(&mut self, key: TileKey, reply: TileReply) -> CancelToken;

    /// Ask the provider to abandon a request. Advisory: a completion may still
    /// arrive and is ignored by the tree.
    fn cancel_request(&mut self, token: CancelToken);
}

/// When [`MemoryTileProvider`] completes requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Complete inside `request_tile`.
    Immediate,
    /// Hold replies until [`MemoryTileProvider::deliver_all`] or
    /// [`MemoryTileProvider::deliver`] is called.
    Manual,
}

type TileSource = Box<dyn FnMut(TileKey) -> Option<Vec<u8>> + Send>;

/// Provider backed by a closure producing [`GridTile`] bytes on demand.
///
/// Returning `None` from the closure reports the tile as unavailable. Cancelled
/// requests are recorded but queued replies stay deliverable, which lets
/// callers exercise late completions.
pub struct MemoryTileProvider {
    source: TileSource,
    delivery: Delivery,
    queued: Vec<(TileKey, TileReply)>,
    tokens: FxHashMap<CancelToken, TileKey>,
    next_token: u64,
    requested: Vec<TileKey>,
    cancelled: Vec<TileKey>,
}

impl MemoryTileProvider {
    pub fn new<F>(delivery: Delivery, source: F) -> Self
    where
        F: FnMut(TileKey) -> Option<Vec<u8>> + Send + 'static,
    {
        Self {
            source: Box::new(source),
            delivery,
            queued: Vec::new(),
            tokens: FxHashMap::default(),
            next_token: 1,
            requested: Vec::new(),
            cancelled: Vec::new(),
        }
    }

    /// Flat terrain at `height` down to `leaf_level`; deeper requests fail.
    pub fn flat(delivery: Delivery, rho: u8, leaf_level: u8, height: f32) -> Self {
        let side = GridTile::side(rho);
        Self::new(delivery, move |key| {
            (key.level <= leaf_level).then(|| {
                GridTile::encode(rho, leaf_level - key.level, &vec![height; side * side])
            })
        })
    }

    /// Complete every queued request in issue order. Returns how many were
    /// delivered.
    pub fn deliver_all(&mut self) -> usize {
        let queued = std::mem::take(&mut self.queued);
        let count = queued.len();
        for (key, reply) in queued {
            let data = (self.source)(key);
            reply.complete(data);
        }
        count
    }

    /// Complete the queued requests for `key`. Returns whether any was found.
    pub fn deliver(&mut self, key: TileKey) -> bool {
        let (matching, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.queued).into_iter().partition(|(k, _)| *k == key);
        self.queued = rest;
        let found = !matching.is_empty();
        for (key, reply) in matching {
            let data = (self.source)(key);
            reply.complete(data);
        }
        found
    }

    /// Fail the queued requests for `key` regardless of the source.
    pub fn fail(&mut self, key: TileKey) -> bool {
        let (matching, rest): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.queued).into_iter().partition(|(k, _)| *k == key);
        self.queued = rest;
        let found = !matching.is_empty();
        for (_, reply) in matching {
            reply.complete(None);
        }
        found
    }

    /// Keys of every request received, in order.
    pub fn requested(&self) -> &[TileKey] {
        &self.requested
    }

    /// Keys of every cancellation received, in order.
    pub fn cancelled(&self) -> &[TileKey] {
        &self.cancelled
    }

    /// Keys still waiting for manual delivery.
    pub fn queued_keys(&self) -> Vec<TileKey> {
        self.queued.iter().map(|(k, _)| *k).collect()
    }
}

impl TileProvider for MemoryTileProvider {
    type Tile = GridTile;

    fn request_tile(&mut self, key: TileKey, reply: TileReply) -> CancelToken {
        let token = CancelToken(self.next_token);
        self.next_token += 1;
        self.tokens.insert(token, key);
        self.requested.push(key);

        match self.delivery {
            Delivery::Immediate => {
                let data = (self.source)(key);
                reply.complete(data);
            }
            Delivery::Manual => self.queued.push((key, reply)),
        }
        token
    }

    fn cancel_request(&mut self, token: CancelToken) {
        if let Some(key) = self.tokens.remove(&token) {
            self.cancelled.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_immediate_delivery() {
        let (tx, rx) = unbounded();
        let mut provider = MemoryTileProvider::flat(Delivery::Immediate, 2, 3, 5.0);
        provider.request_tile(TileKey::ROOT, TileReply::new(RequestId(1), tx.clone()));
        provider.request_tile(TileKey::new(4, 0, 0), TileReply::new(RequestId(2), tx));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.request, RequestId(1));
        assert!(first.data.is_some());
        let second = rx.try_recv().unwrap();
        assert!(second.data.is_none(), "level 4 is below the leaf level");
    }

    #[test]
    fn test_manual_delivery_and_cancel_log() {
        let (tx, rx) = unbounded();
        let mut provider = MemoryTileProvider::flat(Delivery::Manual, 2, 3, 5.0);
        let a = TileKey::new(1, 0, 0);
        let b = TileKey::new(1, 1, 0);
        let token = provider.request_tile(a, TileReply::new(RequestId(1), tx.clone()));
        provider.request_tile(b, TileReply::new(RequestId(2), tx));
        assert!(rx.try_recv().is_err(), "nothing delivered before deliver");

        provider.cancel_request(token);
        assert_eq!(provider.cancelled(), &[a]);

        assert!(provider.deliver(b));
        assert_eq!(rx.try_recv().unwrap().request, RequestId(2));
        assert_eq!(provider.queued_keys(), vec![a]);
        assert_eq!(provider.deliver_all(), 1);
        assert_eq!(rx.try_recv().unwrap().request, RequestId(1));
        assert_eq!(provider.requested(), &[a, b]);
    }

    #[test]
    fn test_fail_overrides_source() {
        let (tx, rx) = unbounded();
        let mut provider = MemoryTileProvider::flat(Delivery::Manual, 2, 3, 5.0);
        provider.request_tile(TileKey::ROOT, TileReply::new(RequestId(9), tx));
        assert!(provider.fail(TileKey::ROOT));
        assert!(rx.try_recv().unwrap().data.is_none());
        assert!(!provider.fail(TileKey::ROOT));
    }

    #[test]
    fn test_completion_after_receiver_dropped() {
        let (tx, rx) = unbounded();
        drop(rx);
        TileReply::new(RequestId(1), tx).complete(Some(vec![1, 2, 3]));
    }
}
