//! Capacity bounded registry of connections.
//!
//! The registry only does identity safe registration and eviction. Each
//! connection sits behind its own lock, and the registry never blocks on one:
//! eviction only ever `try_lock`s, so unrelated peers keep making progress
//! while the registry is being changed.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::connection::Connection;
use crate::message::ConnectionId;
use crate::Error;

/// A registered connection and its closed flag.
///
/// Whoever holds the lock owns the connection for one processing step. A
/// step must check [`ConnectionEntry::is_closed`] after locking, since the
/// entry may have been evicted or closed while it waited.
pub(crate) struct ConnectionEntry {
    connection: Mutex<Connection>,
    closed: AtomicBool,
}

impl ConnectionEntry {
    fn new(connection: Connection) -> Self {
        ConnectionEntry {
            connection: Mutex::new(connection),
            closed: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.connection.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, Connection>> {
        self.connection.try_lock()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Result of [`ConnectionStore::get_or_create`].
#[derive(Debug)]
pub(crate) struct Created {
    pub entry: Arc<ConnectionEntry>,
    /// True if the entry did not exist before.
    pub created: bool,
    /// Idle connection evicted to make room. Already marked closed.
    pub evicted: Option<Arc<ConnectionEntry>>,
}

struct Slot {
    entry: Arc<ConnectionEntry>,
    /// Key in the recency index.
    tick: u64,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<SocketAddr, Slot>,
    /// Least recently used first.
    recency: BTreeMap<u64, SocketAddr>,
    by_cid: HashMap<ConnectionId, SocketAddr>,
    tick: u64,
}

impl Registry {
    fn touch(&mut self, peer: SocketAddr) -> Option<Arc<ConnectionEntry>> {
        self.tick += 1;
        let tick = self.tick;
        let slot = self.entries.get_mut(&peer)?;
        self.recency.remove(&slot.tick);
        slot.tick = tick;
        self.recency.insert(tick, peer);
        Some(slot.entry.clone())
    }

    fn insert(&mut self, peer: SocketAddr, entry: Arc<ConnectionEntry>) {
        self.tick += 1;
        let tick = self.tick;
        self.recency.insert(tick, peer);
        if let Some(old) = self.entries.insert(peer, Slot { entry, tick }) {
            self.recency.remove(&old.tick);
        }
    }

    fn remove(&mut self, peer: SocketAddr) -> Option<Arc<ConnectionEntry>> {
        let slot = self.entries.remove(&peer)?;
        self.recency.remove(&slot.tick);
        self.by_cid.retain(|_, addr| *addr != peer);
        Some(slot.entry)
    }

    /// Least recently used entry without a handshake in progress.
    fn evict_idle(&mut self) -> Option<Arc<ConnectionEntry>> {
        let victim = self.recency.values().copied().find(|peer| {
            let Some(slot) = self.entries.get(peer) else {
                return false;
            };
            // A locked connection is being processed and counts as busy.
            match slot.entry.try_lock() {
                Some(connection) => connection.is_idle(),
                None => false,
            }
        })?;

        let entry = self.remove(victim)?;
        entry.mark_closed();
        debug!("Evicted idle connection {}", victim);
        Some(entry)
    }
}

/// Registry of connections keyed by peer address and connection id.
pub(crate) struct ConnectionStore {
    capacity: usize,
    registry: Mutex<Registry>,
}

impl ConnectionStore {
    pub fn new(capacity: usize) -> Self {
        ConnectionStore {
            capacity,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.registry.lock().entries.len()
    }

    /// The connection of `peer`, marking it as recently used.
    pub fn lookup(&self, peer: SocketAddr) -> Option<Arc<ConnectionEntry>> {
        self.registry.lock().touch(peer)
    }

    /// The connection of `peer`, leaving its recency alone.
    pub fn peek(&self, peer: SocketAddr) -> Option<Arc<ConnectionEntry>> {
        self.registry
            .lock()
            .entries
            .get(&peer)
            .map(|slot| slot.entry.clone())
    }

    /// The connection addressed by `connection_id`, and the address it is
    /// currently registered under.
    pub fn lookup_cid(
        &self,
        connection_id: &ConnectionId,
    ) -> Option<(SocketAddr, Arc<ConnectionEntry>)> {
        let mut registry = self.registry.lock();
        let peer = *registry.by_cid.get(connection_id)?;
        let entry = registry.touch(peer)?;
        Some((peer, entry))
    }

    /// The connection of `peer`, created with `create` if there is none.
    ///
    /// At capacity, the least recently used connection without a handshake in
    /// progress makes room. If every connection is mid-handshake this fails
    /// with [`Error::CapacityExceeded`] and no connection is disturbed.
    pub fn get_or_create(
        &self,
        peer: SocketAddr,
        create: impl FnOnce() -> Connection,
    ) -> Result<Created, Error> {
        let mut registry = self.registry.lock();

        if let Some(entry) = registry.touch(peer) {
            return Ok(Created {
                entry,
                created: false,
                evicted: None,
            });
        }

        let mut evicted = None;
        if registry.entries.len() >= self.capacity {
            evicted = registry.evict_idle();
            if evicted.is_none() {
                warn!(
                    "Connection store full ({}), rejecting {}",
                    self.capacity, peer
                );
                return Err(Error::CapacityExceeded(self.capacity));
            }
        }

        let entry = Arc::new(ConnectionEntry::new(create()));
        registry.insert(peer, entry.clone());
        trace!("Created connection {} ({} total)", peer, registry.entries.len());

        Ok(Created {
            entry,
            created: true,
            evicted,
        })
    }

    /// Remove `entry` if it is still the one registered under `peer`.
    pub fn remove(&self, peer: SocketAddr, entry: &Arc<ConnectionEntry>) -> bool {
        let mut registry = self.registry.lock();
        let registered = registry
            .entries
            .get(&peer)
            .map(|slot| Arc::ptr_eq(&slot.entry, entry))
            .unwrap_or(false);

        if registered {
            registry.remove(peer);
            trace!("Removed connection {}", peer);
        }
        registered
    }

    /// Route `connection_id` to the connection registered under `peer`.
    pub fn register_cid(&self, connection_id: ConnectionId, peer: SocketAddr) {
        self.registry.lock().by_cid.insert(connection_id, peer);
    }

    /// Whether `connection_id` is taken.
    pub fn has_cid(&self, connection_id: &ConnectionId) -> bool {
        self.registry.lock().by_cid.contains_key(connection_id)
    }

    /// Move `entry` from `old` to `new`, after the peer's address changed.
    ///
    /// A different connection registered under `new` is displaced, marked
    /// closed and returned.
    pub fn update_address(
        &self,
        old: SocketAddr,
        new: SocketAddr,
        entry: &Arc<ConnectionEntry>,
    ) -> Option<Arc<ConnectionEntry>> {
        let mut registry = self.registry.lock();

        let registered = registry
            .entries
            .get(&old)
            .map(|slot| Arc::ptr_eq(&slot.entry, entry))
            .unwrap_or(false);
        if !registered || old == new {
            return None;
        }

        let cids: Vec<ConnectionId> = registry
            .by_cid
            .iter()
            .filter(|(_, addr)| **addr == old)
            .map(|(cid, _)| cid.clone())
            .collect();

        let displaced = registry.remove(new);
        if let Some(d) = &displaced {
            d.mark_closed();
        }

        registry.remove(old);
        registry.insert(new, entry.clone());
        for cid in cids {
            registry.by_cid.insert(cid, new);
        }

        debug!("Connection moved from {} to {}", old, new);
        displaced
    }

    /// Remove every connection, marking each closed.
    pub fn drain(&self) -> Vec<Arc<ConnectionEntry>> {
        let mut registry = self.registry.lock();
        let all: Vec<Arc<ConnectionEntry>> = registry
            .entries
            .drain()
            .map(|(_, slot)| slot.entry)
            .collect();
        registry.recency.clear();
        registry.by_cid.clear();
        for entry in &all {
            entry.mark_closed();
        }
        all
    }
}

impl std::fmt::Debug for ConnectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStore")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
