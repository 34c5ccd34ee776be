//! Decompressed chunk caches.
//!
//! A cache only saves work. Readers produce the same bytes with any cache,
//! including [`NoCache`].

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_CACHE_CAPACITY: usize = 1;

/// Position of a chunk inside a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub member: u32,
    pub chunk: u32,
}

impl ChunkKey {
    pub fn new(member: u32, chunk: u32) -> Self {
        Self { member, chunk }
    }
}

pub trait ChunkCache: Send {
    fn get(&mut self, key: ChunkKey) -> Option<&[u8]>;
    fn put(&mut self, key: ChunkKey, data: Vec<u8>);
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Never stores anything; every read inflates its chunk again.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl ChunkCache for NoCache {
    fn get(&mut self, _key: ChunkKey) -> Option<&[u8]> {
        None
    }

    fn put(&mut self, _key: ChunkKey, _data: Vec<u8>) {}

    fn len(&self) -> usize {
        0
    }
}

/// Holds up to `capacity` chunks and evicts a uniformly random one when full.
#[derive(Debug)]
pub struct RandomEvictionCache {
    capacity: usize,
    entries: HashMap<ChunkKey, Vec<u8>>,
    keys: Vec<ChunkKey>,
    rng: StdRng,
}

impl RandomEvictionCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_rng(capacity, StdRng::from_entropy())
    }

    /// Deterministic eviction order, for reproducible tests and benches.
    pub fn with_seed(capacity: usize, seed: u64) -> Self {
        Self::with_rng(capacity, StdRng::seed_from_u64(seed))
    }

    fn with_rng(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity.min(64)),
            keys: Vec::with_capacity(capacity.min(64)),
            rng,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.entries.contains_key(&key)
    }
}

impl ChunkCache for RandomEvictionCache {
    fn get(&mut self, key: ChunkKey) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    fn put(&mut self, key: ChunkKey, data: Vec<u8>) {
        if self.capacity == 0 {
            return;
        }
        if let Some(slot) = self.entries.get_mut(&key) {
            *slot = data;
            return;
        }
        if self.keys.len() >= self.capacity {
            let victim = self.keys.swap_remove(self.rng.gen_range(0..self.keys.len()));
            self.entries.remove(&victim);
        }
        self.keys.push(key);
        self.entries.insert(key, data);
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Which cache a reader builds for itself at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    None,
    RandomEviction { capacity: usize },
}

impl Default for CachePolicy {
    fn default() -> Self {
        CachePolicy::RandomEviction {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CachePolicy {
    pub fn build(self) -> Box<dyn ChunkCache> {
        match self {
            CachePolicy::None => Box::new(NoCache),
            CachePolicy::RandomEviction { capacity } => {
                Box::new(RandomEvictionCache::new(capacity))
            }
        }
    }
}
