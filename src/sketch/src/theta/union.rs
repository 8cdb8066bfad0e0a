use tracing::trace;

use crate::error::Result;
use crate::theta::sketch::{CompactSketch, UpdateSketch};

/// Union maintains an upper bound on the number of distinct items seen
/// across any number of input sketches. The accumulator's threshold is the
/// minimum of every contributing sketch's threshold: a union is only as
/// precise as its least-precise input.
#[derive(Debug, Clone)]
pub struct Union {
    gadget: UpdateSketch,
}

impl Union {
    /// new builds a union with the given target capacity. The capacity must
    /// be a power of two of at least 16; zero substitutes the default.
    pub fn new(requested: u32) -> Result<Self> {
        Ok(Self {
            gadget: UpdateSketch::new(requested)?,
        })
    }

    pub fn nominal(&self) -> u32 {
        self.gadget.nominal()
    }

    pub fn theta(&self) -> u64 {
        self.gadget.theta()
    }

    pub fn is_empty(&self) -> bool {
        self.gadget.is_empty()
    }

    pub fn retained_items(&self) -> usize {
        self.gadget.retained_items()
    }

    /// update folds one input sketch into the union. Empty inputs are a
    /// no-op; a lower incoming threshold is adopted first and the sample
    /// pruned before the incoming hashes are folded in.
    pub fn update(&mut self, other: &CompactSketch) {
        if other.is_empty() {
            return;
        }
        self.gadget.empty = false;

        if other.theta() < self.gadget.theta {
            trace!(
                old = self.gadget.theta,
                new = other.theta(),
                "adopting lower union threshold"
            );
            self.gadget.theta = other.theta();
            self.gadget.prune();
        }

        for &h in other.hashes() {
            self.gadget.insert_hash(h);
        }
    }

    /// update_item folds one raw item into the union, for local-combine
    /// over un-sketched input.
    pub fn update_item(&mut self, key: &[u8]) {
        self.gadget.update(key);
    }

    /// result compacts the current state without mutating the accumulator;
    /// repeated reads return identical snapshots.
    pub fn result(&self, ordered: bool) -> CompactSketch {
        self.gadget.compact(ordered)
    }

    pub fn estimate(&self) -> f64 {
        self.gadget.estimate()
    }

    /// reset returns the union to its initial empty state at the same
    /// capacity.
    pub fn reset(&mut self) {
        let nominal = self.gadget.nominal();
        self.gadget = UpdateSketch {
            nominal,
            theta: u64::MAX,
            hashes: Default::default(),
            empty: true,
        };
    }
}
