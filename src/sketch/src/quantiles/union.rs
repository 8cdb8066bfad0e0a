use tracing::debug;

use crate::error::Result;
use crate::quantiles::resolve_k;
use crate::quantiles::sketch::DoublesSketch;

/// DoublesUnion accumulates any number of quantiles sketches into a single
/// gadget sketch. The configured max_k caps the gadget's resolution and
/// never grows; an input with a lower resolution forces the gadget down to
/// it, because the combined error bound is governed by the smaller k.
#[derive(Debug, Clone)]
pub struct DoublesUnion {
    max_k: u16,
    gadget: Option<DoublesSketch>,
}

impl DoublesUnion {
    /// new builds a union with the given target resolution; zero
    /// substitutes the default.
    pub fn new(requested_k: u32) -> Result<Self> {
        Ok(Self {
            max_k: resolve_k(requested_k)?,
            gadget: None,
        })
    }

    pub fn max_k(&self) -> u16 {
        self.max_k
    }

    /// k reports the gadget's effective resolution, which may have been
    /// reconciled below max_k by a coarser input.
    pub fn k(&self) -> u16 {
        self.gadget.as_ref().map_or(self.max_k, DoublesSketch::k)
    }

    pub fn n(&self) -> u64 {
        self.gadget.as_ref().map_or(0, DoublesSketch::n)
    }

    pub fn is_empty(&self) -> bool {
        self.n() == 0
    }

    pub fn retained_items(&self) -> usize {
        self.gadget.as_ref().map_or(0, DoublesSketch::retained_items)
    }

    pub fn min_value(&self) -> f64 {
        self.gadget
            .as_ref()
            .map_or(f64::INFINITY, DoublesSketch::min_value)
    }

    pub fn max_value(&self) -> f64 {
        self.gadget
            .as_ref()
            .map_or(f64::NEG_INFINITY, DoublesSketch::max_value)
    }

    /// update inserts one raw value, for local-combine over un-sketched
    /// input.
    pub fn update(&mut self, v: f64) {
        self.gadget
            .get_or_insert_with(|| DoublesSketch::with_k(self.max_k))
            .update(v);
    }

    /// merge_sketch folds a decoded sketch into the gadget, reconciling
    /// resolutions: a finer input is downsampled into the gadget, a coarser
    /// one rebuilds the gadget at the coarser resolution first.
    pub fn merge_sketch(&mut self, other: &DoublesSketch) {
        if other.is_empty() {
            return;
        }
        match self.gadget.take() {
            None => {
                let k_tgt = other.k().min(self.max_k);
                let mut gadget = DoublesSketch::with_k(k_tgt);
                merge_into(other, &mut gadget);
                self.gadget = Some(gadget);
            }
            Some(mut gadget) => {
                if other.k() >= gadget.k() {
                    merge_into(other, &mut gadget);
                    self.gadget = Some(gadget);
                } else {
                    debug!(
                        gadget_k = gadget.k(),
                        incoming_k = other.k(),
                        "rebuilding quantiles gadget at lower resolution"
                    );
                    let mut rebuilt = DoublesSketch::with_k(other.k());
                    merge_into(&gadget, &mut rebuilt);
                    merge_into(other, &mut rebuilt);
                    self.gadget = Some(rebuilt);
                }
            }
        }
    }

    /// result snapshots the current state without mutating the gadget.
    pub fn result(&self) -> DoublesSketch {
        match &self.gadget {
            Some(g) => g.clone(),
            None => DoublesSketch::with_k(self.max_k),
        }
    }

    /// reset returns the union to its initial empty state at max_k.
    pub fn reset(&mut self) {
        self.gadget = None;
    }
}

/// merge_into folds src into tgt. Requires src.k >= tgt.k with both powers
/// of two, so the downsampling ratio is an exact power of two: a source
/// level-i buffer downsampled by 2^j lands at target level i+j with the
/// per-value weight preserved.
pub(crate) fn merge_into(src: &DoublesSketch, tgt: &mut DoublesSketch) {
    debug_assert!(src.k() >= tgt.k(), "merge_into requires src.k >= tgt.k");
    if src.is_empty() {
        return;
    }

    let ratio = (src.k() / tgt.k()) as usize;
    let lg_ratio = ratio.trailing_zeros() as usize;

    for &v in &src.base_buffer {
        tgt.update(v);
    }
    for (lvl, level) in src.levels.iter().enumerate() {
        if let Some(values) = level {
            let carry = if ratio == 1 {
                values.clone()
            } else {
                tgt.sample_down(values, ratio)
            };
            tgt.propagate_carry(lvl + lg_ratio, carry);
        }
    }

    // Base-buffer items were counted by update; account for the leveled
    // remainder and fold in bounds the buffer feed did not see.
    tgt.n += src.n - src.base_buffer.len() as u64;
    tgt.min_value = tgt.min_value.min(src.min_value);
    tgt.max_value = tgt.max_value.max(src.max_value);
}
