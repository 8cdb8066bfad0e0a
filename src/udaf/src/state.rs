//! Aggregation state machine.
//!
//! One `AggregationState` lives per aggregation group. The merge engine
//! behind it is a closed enum over the two sketch families and is built
//! lazily on the first real input, so a group that only ever sees absent
//! rows never allocates sketch storage and still terminates to a
//! well-formed empty sketch.

use tracing::trace;

use sketch_core::quantiles::{self, DoublesUnion};
use sketch_core::theta::{self, Union};
use sketch_core::{decode, encode, Sketch, SketchError, SketchFamily};

use crate::error::{Result, UdafError};

/// MergeEngine dispatches the common fold/encode capability over the two
/// families by tag, matching the codec's dispatch.
#[derive(Debug)]
pub enum MergeEngine {
    SetUnion(Union),
    Quantiles(DoublesUnion),
}

impl MergeEngine {
    /// build constructs an engine of the given family. A zero parameter
    /// substitutes the family default; anything else must be a power of
    /// two in the family's range.
    pub fn build(family: SketchFamily, param: u32) -> Result<Self, SketchError> {
        Ok(match family {
            SketchFamily::SetUnion => MergeEngine::SetUnion(Union::new(param)?),
            SketchFamily::Quantiles => MergeEngine::Quantiles(DoublesUnion::new(param)?),
        })
    }

    pub fn family(&self) -> SketchFamily {
        match self {
            MergeEngine::SetUnion(_) => SketchFamily::SetUnion,
            MergeEngine::Quantiles(_) => SketchFamily::Quantiles,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MergeEngine::SetUnion(u) => u.is_empty(),
            MergeEngine::Quantiles(u) => u.is_empty(),
        }
    }

    pub fn retained_items(&self) -> usize {
        match self {
            MergeEngine::SetUnion(u) => u.retained_items(),
            MergeEngine::Quantiles(u) => u.retained_items(),
        }
    }

    /// update_value folds one raw value. The set-union family treats the
    /// value as a distinct item.
    pub fn update_value(&mut self, v: f64) {
        match self {
            MergeEngine::SetUnion(u) => {
                // 0.0 and -0.0 compare equal, and every NaN payload is the
                // same unknown, so the key is canonicalized before hashing.
                let canonical = if v == 0.0 {
                    0.0
                } else if v.is_nan() {
                    f64::NAN
                } else {
                    v
                };
                u.update_item(&canonical.to_le_bytes());
            }
            MergeEngine::Quantiles(u) => u.update(v),
        }
    }

    /// update_item folds one raw byte key; set-union only.
    pub fn update_item(&mut self, key: &[u8]) -> Result<()> {
        match self {
            MergeEngine::SetUnion(u) => {
                u.update_item(key);
                Ok(())
            }
            MergeEngine::Quantiles(_) => Err(UdafError::Argument(
                "raw byte keys are not valid quantiles input".to_string(),
            )),
        }
    }

    /// merge_sketch folds a decoded sketch; the family tag must match.
    pub fn merge_sketch(&mut self, sketch: &Sketch) -> Result<(), SketchError> {
        match (self, sketch) {
            (MergeEngine::SetUnion(u), Sketch::SetUnion(other)) => {
                u.update(other);
                Ok(())
            }
            (MergeEngine::Quantiles(u), Sketch::Quantiles(other)) => {
                u.merge_sketch(other);
                Ok(())
            }
            (engine, other) => Err(SketchError::CorruptSketch(format!(
                "family mismatch: engine is {}, sketch is {}",
                engine.family().name(),
                other.family().name()
            ))),
        }
    }

    /// result_bytes encodes the current logical content without mutating
    /// the engine.
    pub fn result_bytes(&self) -> Vec<u8> {
        match self {
            MergeEngine::SetUnion(u) => encode(&Sketch::SetUnion(u.result(false))),
            MergeEngine::Quantiles(u) => encode(&Sketch::Quantiles(u.result())),
        }
    }

    pub fn reset(&mut self) {
        match self {
            MergeEngine::SetUnion(u) => u.reset(),
            MergeEngine::Quantiles(u) => u.reset(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Uninitialized,
    Active,
    Terminated,
}

/// AggregationState owns one merge engine for the duration of one
/// aggregation group. Single-threaded by contract; the host runs many
/// independent instances in parallel.
#[derive(Debug)]
pub struct AggregationState {
    family: SketchFamily,
    target_param: u32,
    kind: StateKind,
    engine: Option<MergeEngine>,
}

impl AggregationState {
    /// new validates the target parameter up front so a bad capacity or k
    /// fails at setup, not on the first row.
    pub fn new(family: SketchFamily, target_param: u32) -> Result<Self> {
        match family {
            SketchFamily::SetUnion => {
                theta::resolve_nominal_entries(target_param)?;
            }
            SketchFamily::Quantiles => {
                quantiles::resolve_k(target_param)?;
            }
        }
        Ok(Self {
            family,
            target_param,
            kind: StateKind::Uninitialized,
            engine: None,
        })
    }

    pub fn family(&self) -> SketchFamily {
        self.family
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    pub fn is_empty(&self) -> bool {
        self.engine.as_ref().map_or(true, MergeEngine::is_empty)
    }

    /// init marks the state ACTIVE at the start of an aggregation group,
    /// discarding anything a previous group left behind.
    pub fn init(&mut self) {
        self.engine = None;
        self.kind = StateKind::Active;
    }

    fn check_active(&self, op: &str) -> Result<()> {
        match self.kind {
            StateKind::Active => Ok(()),
            StateKind::Uninitialized => Err(UdafError::State(format!(
                "{} called before init",
                op
            ))),
            StateKind::Terminated => Err(UdafError::State(format!(
                "{} called after terminate",
                op
            ))),
        }
    }

    fn engine_mut(&mut self) -> Result<&mut MergeEngine> {
        match &mut self.engine {
            Some(engine) => Ok(engine),
            slot => Ok(slot.insert(MergeEngine::build(self.family, self.target_param)?)),
        }
    }

    /// update_value folds one raw value from the local-combine phase.
    pub fn update_value(&mut self, v: f64) -> Result<()> {
        self.check_active("update")?;
        self.engine_mut()?.update_value(v);
        Ok(())
    }

    /// update_item folds one raw byte key; set-union only.
    pub fn update_item(&mut self, key: &[u8]) -> Result<()> {
        self.check_active("update")?;
        self.engine_mut()?.update_item(key)
    }

    /// merge_bytes decodes and folds one serialized sketch. Null and
    /// sub-preamble inputs are no-ops; corrupt payloads are errors.
    pub fn merge_bytes(&mut self, bytes: Option<&[u8]>) -> Result<()> {
        self.check_active("merge")?;
        let bytes = match bytes {
            Some(b) => b,
            None => return Ok(()),
        };
        let sketch = match decode(bytes)? {
            Some(s) => s,
            None => {
                trace!(len = bytes.len(), "skipping absent sketch input");
                return Ok(());
            }
        };
        self.engine_mut()?.merge_sketch(&sketch)?;
        Ok(())
    }

    /// terminate_partial encodes the current state without destroying it;
    /// the state stays ACTIVE and keeps accepting input. A group may flush
    /// partials multiple times under memory pressure.
    pub fn terminate_partial(&self) -> Result<Vec<u8>> {
        self.check_active("terminate_partial")?;
        match &self.engine {
            Some(engine) => Ok(engine.result_bytes()),
            None => Ok(MergeEngine::build(self.family, self.target_param)?.result_bytes()),
        }
    }

    /// terminate encodes the final answer, releases the engine scratch,
    /// and marks the state TERMINATED.
    pub fn terminate(&mut self) -> Result<Vec<u8>> {
        self.check_active("terminate")?;
        let out = self.terminate_partial()?;
        self.engine = None;
        self.kind = StateKind::Terminated;
        Ok(out)
    }

    /// reset returns the state to UNINITIALIZED for reuse by another
    /// group.
    pub fn reset(&mut self) {
        self.engine = None;
        self.kind = StateKind::Uninitialized;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketch_core::quantiles::DoublesSketch;

    fn quantiles_bytes(k: u32, values: &[f64]) -> Vec<u8> {
        let mut sk = DoublesSketch::new(k).unwrap();
        for &v in values {
            sk.update(v);
        }
        encode(&Sketch::Quantiles(sk))
    }

    fn union_bytes(nominal: u32, keys: &[&[u8]]) -> Vec<u8> {
        let mut u = Union::new(nominal).unwrap();
        for k in keys {
            u.update_item(k);
        }
        encode(&Sketch::SetUnion(u.result(false)))
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 0).unwrap();
        let err = state.merge_bytes(None).unwrap_err();
        assert!(matches!(err, UdafError::State(_)), "got {:?}", err);

        state.init();
        state.merge_bytes(None).unwrap();
        state.terminate().unwrap();

        let err = state.merge_bytes(Some(&[0u8; 32])).unwrap_err();
        assert!(matches!(err, UdafError::State(_)), "got {:?}", err);
    }

    #[test]
    fn test_bad_parameter_fails_at_setup() {
        let err = AggregationState::new(SketchFamily::SetUnion, 100).unwrap_err();
        assert!(matches!(err, UdafError::Sketch(_)), "got {:?}", err);
    }

    #[test]
    fn test_zero_row_group_terminates_to_empty_sketch() {
        let mut state = AggregationState::new(SketchFamily::Quantiles, 128).unwrap();
        state.init();
        let bytes = state.terminate().unwrap();
        match decode(&bytes).unwrap() {
            Some(Sketch::Quantiles(sk)) => {
                assert!(sk.is_empty());
                assert_eq!(sk.k(), 128);
            }
            other => panic!("expected empty quantiles sketch, got {:?}", other),
        }
    }

    #[test]
    fn test_absent_inputs_are_noops() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 0).unwrap();
        state.init();
        state.merge_bytes(None).unwrap();
        state.merge_bytes(Some(&[1, 2, 3, 4])).unwrap();
        assert!(state.is_empty());
    }

    #[test]
    fn test_terminate_partial_is_idempotent_and_non_destructive() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 16).unwrap();
        state.init();
        state.update_item(b"a").unwrap();
        state.update_item(b"b").unwrap();

        let first = state.terminate_partial().unwrap();
        let second = state.terminate_partial().unwrap();
        assert_eq!(first, second);
        assert_eq!(state.kind(), StateKind::Active);

        // Still accepts input after the flush.
        state.update_item(b"c").unwrap();
        let third = state.terminate_partial().unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_family_mismatch_is_corrupt() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 0).unwrap();
        state.init();
        state.update_item(b"x").unwrap();
        let err = state
            .merge_bytes(Some(&quantiles_bytes(128, &[1.0])))
            .unwrap_err();
        assert!(
            matches!(err, UdafError::Sketch(SketchError::CorruptSketch(_))),
            "got {:?}",
            err
        );
    }

    #[test]
    fn test_distinct_count_collapses_equal_float_keys() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 16).unwrap();
        state.init();
        state.update_value(0.0).unwrap();
        state.update_value(-0.0).unwrap();
        state.update_value(f64::NAN).unwrap();
        state.update_value(-f64::NAN).unwrap();

        let bytes = state.terminate().unwrap();
        match decode(&bytes).unwrap() {
            Some(Sketch::SetUnion(sk)) => {
                // Signed zeros are one item; all NaN payloads are one item.
                assert_eq!(sk.retained_items(), 2);
            }
            other => panic!("expected set-union sketch, got {:?}", other),
        }
    }

    #[test]
    fn test_raw_keys_rejected_for_quantiles() {
        let mut state = AggregationState::new(SketchFamily::Quantiles, 0).unwrap();
        state.init();
        let err = state.update_item(b"x").unwrap_err();
        assert!(matches!(err, UdafError::Argument(_)), "got {:?}", err);
    }

    #[test]
    fn test_update_then_merge_quantiles() {
        let mut state = AggregationState::new(SketchFamily::Quantiles, 256).unwrap();
        state.init();
        state.update_value(1.0).unwrap();
        state
            .merge_bytes(Some(&quantiles_bytes(256, &[2.0])))
            .unwrap();

        let bytes = state.terminate().unwrap();
        match decode(&bytes).unwrap() {
            Some(Sketch::Quantiles(sk)) => {
                assert_eq!(sk.k(), 256);
                assert_eq!(sk.retained_items(), 2);
                assert_eq!(sk.min_value(), 1.0);
                assert_eq!(sk.max_value(), 2.0);
            }
            other => panic!("expected quantiles sketch, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_heterogeneous_union_capacities() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 16).unwrap();
        state.init();
        state
            .merge_bytes(Some(&union_bytes(64, &[b"a", b"b", b"c"])))
            .unwrap();
        state.merge_bytes(Some(&union_bytes(16, &[b"c", b"d"]))).unwrap();

        let bytes = state.terminate().unwrap();
        match decode(&bytes).unwrap() {
            Some(Sketch::SetUnion(sk)) => {
                assert_eq!(sk.retained_items(), 4);
            }
            other => panic!("expected set-union sketch, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut state = AggregationState::new(SketchFamily::SetUnion, 0).unwrap();
        state.init();
        state.update_item(b"a").unwrap();
        state.reset();
        assert_eq!(state.kind(), StateKind::Uninitialized);
        assert!(state.is_empty());
    }
}
