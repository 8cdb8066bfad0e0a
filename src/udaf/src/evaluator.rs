//! Phase-aware evaluator.
//!
//! One evaluator instance serves one aggregation mode. The phase is an
//! explicit enum and every row-level entry point checks it, so the
//! transition table lives in one place instead of being spread across
//! per-phase subtypes.

use tracing::debug;

use sketch_core::quantiles::resolve_k;
use sketch_core::theta::resolve_nominal_entries;
use sketch_core::SketchFamily;

use crate::descriptor::{check_single_binary, ColumnDescriptor, PrimitiveType};
use crate::error::{Result, UdafError};
use crate::state::AggregationState;

/// Phase of the map/combine/reduce pipeline this evaluator runs in.
/// `Complete` collapses the whole pipeline into a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Partial1,
    Partial2,
    Final,
    Complete,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Partial1 => "PARTIAL1",
            Phase::Partial2 => "PARTIAL2",
            Phase::Final => "FINAL",
            Phase::Complete => "COMPLETE",
        }
    }

    /// consumes_rows is true for phases fed raw input rows.
    pub fn consumes_rows(self) -> bool {
        matches!(self, Phase::Partial1 | Phase::Complete)
    }

    /// merges_partials is true for phases fed serialized partial states.
    pub fn merges_partials(self) -> bool {
        matches!(self, Phase::Partial2 | Phase::Final)
    }

    /// produces_final is true for phases whose output is the answer rather
    /// than an intermediate state.
    pub fn produces_final(self) -> bool {
        matches!(self, Phase::Final | Phase::Complete)
    }
}

#[derive(Debug)]
pub struct Evaluator {
    family: SketchFamily,
    phase: Phase,
    target_param: u32,
}

impl Evaluator {
    /// new validates the argument signature and the optional target
    /// parameter (capacity or k; zero means the family default). All
    /// failures happen here, before any row is processed.
    pub fn new(
        family: SketchFamily,
        phase: Phase,
        args: &[ColumnDescriptor],
        target_param: u32,
    ) -> Result<Self> {
        check_single_binary(args)?;
        match family {
            SketchFamily::SetUnion => {
                resolve_nominal_entries(target_param)?;
            }
            SketchFamily::Quantiles => {
                resolve_k(target_param)?;
            }
        }
        debug!(
            family = family.name(),
            phase = phase.name(),
            target_param,
            "evaluator ready"
        );
        Ok(Self {
            family,
            phase,
            target_param,
        })
    }

    pub fn family(&self) -> SketchFamily {
        self.family
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase emits a single binary column: an intermediate state for
    /// the partial phases, the final sketch otherwise.
    pub fn output_descriptor(&self) -> ColumnDescriptor {
        ColumnDescriptor::Primitive(PrimitiveType::Binary)
    }

    /// init_state creates the ACTIVE per-group state.
    pub fn init_state(&self) -> Result<AggregationState> {
        let mut state = AggregationState::new(self.family, self.target_param)?;
        state.init();
        Ok(state)
    }

    fn check_phase(&self, op: &str, allowed: bool) -> Result<()> {
        if allowed {
            Ok(())
        } else {
            Err(UdafError::State(format!(
                "{} not valid in phase {}",
                op,
                self.phase.name()
            )))
        }
    }

    /// iterate folds one input row carrying serialized sketch bytes.
    /// Absent rows are no-ops.
    pub fn iterate(&self, state: &mut AggregationState, row: Option<&[u8]>) -> Result<()> {
        self.check_phase("iterate", self.phase.consumes_rows())?;
        state.merge_bytes(row)
    }

    /// iterate_value folds one raw un-sketched value.
    pub fn iterate_value(&self, state: &mut AggregationState, row: Option<f64>) -> Result<()> {
        self.check_phase("iterate", self.phase.consumes_rows())?;
        match row {
            Some(v) => state.update_value(v),
            None => Ok(()),
        }
    }

    /// merge folds one serialized partial state produced by an upstream
    /// PARTIAL1 or PARTIAL2 instance.
    pub fn merge(&self, state: &mut AggregationState, partial: Option<&[u8]>) -> Result<()> {
        self.check_phase("merge", self.phase.merges_partials())?;
        state.merge_bytes(partial)
    }

    /// terminate_partial reads out an intermediate state; the group keeps
    /// accepting input afterwards.
    pub fn terminate_partial(&self, state: &AggregationState) -> Result<Vec<u8>> {
        self.check_phase("terminate_partial", !self.phase.produces_final())?;
        state.terminate_partial()
    }

    /// terminate reads out the final answer and retires the state.
    pub fn terminate(&self, state: &mut AggregationState) -> Result<Vec<u8>> {
        self.check_phase("terminate", self.phase.produces_final())?;
        state.terminate()
    }

    /// close releases the group's state for reuse.
    pub fn close(&self, state: &mut AggregationState) {
        state.reset();
    }
}
