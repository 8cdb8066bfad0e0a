//! Protocol driver running the full PARTIAL1 -> PARTIAL2 -> FINAL
//! sequence over in-memory partitions. The production host supplies its
//! own scheduling; this driver exists to exercise the same phase protocol
//! end to end and to prove the answer is independent of the combine
//! topology.

use tracing::debug;

use sketch_core::SketchFamily;

use crate::descriptor::{ColumnDescriptor, PrimitiveType};
use crate::error::Result;
use crate::evaluator::{Evaluator, Phase};

pub struct PipelineDriver {
    family: SketchFamily,
    target_param: u32,
}

impl PipelineDriver {
    pub fn new(family: SketchFamily, target_param: u32) -> Result<Self> {
        // Constructing a throwaway evaluator validates the parameter once
        // for the whole pipeline.
        Evaluator::new(family, Phase::Partial1, &Self::signature(), target_param)?;
        Ok(Self {
            family,
            target_param,
        })
    }

    fn signature() -> [ColumnDescriptor; 1] {
        [ColumnDescriptor::Primitive(PrimitiveType::Binary)]
    }

    fn evaluator(&self, phase: Phase) -> Result<Evaluator> {
        Evaluator::new(self.family, phase, &Self::signature(), self.target_param)
    }

    /// run drives serialized sketch rows through all three phases. Each
    /// inner vector is one map-side partition; rows may be absent.
    pub fn run(&self, partitions: &[Vec<Option<Vec<u8>>>]) -> Result<Vec<u8>> {
        let eval = self.evaluator(Phase::Partial1)?;
        let mut partials = Vec::with_capacity(partitions.len());
        for rows in partitions {
            let mut state = eval.init_state()?;
            for row in rows {
                eval.iterate(&mut state, row.as_deref())?;
            }
            partials.push(eval.terminate_partial(&state)?);
            eval.close(&mut state);
        }
        debug!(partials = partials.len(), "local combine finished");

        self.reduce(partials)
    }

    /// run_values is the raw-input variant of `run` for un-sketched rows.
    pub fn run_values(&self, partitions: &[Vec<Option<f64>>]) -> Result<Vec<u8>> {
        let eval = self.evaluator(Phase::Partial1)?;
        let mut partials = Vec::with_capacity(partitions.len());
        for rows in partitions {
            let mut state = eval.init_state()?;
            for row in rows {
                eval.iterate_value(&mut state, *row)?;
            }
            partials.push(eval.terminate_partial(&state)?);
            eval.close(&mut state);
        }

        self.reduce(partials)
    }

    /// reduce runs PARTIAL2 over pairs of partials until one remains,
    /// then FINAL over the survivors. The pairing is arbitrary; any
    /// topology yields the same answer.
    fn reduce(&self, mut partials: Vec<Vec<u8>>) -> Result<Vec<u8>> {
        let eval = self.evaluator(Phase::Partial2)?;
        while partials.len() > 2 {
            let mut next = Vec::with_capacity((partials.len() + 1) / 2);
            for pair in partials.chunks(2) {
                let mut state = eval.init_state()?;
                for partial in pair {
                    eval.merge(&mut state, Some(partial))?;
                }
                next.push(eval.terminate_partial(&state)?);
                eval.close(&mut state);
            }
            debug!(level_size = next.len(), "combine level finished");
            partials = next;
        }

        let eval = self.evaluator(Phase::Final)?;
        let mut state = eval.init_state()?;
        for partial in &partials {
            eval.merge(&mut state, Some(partial))?;
        }
        eval.terminate(&mut state)
    }
}
