//! Per-map execution: evaluates a compiled expression against its
//! sources' latest values and hands the result to the transport layer
//! (spec §4.I).

use tracing::trace;

use crate::error::{DropReason, EvalOutcome};
use crate::expr::{Evaluator, Inputs, Program};
use crate::signal::value::Sample;
use crate::time::TimeTag;

/// A running map: its compiled program plus the evaluator state needed to
/// tick it. Owned by the device that evaluates it (process location SRC
/// or DST per the map's configuration).
pub struct MapPipeline {
    program: Program,
    evaluator: Evaluator,
    inputs: Inputs,
    /// For a convergent map (N>1 sources), tracks which sources have
    /// reported since the last fire.
    reported: Vec<bool>,
    /// Whether forwarding is currently suppressed (spec §6 map config
    /// `muted`).
    muted: bool,
    /// Whether this map propagates per-instance updates; if false, any
    /// update tagged with a non-default instance id is rejected rather
    /// than evaluated (spec §6 map config `use_instances`).
    use_instances: bool,
}

impl MapPipeline {
    /// Build a pipeline from a freshly compiled program, unmuted and
    /// accepting every instance.
    pub fn new(program: Program) -> Self {
        Self::with_options(program, false, true)
    }

    /// Build a pipeline with explicit mute/instance-propagation options.
    pub fn with_options(program: Program, muted: bool, use_instances: bool) -> Self {
        let inputs = Inputs::for_program(&program);
        let reported = vec![false; program.input_history.len()];
        Self {
            program,
            evaluator: Evaluator::new(),
            inputs,
            reported,
            muted,
            use_instances,
        }
    }

    /// The compiled program this pipeline runs.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Diagnostic count of ticks that produced no destination sample.
    pub fn drop_count(&self) -> u64 {
        self.evaluator.drop_count
    }

    /// Whether this pipeline is currently suppressing evaluation.
    pub fn is_muted(&self) -> bool {
        self.muted
    }

    /// Suppress or resume evaluation.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Record a new value for source `idx` and, if every required source
    /// has reported since the last fire, evaluate the program.
    ///
    /// A single-source map (the common case) always fires immediately.
    /// Multi-source ("convergent") maps buffer per-source latest values
    /// and only fire once every source has been updated at least once
    /// since the last fire (spec §4.I "Convergent maps"), unless the
    /// program's history operators tolerate stale inputs — approximated
    /// here by firing whenever any source with nonzero required history
    /// depth reports, since such a source already tolerates staleness by
    /// construction.
    pub fn on_source_update(&mut self, idx: usize, instance: u64, sample: Sample, now: TimeTag) -> Option<EvalOutcome<Sample>> {
        if !self.use_instances && instance != 0 {
            return Some(EvalOutcome::Dropped(DropReason::InstanceFiltered));
        }
        if self.muted {
            return Some(EvalOutcome::Dropped(DropReason::Muted));
        }

        let depth = self.program.input_history.get(idx).copied().unwrap_or(0);
        self.inputs.push_source(idx, sample, depth);

        if idx < self.reported.len() {
            self.reported[idx] = true;
        }

        let tolerant = self.program.input_history.iter().any(|&d| d > 0);
        let ready = tolerant || self.reported.iter().all(|&r| r);
        if !ready {
            trace!(source = idx, "convergent map awaiting other sources");
            return Some(EvalOutcome::Dropped(DropReason::AwaitingSources));
        }

        let outcome = self.evaluator.evaluate(&self.program, &mut self.inputs, now);
        if !tolerant {
            self.reported.iter_mut().for_each(|r| *r = false);
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DslDialect;
    use crate::expr::compiler::{compile, InputSchema, SourceSchema};
    use crate::signal::value::ValueType;

    #[test]
    fn convergent_map_fires_once_all_sources_report() {
        // spec §8 scenario 2: three-source convergent map.
        let schema = InputSchema {
            sources: vec![
                SourceSchema {
                    value_type: ValueType::Float64,
                    length: 1,
                };
                3
            ],
            output: SourceSchema {
                value_type: ValueType::Float64,
                length: 1,
            },
        };
        let program = compile("y=-x0-x1-x2", DslDialect::Extended, &schema).unwrap();
        let mut pipeline = MapPipeline::new(program);

        assert_eq!(
            pipeline.on_source_update(0, 0, Sample::new(ValueType::Float64, vec![1.0], TimeTag::now()), TimeTag::now()),
            Some(EvalOutcome::Dropped(DropReason::AwaitingSources))
        );
        assert_eq!(
            pipeline.on_source_update(1, 0, Sample::new(ValueType::Float64, vec![2.0], TimeTag::now()), TimeTag::now()),
            Some(EvalOutcome::Dropped(DropReason::AwaitingSources))
        );
        let outcome = pipeline
            .on_source_update(2, 0, Sample::new(ValueType::Float64, vec![3.0], TimeTag::now()), TimeTag::now())
            .unwrap();
        match outcome {
            EvalOutcome::Produced(s) => assert_eq!(s.data, vec![-6.0]),
            EvalOutcome::Dropped(r) => panic!("unexpected drop: {r:?}"),
        }
    }
}
