use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    Result, StateError,
    config::{FromConfig, TrainingConfig},
    rule::{Metric, UpdateRule},
    state::OptimizerState,
};

/// Iteration controls of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub stepsize: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub seed: Option<u64>,
}

impl From<&TrainingConfig> for Settings {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            stepsize: config.stepsize,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
            seed: config.seed,
        }
    }
}

/// The outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunReport<R: UpdateRule> {
    pub state: OptimizerState<R>,
    pub metrics: Vec<Metric>,
    pub converged: bool,
}

/// Drives whole iterations: one worker per shard folds its rows into a copy of
/// the current state, the partial states are merged pairwise and the result is
/// finalized once.
#[derive(Debug, Clone)]
pub struct Coordinator<R: UpdateRule> {
    rule: R,
    shape: R::Shape,
    settings: Settings,
}

impl<R: UpdateRule> Coordinator<R> {
    pub fn new(rule: R, shape: R::Shape, settings: Settings) -> Self {
        Self {
            rule,
            shape,
            settings,
        }
    }

    /// Creates a new `Coordinator` from a validated configuration.
    pub fn from_config(config: &TrainingConfig) -> Result<Self>
    where
        R: FromConfig,
    {
        config.validate()?;
        let (rule, shape) = R::from_config(&config.variant)?;
        Ok(Self::new(rule, shape, Settings::from(config)))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Allocates and seeds the state of the first iteration.
    pub fn initial_state(&self) -> Result<OptimizerState<R>> {
        let mut state = OptimizerState::allocate(self.rule.clone(), &self.shape)?;
        state.initialize(self.settings.stepsize, self.settings.seed)?;
        Ok(state)
    }

    /// Runs one iteration over every shard.
    ///
    /// # Arguments
    /// * `state` - The state at the start of the iteration, with a reset algo state.
    /// * `shards` - The rows of each worker.
    ///
    /// # Returns
    /// The state of the next iteration and the metric of this one. On error
    /// `state` is left as it was.
    pub fn iterate(
        &self,
        state: &OptimizerState<R>,
        shards: &[Vec<R::Row>],
    ) -> Result<(OptimizerState<R>, Metric)> {
        let merged = shards
            .par_iter()
            .map(|shard| {
                let mut worker = state.clone();
                for row in shard {
                    worker.transition(row)?;
                }
                debug!(rows = shard.len(); "worker folded its shard");
                Ok::<_, StateError>(worker)
            })
            .try_reduce_with(|a, b| a.merge(b))
            .ok_or(StateError::EmptyIteration)?;

        let mut next = merged?;
        let metric = next.finalize()?;
        Ok((next, metric))
    }

    /// Iterates until the relative change of the metric drops below the
    /// tolerance or the iteration budget runs out.
    pub fn run(&self, shards: &[Vec<R::Row>]) -> Result<RunReport<R>> {
        let mut state = self.initial_state()?;
        let mut metrics: Vec<Metric> = Vec::with_capacity(self.settings.max_iterations);
        let mut converged = false;

        for iteration in 0..self.settings.max_iterations {
            let (next, metric) = self.iterate(&state, shards)?;
            state = next;

            info!(
                variant = R::NAME,
                iteration = iteration,
                metric = metric.value;
                "iteration done"
            );

            if let Some(previous) = metrics.last() {
                let change = relative_change(previous.value, metric.value);
                if change <= self.settings.tolerance {
                    converged = true;
                }
            }

            metrics.push(metric);
            if converged {
                break;
            }
        }

        if !converged {
            warn!(
                variant = R::NAME,
                iterations = metrics.len();
                "iteration budget exhausted before convergence"
            );
        }

        Ok(RunReport {
            state,
            metrics,
            converged,
        })
    }
}

/// Change between two metrics, relative to their magnitude when it exceeds
/// one and absolute otherwise.
fn relative_change(previous: f64, current: f64) -> f64 {
    let scale = previous.abs().max(current.abs()).max(1.0);
    (previous - current).abs() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_change_is_symmetric() {
        assert_eq!(relative_change(0.0, 0.0), 0.0);
        assert_eq!(relative_change(2.0, 1.0), 0.5);
        assert_eq!(relative_change(1.0, 2.0), 0.5);
        assert!(relative_change(1e-30, 3e-30) < 1e-29);
        assert!(relative_change(1.0, f64::NAN).is_nan());
    }
}
