//! Traits and baseline implementations for selfdrive brains.

use rand::RngCore;
use selfdrive_core::{BrainRunner, ShapeError};
use std::any::Any;

pub mod network;

pub use network::{Level, NeuralNetwork, feed_forward};

/// Stable identifier for a brain family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrainKind(&'static str);

impl BrainKind {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

/// Shared interface implemented by all vehicle brains.
pub trait Brain: Send + Sync + 'static {
    /// Immutable brain identifier (useful for analytics).
    fn kind(&self) -> BrainKind;

    fn input_size(&self) -> usize;

    fn output_size(&self) -> usize;

    /// Evaluate brain outputs given the latest sensor input vector.
    fn tick(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError>;

    /// Perturb parameters in place; `amount` of 0 leaves them unchanged.
    fn mutate(&mut self, rng: &mut dyn RngCore, amount: f64);
}

/// Bridges a [`Brain`] onto core's [`BrainRunner`] trait object.
#[derive(Debug, Clone)]
pub struct BrainRunnerAdapter<B: Brain> {
    pub brain: B,
}

impl<B: Brain> BrainRunner for BrainRunnerAdapter<B> {
    fn kind(&self) -> &'static str {
        self.brain.kind().as_str()
    }

    fn input_size(&self) -> usize {
        self.brain.input_size()
    }

    fn output_size(&self) -> usize {
        self.brain.output_size()
    }

    fn tick(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError> {
        self.brain.tick(inputs)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Box a brain for attachment to a vehicle.
#[must_use]
pub fn into_runner<B: Brain>(brain: B) -> Box<dyn BrainRunner> {
    Box::new(BrainRunnerAdapter { brain })
}

/// Recover the concrete brain behind a runner produced by [`into_runner`].
#[must_use]
pub fn downcast_brain<B: Brain>(runner: &dyn BrainRunner) -> Option<&B> {
    runner
        .as_any()
        .downcast_ref::<BrainRunnerAdapter<B>>()
        .map(|adapter| &adapter.brain)
}

/// Mutable counterpart of [`downcast_brain`].
pub fn downcast_brain_mut<B: Brain>(runner: &mut dyn BrainRunner) -> Option<&mut B> {
    runner
        .as_any_mut()
        .downcast_mut::<BrainRunnerAdapter<B>>()
        .map(|adapter| &mut adapter.brain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn runner_bridge_executes() {
        let mut rng = SmallRng::seed_from_u64(42);
        let network = NeuralNetwork::random(&[5, 6, 4], &mut rng).expect("network");
        let mut runner = into_runner(network);
        assert_eq!(runner.kind(), NeuralNetwork::KIND.as_str());
        assert_eq!(runner.input_size(), 5);
        assert_eq!(runner.output_size(), 4);
        let outputs = runner.tick(&[0.0; 5]).expect("tick");
        assert_eq!(outputs.len(), 4);
        assert!(outputs.iter().all(|v| *v == 0.0 || *v == 1.0));
    }

    #[test]
    fn downcast_recovers_network() {
        let mut rng = SmallRng::seed_from_u64(7);
        let network = NeuralNetwork::random(&[3, 4], &mut rng).expect("network");
        let expected = network.clone();
        let mut runner = into_runner(network);

        let recovered = downcast_brain::<NeuralNetwork>(runner.as_ref()).expect("network");
        assert_eq!(recovered, &expected);

        let level = &mut downcast_brain_mut::<NeuralNetwork>(runner.as_mut())
            .expect("network")
            .levels_mut()[0];
        level.set_biases(vec![1.0; 4]).expect("bias shape");
        level.set_weights(vec![vec![0.0; 4]; 3]).expect("weight shape");
        assert_eq!(runner.tick(&[0.3, 0.2, 0.1]).expect("tick"), vec![1.0; 4]);
    }
}
