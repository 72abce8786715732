//! Fixed-topology feed-forward network with hard-threshold activations.
//!
//! Each [`Level`] maps `inputs` nodes onto `outputs` nodes through a dense
//! weight matrix indexed `[input][output]` plus one bias per output. An output
//! fires (1.0) when its bias plus the weighted input sum is strictly positive
//! and stays at 0.0 otherwise, so the network emits binary control decisions.

use rand::{Rng, RngCore};
use selfdrive_core::ShapeError;
use serde::{Deserialize, Serialize};

use crate::{Brain, BrainKind, into_runner};

const WEIGHT_RANGE: std::ops::RangeInclusive<f64> = -1.0..=1.0;

/// Serialized form of a [`Level`]; checked on the way back in.
#[derive(Serialize, Deserialize)]
struct LevelParts {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

/// One fully-connected layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LevelParts", into = "LevelParts")]
pub struct Level {
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
    outputs: Vec<f64>,
}

impl Level {
    /// Level with every weight and bias at zero.
    #[must_use]
    pub fn zeroed(inputs: usize, outputs: usize) -> Self {
        Self {
            weights: vec![vec![0.0; outputs]; inputs],
            biases: vec![0.0; outputs],
            outputs: vec![0.0; outputs],
        }
    }

    /// Level with weights and biases drawn uniformly from `[-1, 1]`.
    #[must_use]
    pub fn random(inputs: usize, outputs: usize, rng: &mut dyn RngCore) -> Self {
        let mut level = Self::zeroed(inputs, outputs);
        for row in &mut level.weights {
            for weight in row.iter_mut() {
                *weight = rng.random_range(WEIGHT_RANGE);
            }
        }
        for bias in &mut level.biases {
            *bias = rng.random_range(WEIGHT_RANGE);
        }
        level
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.weights.len()
    }

    #[must_use]
    pub fn output_size(&self) -> usize {
        self.biases.len()
    }

    /// Weight matrix indexed `[input][output]`.
    #[must_use]
    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    #[must_use]
    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    /// Activations from the most recent evaluation.
    #[must_use]
    pub fn outputs(&self) -> &[f64] {
        &self.outputs
    }

    /// Replace the weight matrix; its shape must match the current one.
    pub fn set_weights(&mut self, weights: Vec<Vec<f64>>) -> Result<(), ShapeError> {
        check_weights(&weights, self.input_size(), self.output_size())?;
        self.weights = weights;
        Ok(())
    }

    /// Replace the bias vector; its length must match the output count.
    pub fn set_biases(&mut self, biases: Vec<f64>) -> Result<(), ShapeError> {
        if biases.len() != self.output_size() {
            return Err(ShapeError::BiasLength {
                expected: self.output_size(),
                actual: biases.len(),
            });
        }
        self.biases = biases;
        Ok(())
    }

    /// Evaluate this level, storing and returning its activations.
    pub fn feed_forward(&mut self, inputs: &[f64]) -> Result<&[f64], ShapeError> {
        if inputs.len() != self.input_size() {
            return Err(ShapeError::InputLength {
                expected: self.input_size(),
                actual: inputs.len(),
            });
        }
        for (j, output) in self.outputs.iter_mut().enumerate() {
            let sum = inputs
                .iter()
                .zip(&self.weights)
                .fold(self.biases[j], |acc, (input, row)| acc + input * row[j]);
            *output = if sum > 0.0 { 1.0 } else { 0.0 };
        }
        Ok(&self.outputs)
    }

    fn mutate(&mut self, rng: &mut dyn RngCore, amount: f64) {
        let mut nudge = |value: &mut f64| {
            let target = rng.random_range(WEIGHT_RANGE);
            *value += (target - *value) * amount;
        };
        self.biases.iter_mut().for_each(&mut nudge);
        self.weights
            .iter_mut()
            .flat_map(|row| row.iter_mut())
            .for_each(&mut nudge);
    }
}

fn check_weights(weights: &[Vec<f64>], rows: usize, columns: usize) -> Result<(), ShapeError> {
    if weights.len() != rows {
        return Err(ShapeError::WeightRows {
            expected: rows,
            actual: weights.len(),
        });
    }
    if let Some((row, bad)) = weights
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != columns)
    {
        return Err(ShapeError::WeightColumns {
            row,
            expected: columns,
            actual: bad.len(),
        });
    }
    Ok(())
}

impl TryFrom<LevelParts> for Level {
    type Error = ShapeError;

    fn try_from(parts: LevelParts) -> Result<Self, Self::Error> {
        let outputs = parts.biases.len();
        let rows = parts.weights.len();
        check_weights(&parts.weights, rows, outputs)?;
        Ok(Self {
            weights: parts.weights,
            biases: parts.biases,
            outputs: vec![0.0; outputs],
        })
    }
}

impl From<Level> for LevelParts {
    fn from(level: Level) -> Self {
        Self {
            weights: level.weights,
            biases: level.biases,
        }
    }
}

/// Ordered stack of levels; topology is fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NetworkParts", into = "NetworkParts")]
pub struct NeuralNetwork {
    levels: Vec<Level>,
}

#[derive(Serialize, Deserialize)]
struct NetworkParts {
    levels: Vec<Level>,
}

impl TryFrom<NetworkParts> for NeuralNetwork {
    type Error = ShapeError;

    fn try_from(parts: NetworkParts) -> Result<Self, Self::Error> {
        Self::from_levels(parts.levels)
    }
}

impl From<NeuralNetwork> for NetworkParts {
    fn from(network: NeuralNetwork) -> Self {
        Self {
            levels: network.levels,
        }
    }
}

impl NeuralNetwork {
    /// Trait identifier for this brain family.
    pub const KIND: BrainKind = BrainKind::new("ff.threshold");

    /// Randomly initialised network for layer sizes `[n0, n1, ..., nk]`.
    pub fn random(topology: &[usize], rng: &mut dyn RngCore) -> Result<Self, ShapeError> {
        validate_topology(topology)?;
        let levels = topology
            .windows(2)
            .map(|pair| Level::random(pair[0], pair[1], rng))
            .collect();
        Ok(Self { levels })
    }

    /// Network with all weights and biases at zero.
    pub fn zeroed(topology: &[usize]) -> Result<Self, ShapeError> {
        validate_topology(topology)?;
        let levels = topology
            .windows(2)
            .map(|pair| Level::zeroed(pair[0], pair[1]))
            .collect();
        Ok(Self { levels })
    }

    /// Assemble externally supplied levels, checking that they chain.
    pub fn from_levels(levels: Vec<Level>) -> Result<Self, ShapeError> {
        let Some(first) = levels.first() else {
            return Err(ShapeError::EmptyTopology);
        };
        let mut topology = vec![first.input_size()];
        for (index, level) in levels.iter().enumerate() {
            let expected = topology[index];
            if level.input_size() != expected {
                return Err(ShapeError::LayerLink {
                    index,
                    expected,
                    actual: level.input_size(),
                });
            }
            topology.push(level.output_size());
        }
        validate_topology(&topology)?;
        Ok(Self { levels })
    }

    /// Layer sizes, input layer first.
    #[must_use]
    pub fn topology(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.levels.len() + 1);
        if let Some(first) = self.levels.first() {
            sizes.push(first.input_size());
        }
        sizes.extend(self.levels.iter().map(Level::output_size));
        sizes
    }

    #[must_use]
    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    /// Level access for overwriting weights; shapes stay fixed.
    pub fn levels_mut(&mut self) -> &mut [Level] {
        &mut self.levels
    }

    /// Run `inputs` through every level and return the final activations.
    pub fn feed_forward(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError> {
        let mut signal = inputs.to_vec();
        for level in &mut self.levels {
            signal = level.feed_forward(&signal)?.to_vec();
        }
        Ok(signal)
    }

    /// Lerp every weight and bias towards a fresh random value by `amount`
    /// (0 keeps the network, 1 replaces it). Shapes are preserved.
    pub fn mutate(&mut self, rng: &mut dyn RngCore, amount: f64) {
        for level in &mut self.levels {
            level.mutate(rng, amount);
        }
    }

    /// Box this network for attachment to a vehicle.
    #[must_use]
    pub fn runner(self) -> Box<dyn selfdrive_core::BrainRunner> {
        into_runner(self)
    }
}

/// Free-function form of [`NeuralNetwork::feed_forward`].
pub fn feed_forward(inputs: &[f64], network: &mut NeuralNetwork) -> Result<Vec<f64>, ShapeError> {
    network.feed_forward(inputs)
}

fn validate_topology(topology: &[usize]) -> Result<(), ShapeError> {
    if topology.len() < 2 {
        return Err(ShapeError::EmptyTopology);
    }
    if let Some(index) = topology.iter().position(|&size| size == 0) {
        return Err(ShapeError::ZeroSizedLayer { index });
    }
    Ok(())
}

impl Brain for NeuralNetwork {
    fn kind(&self) -> BrainKind {
        Self::KIND
    }

    fn input_size(&self) -> usize {
        self.levels.first().map_or(0, Level::input_size)
    }

    fn output_size(&self) -> usize {
        self.levels.last().map_or(0, Level::output_size)
    }

    fn tick(&mut self, inputs: &[f64]) -> Result<Vec<f64>, ShapeError> {
        self.feed_forward(inputs)
    }

    fn mutate(&mut self, rng: &mut dyn RngCore, amount: f64) {
        NeuralNetwork::mutate(self, rng, amount);
    }
}
