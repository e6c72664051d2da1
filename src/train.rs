use crate::{
    mnist::{MnistData, permutation},
    network::{Initialization, Parameters, cross_entropy},
    optimizer::Optimizer,
};
use log::{debug, warn};
use ndarray::Array2;
use ndarray_rand::rand::Rng;
use std::ops::Range;

// Every hyperparameter of a training run. Both variants the binary can run are constants below.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingConfig {
    pub hidden_units: usize,
    pub initialization: Initialization,
    pub learning_rate: f64,
    // Decay factor of the gradient moving average, or None for plain gradient descent.
    pub momentum: Option<f64>,
    // Columns per gradient step, or None to use the whole training set every step.
    pub batch_size: Option<usize>,
    pub epochs: usize,
    pub progress: Progress,
}

// How training progress is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    // Print the cost of the last step every nth epoch, counting from 0, and the final cost at the
    // end.
    EveryNth(usize),
    // After every epoch, evaluate the cost on the full training and test sets.
    Evaluated,
}

impl TrainingConfig {
    // Full-batch gradient descent from raw standard normal weights.
    pub const BASELINE: TrainingConfig = TrainingConfig {
        hidden_units: 64,
        initialization: Initialization::Unscaled,
        learning_rate: 1.0,
        momentum: None,
        batch_size: None,
        epochs: 500,
        progress: Progress::EveryNth(100),
    };

    // Mini-batch momentum descent from fan-in scaled weights.
    pub const OPTIMIZED: TrainingConfig = TrainingConfig {
        hidden_units: 64,
        initialization: Initialization::FanInScaled,
        learning_rate: 4.0,
        momentum: Some(0.9),
        batch_size: Some(128),
        epochs: 20,
        progress: Progress::Evaluated,
    };

    pub fn optimizer(&self) -> Optimizer {
        match self.momentum {
            Some(beta) => Optimizer::momentum(self.learning_rate, beta),
            None => Optimizer::gradient_descent(self.learning_rate),
        }
    }
}

// Costs recorded after one epoch. `training` is the cost of the last step for full-batch runs and
// the cost over the whole training set for evaluated runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpochCost {
    pub epoch: usize,
    pub training: f64,
    pub test: Option<f64>,
}

// Contiguous column ranges covering 0..examples, batch_size at a time. The final range holds
// whatever is left over and may be shorter.
pub fn batch_ranges(examples: usize, batch_size: usize) -> impl Iterator<Item = Range<usize>> {
    (0..examples)
        .step_by(batch_size)
        .map(move |begin| begin..(begin + batch_size).min(examples))
}

pub struct Trainer {
    config: TrainingConfig,
    parameters: Parameters,
    optimizer: Optimizer,
}

impl Trainer {
    pub fn new<R: Rng + ?Sized>(
        config: TrainingConfig,
        inputs: usize,
        outputs: usize,
        rng: &mut R,
    ) -> Trainer {
        let parameters = Parameters::new(
            inputs,
            config.hidden_units,
            outputs,
            config.initialization,
            rng,
        );
        Trainer::with_parameters(config, parameters)
    }

    pub fn with_parameters(config: TrainingConfig, parameters: Parameters) -> Trainer {
        Trainer {
            config,
            optimizer: config.optimizer(),
            parameters,
        }
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    // One forward pass, backward pass and parameter update on a batch. Returns the batch cost
    // before the update.
    pub fn step(&mut self, input: &Array2<f64>, expected: &Array2<f64>) -> f64 {
        let cache = self.parameters.forward(input);
        let cost = cross_entropy(expected, &cache.a2);
        let gradients = self.parameters.backward(input, expected, &cache);
        self.optimizer.step(&mut self.parameters, &gradients);
        cost
    }

    // Train for the configured number of epochs, printing progress as configured. Mini-batch runs
    // visit the training set in a fresh random order every epoch.
    pub fn train<R: Rng + ?Sized>(&mut self, data: &MnistData, rng: &mut R) -> Vec<EpochCost> {
        let training = &data.training;
        let mut history = Vec::with_capacity(self.config.epochs);

        if let Some(batch_size) = self.config.batch_size {
            debug!(
                "{} batches of up to {batch_size} examples per epoch",
                training.examples().div_ceil(batch_size)
            );
        }

        for epoch in 0..self.config.epochs {
            let last_cost = match self.config.batch_size {
                None => self.step(&training.images, &training.labels),
                Some(batch_size) => {
                    let order = permutation(training.examples(), rng);
                    let mut cost = f64::NAN;
                    for range in batch_ranges(order.len(), batch_size) {
                        let batch = training.columns(&order[range]);
                        cost = self.step(&batch.images, &batch.labels);
                    }
                    cost
                }
            };

            let record = match self.config.progress {
                Progress::EveryNth(interval) => {
                    if epoch % interval == 0 {
                        println!("Epoch {epoch} cost: {last_cost}");
                    }
                    EpochCost {
                        epoch,
                        training: last_cost,
                        test: None,
                    }
                }
                Progress::Evaluated => {
                    let training_cost = self.cost(&training.images, &training.labels);
                    let test_cost = self.cost(&data.test.images, &data.test.labels);
                    println!(
                        "Epoch {}: training cost = {training_cost}, test cost = {test_cost}.",
                        epoch + 1
                    );
                    EpochCost {
                        epoch: epoch + 1,
                        training: training_cost,
                        test: Some(test_cost),
                    }
                }
            };

            if !record.training.is_finite() || record.test.is_some_and(|cost| !cost.is_finite()) {
                warn!("non-finite cost after epoch {}: {record:?}", record.epoch);
            }
            history.push(record);
        }

        if let (Progress::EveryNth(_), Some(last)) = (self.config.progress, history.last()) {
            println!("Final cost: {}", last.training);
        }

        history
    }

    fn cost(&self, input: &Array2<f64>, expected: &Array2<f64>) -> f64 {
        cross_entropy(expected, &self.parameters.forward(input).a2)
    }
}
