use ndarray::{Array, Array2, Axis};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::StandardNormal};

// How the weight matrices are scaled after being drawn from a standard normal distribution. Biases
// always start at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Initialization {
    // Raw standard normal weights.
    Unscaled,
    // Each weight matrix multiplied by sqrt(1 / fan_in).
    FanInScaled,
}

// Weights and biases of a network with one sigmoid hidden layer and a softmax output layer. Every
// column of an input matrix is one example.
#[derive(Clone, Debug)]
pub struct Parameters {
    pub w1: Array2<f64>,
    pub b1: Array2<f64>,
    pub w2: Array2<f64>,
    pub b2: Array2<f64>,
}

// Everything the forward pass computes, kept for the backward pass.
#[derive(Clone, Debug)]
pub struct Cache {
    pub z1: Array2<f64>,
    pub a1: Array2<f64>,
    pub z2: Array2<f64>,
    pub a2: Array2<f64>,
}

#[derive(Clone, Debug)]
pub struct Gradients {
    pub dw1: Array2<f64>,
    pub db1: Array2<f64>,
    pub dw2: Array2<f64>,
    pub db2: Array2<f64>,
}

impl Parameters {
    pub fn new<R: Rng + ?Sized>(
        inputs: usize,
        hidden: usize,
        outputs: usize,
        initialization: Initialization,
        rng: &mut R,
    ) -> Parameters {
        let scale = |fan_in: usize| match initialization {
            Initialization::Unscaled => 1.0,
            Initialization::FanInScaled => (1.0 / fan_in as f64).sqrt(),
        };

        Parameters {
            w1: Array2::random_using((hidden, inputs), StandardNormal, rng) * scale(inputs),
            b1: Array::zeros((hidden, 1)),
            w2: Array2::random_using((outputs, hidden), StandardNormal, rng) * scale(hidden),
            b2: Array::zeros((outputs, 1)),
        }
    }

    pub fn zeros(inputs: usize, hidden: usize, outputs: usize) -> Parameters {
        Parameters {
            w1: Array::zeros((hidden, inputs)),
            b1: Array::zeros((hidden, 1)),
            w2: Array::zeros((outputs, hidden)),
            b2: Array::zeros((outputs, 1)),
        }
    }

    // Mutable access to all four tensors, in the same order as Gradients::tensors.
    pub fn tensors_mut(&mut self) -> [&mut Array2<f64>; 4] {
        [&mut self.w1, &mut self.b1, &mut self.w2, &mut self.b2]
    }

    // Run a [inputs x b] matrix through the network. The bias column vectors broadcast across the
    // b columns.
    pub fn forward(&self, input: &Array2<f64>) -> Cache {
        let z1 = self.w1.dot(input) + &self.b1;
        let a1 = z1.mapv(sigmoid);
        let z2 = self.w2.dot(&a1) + &self.b2;
        let a2 = softmax(&z2);
        Cache { z1, a1, z2, a2 }
    }

    // Backpropagate the cross-entropy loss of a batch through the network. Every gradient is
    // averaged over the number of columns in the batch.
    pub fn backward(&self, input: &Array2<f64>, expected: &Array2<f64>, cache: &Cache) -> Gradients {
        let batch = input.ncols() as f64;

        // Softmax followed by cross-entropy collapses to this.
        let dz2 = &cache.a2 - expected;
        let dw2 = dz2.dot(&cache.a1.t()) / batch;
        let db2 = dz2.sum_axis(Axis(1)).insert_axis(Axis(1)) / batch;

        // sigmoid'(z1) = a1 * (1 - a1)
        let dz1 = self.w2.t().dot(&dz2) * &cache.a1.mapv(|a| a * (1.0 - a));
        let dw1 = dz1.dot(&input.t()) / batch;
        let db1 = dz1.sum_axis(Axis(1)).insert_axis(Axis(1)) / batch;

        Gradients { dw1, db1, dw2, db2 }
    }
}

impl Gradients {
    pub fn tensors(&self) -> [&Array2<f64>; 4] {
        [&self.dw1, &self.db1, &self.dw2, &self.db2]
    }
}

// Mean categorical cross-entropy between one-hot expected outputs and predicted distributions.
// There is no clamping, so a predicted probability of exactly 0 gives a non-finite result.
pub fn cross_entropy(expected: &Array2<f64>, predicted: &Array2<f64>) -> f64 {
    -(expected * &predicted.mapv(f64::ln)).sum() / expected.ncols() as f64
}

// Column-wise softmax. Each column is shifted by its maximum before exponentiating, which leaves the
// result unchanged but keeps exp from overflowing on large scores.
pub fn softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = scores.clone();
    for mut column in probabilities.columns_mut() {
        let max = column.fold(f64::NEG_INFINITY, |max, &z| max.max(z));
        column.mapv_inplace(|z| (z - max).exp());
        let sum = column.sum();
        column /= sum;
    }
    probabilities
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + f64::exp(-z))
}
