use crate::network::{Gradients, Parameters};
use ndarray::Array2;

// Updates parameters from gradients, either with plain gradient descent or with heavy-ball
// momentum.
#[derive(Clone, Debug)]
pub struct Optimizer {
    learning_rate: f64,
    momentum: Option<Momentum>,
}

// Exponential moving average of past gradients, one accumulator per parameter tensor. The
// accumulators start at zero and are created on the first update.
#[derive(Clone, Debug)]
pub struct Momentum {
    beta: f64,
    velocity: Option<[Array2<f64>; 4]>,
}

impl Optimizer {
    pub fn gradient_descent(learning_rate: f64) -> Optimizer {
        Optimizer {
            learning_rate,
            momentum: None,
        }
    }

    pub fn momentum(learning_rate: f64, beta: f64) -> Optimizer {
        Optimizer {
            learning_rate,
            momentum: Some(Momentum::new(beta)),
        }
    }

    pub fn step(&mut self, parameters: &mut Parameters, gradients: &Gradients) {
        let learning_rate = self.learning_rate;
        match &mut self.momentum {
            None => {
                let tensors = parameters.tensors_mut().into_iter();
                for (parameter, gradient) in tensors.zip(gradients.tensors()) {
                    parameter.scaled_add(-learning_rate, gradient);
                }
            }
            Some(momentum) => {
                let velocity = momentum.update(gradients);
                for (parameter, velocity) in parameters.tensors_mut().into_iter().zip(velocity) {
                    parameter.scaled_add(-learning_rate, velocity);
                }
            }
        }
    }
}

impl Momentum {
    pub fn new(beta: f64) -> Momentum {
        Momentum { beta, velocity: None }
    }

    // V <- beta * V + (1 - beta) * gradient, for every tensor.
    pub fn update(&mut self, gradients: &Gradients) -> &[Array2<f64>; 4] {
        let beta = self.beta;
        let velocity = self.velocity.get_or_insert_with(|| {
            gradients
                .tensors()
                .map(|gradient| Array2::zeros(gradient.raw_dim()))
        });

        for (velocity, gradient) in velocity.iter_mut().zip(gradients.tensors()) {
            velocity.mapv_inplace(|v| v * beta);
            velocity.scaled_add(1.0 - beta, gradient);
        }

        velocity
    }

    pub fn velocity(&self) -> Option<&[Array2<f64>; 4]> {
        self.velocity.as_ref()
    }
}
