use serde::{Deserialize, Serialize};

/// Per-row objective of a generalized linear model, written in terms of the
/// margin `p = <model, x>` and the label `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlmObjective {
    /// Logistic regression. Labels greater than zero are positive, the rest
    /// are negative.
    Logistic,
    /// Linear regression with loss `0.5 * (p - y)^2`.
    LeastSquares,
    /// Linear SVM with loss `max(0, 1 - y p)` over labels in `{-1, 1}`.
    Hinge,
}

use GlmObjective::*;

fn sign(y: f64) -> f64 {
    if y > 0.0 { 1.0 } else { -1.0 }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// `ln(1 + e^z)` without overflowing for large `z`.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

impl GlmObjective {
    /// Returns the loss of one row.
    pub fn loss(&self, p: f64, y: f64) -> f64 {
        match self {
            Logistic => softplus(-sign(y) * p),
            LeastSquares => 0.5 * (p - y).powi(2),
            Hinge => (1.0 - sign(y) * p).max(0.0),
        }
    }

    /// Returns the derivative of the loss with respect to the margin.
    ///
    /// The row gradient is `slope * x`.
    pub fn slope(&self, p: f64, y: f64) -> f64 {
        match self {
            Logistic => {
                let y = sign(y);
                -y * sigmoid(-y * p)
            }
            LeastSquares => p - y,
            Hinge => {
                let y = sign(y);
                if y * p < 1.0 { -y } else { 0.0 }
            }
        }
    }

    /// Returns the second derivative of the loss with respect to the margin.
    ///
    /// The row Hessian is `curvature * x x'`.
    ///
    /// # Returns
    /// `None` for objectives that are not twice differentiable.
    pub fn curvature(&self, p: f64, _y: f64) -> Option<f64> {
        match self {
            Logistic => {
                let s = sigmoid(p);
                Some(s * (1.0 - s))
            }
            LeastSquares => Some(1.0),
            Hinge => None,
        }
    }

    /// Maps a margin into a prediction: a probability, a value or a class.
    pub fn predict(&self, p: f64) -> f64 {
        match self {
            Logistic => sigmoid(p),
            LeastSquares => p,
            Hinge => sign(p),
        }
    }
}

/// Activation applied to the hidden layers of a perceptron. The output layer
/// is always linear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Sigmoid,
    Tanh,
    Relu,
}

impl Activation {
    pub fn f(&self, z: f64) -> f64 {
        match self {
            Activation::Sigmoid => sigmoid(z),
            Activation::Tanh => z.tanh(),
            Activation::Relu => z.max(0.0),
        }
    }

    pub fn df(&self, z: f64) -> f64 {
        match self {
            Activation::Sigmoid => {
                let s = sigmoid(z);
                s * (1.0 - s)
            }
            Activation::Tanh => 1.0 - z.tanh().powi(2),
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}
