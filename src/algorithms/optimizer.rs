use ndarray::{ArrayView1, ArrayViewMut1};
use serde::{Deserialize, Serialize};

/// Plain SGD with L2 regularization for biased matrix factorization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
    pub regularization: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64, regularization: f64) -> Self {
        Self {
            learning_rate,
            regularization,
        }
    }

    #[inline]
    fn bias_step(&self, err: f64, bias: &mut f64) {
        *bias += self.learning_rate * (err - self.regularization * *bias);
    }

    /// Full-model step for one observation with residual `err`.
    ///
    /// Both factor rows are updated from their pre-update values: for every
    /// factor `f`, `U[f]` and `M[f]` are read first and written together.
    #[inline]
    pub fn step(
        &self,
        err: f64,
        user_bias: &mut f64,
        item_bias: &mut f64,
        mut user_row: ArrayViewMut1<f64>,
        mut item_row: ArrayViewMut1<f64>,
    ) {
        self.bias_step(err, user_bias);
        self.bias_step(err, item_bias);

        let (lr, reg) = (self.learning_rate, self.regularization);
        for (puf, qmf) in user_row.iter_mut().zip(item_row.iter_mut()) {
            let (p, q) = (*puf, *qmf);
            *puf += lr * (err * q - reg * p);
            *qmf += lr * (err * p - reg * q);
        }
    }

    /// Cold-start step: only the user side moves, the item row is read-only.
    #[inline]
    pub fn user_step(
        &self,
        err: f64,
        user_bias: &mut f64,
        mut user_row: ArrayViewMut1<f64>,
        item_row: ArrayView1<f64>,
    ) {
        self.bias_step(err, user_bias);

        let (lr, reg) = (self.learning_rate, self.regularization);
        for (puf, &qmf) in user_row.iter_mut().zip(item_row.iter()) {
            let p = *puf;
            *puf += lr * (err * qmf - reg * p);
        }
    }
}
