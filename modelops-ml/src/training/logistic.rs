//! Binary logistic regression with an L2 penalty, fit by damped Newton.

use crate::error::MlError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MAX_HALVINGS: u32 = 30;

/// Logistic regression classifier.
///
/// Minimises `0.5 * ||w||^2 + c * sum(log_loss)`; the intercept is not
/// penalised. Exactly two classes are supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub max_iter: u32,
    /// Inverse regularisation strength.
    pub c: f64,
    pub tol: f64,
    pub fit_intercept: bool,
    coef: Vec<f64>,
    intercept: f64,
    classes: Vec<i64>,
    n_iter: u32,
    converged: bool,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl LogisticRegression {
    pub fn new(max_iter: u32) -> Self {
        Self {
            max_iter,
            c: 1.0,
            tol: 1e-4,
            fit_intercept: true,
            coef: Vec::new(),
            intercept: 0.0,
            classes: Vec::new(),
            n_iter: 0,
            converged: false,
        }
    }

    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Sorted distinct labels seen during `fit`. The second is the positive class.
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Newton iterations run by the last `fit`.
    pub fn n_iter(&self) -> u32 {
        self.n_iter
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn is_fitted(&self) -> bool {
        self.classes.len() == 2
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<i64>) -> Result<&mut Self, MlError> {
        if x.nrows() != y.len() {
            return Err(MlError::invalid_input(format!(
                "x has {} rows but y has {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.nrows() == 0 {
            return Err(MlError::training("cannot fit on an empty dataset"));
        }
        if self.max_iter == 0 {
            return Err(MlError::invalid_input("max_iter must be positive"));
        }
        if !(self.c > 0.0) {
            return Err(MlError::invalid_input(format!(
                "c must be positive, got {}",
                self.c
            )));
        }

        let mut classes: Vec<i64> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() != 2 {
            return Err(MlError::training(format!(
                "binary classification needs exactly two classes, found {}",
                classes.len()
            )));
        }
        let targets: Array1<f64> = y.mapv(|label| if label == classes[1] { 1.0 } else { 0.0 });

        // Parameters: weights followed by the intercept (pinned at 0 when not fitted).
        let d = x.ncols();
        let mut theta = Array1::<f64>::zeros(d + 1);
        let mut loss = self.objective(x.view(), targets.view(), theta.view());
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iter {
            let (grad, hess) = self.gradient_hessian(x.view(), targets.view(), theta.view());
            let grad_norm = grad.iter().fold(0.0_f64, |acc, g| acc.max(g.abs()));
            if grad_norm <= self.tol {
                converged = true;
                break;
            }
            iterations += 1;

            let step = solve(hess, grad)
                .ok_or_else(|| MlError::training("Newton system is singular"))?;

            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..MAX_HALVINGS {
                let candidate = &theta - &(&step * scale);
                let candidate_loss = self.objective(x.view(), targets.view(), candidate.view());
                if candidate_loss <= loss {
                    theta = candidate;
                    loss = candidate_loss;
                    accepted = true;
                    break;
                }
                scale *= 0.5;
            }
            debug!(iteration = iterations, loss, grad_norm, scale, "Newton step");
            if !accepted {
                break;
            }
        }

        if !converged {
            let (grad, _) = self.gradient_hessian(x.view(), targets.view(), theta.view());
            converged = grad.iter().all(|g| g.abs() <= self.tol);
        }
        if !converged {
            warn!(
                max_iter = self.max_iter,
                iterations, "Logistic regression did not converge; keeping last iterate"
            );
        }

        self.coef = theta.slice(ndarray::s![..d]).to_vec();
        self.intercept = theta[d];
        self.classes = classes;
        self.n_iter = iterations;
        self.converged = converged;
        Ok(self)
    }

    /// Probability of the positive class for each row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>, MlError> {
        self.check_input(x)?;
        let coef = ArrayView1::from(&self.coef[..]);
        Ok((x.dot(&coef) + self.intercept).mapv(sigmoid))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<i64>, MlError> {
        let proba = self.predict_proba(x)?;
        let (negative, positive) = (self.classes[0], self.classes[1]);
        Ok(proba.mapv(|p| if p > 0.5 { positive } else { negative }))
    }

    pub fn to_json(&self) -> Result<String, MlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, MlError> {
        let model: Self = serde_json::from_str(json)?;
        if !model.is_fitted() || model.coef.is_empty() {
            return Err(MlError::model("serialized model is not fitted"));
        }
        Ok(model)
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<(), MlError> {
        if !self.is_fitted() {
            return Err(MlError::model("model is not fitted"));
        }
        if x.ncols() != self.coef.len() {
            return Err(MlError::invalid_input(format!(
                "expected {} features, got {}",
                self.coef.len(),
                x.ncols()
            )));
        }
        Ok(())
    }

    fn linear(&self, x: ArrayView2<f64>, theta: ArrayView1<f64>) -> Array1<f64> {
        let d = x.ncols();
        x.dot(&theta.slice(ndarray::s![..d])) + theta[d]
    }

    fn objective(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, theta: ArrayView1<f64>) -> f64 {
        let d = x.ncols();
        let z = self.linear(x, theta);
        let data_loss: f64 = z
            .iter()
            .zip(y.iter())
            .map(|(&z, &t)| z.max(0.0) - t * z + (-z.abs()).exp().ln_1p())
            .sum();
        let penalty: f64 = theta.slice(ndarray::s![..d]).mapv(|w| w * w).sum();
        0.5 * penalty + self.c * data_loss
    }

    fn gradient_hessian(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        theta: ArrayView1<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let (n, d) = x.dim();
        let p = self.linear(x, theta).mapv(sigmoid);
        let residual = &p - &y;
        let weights = p.mapv(|p| p * (1.0 - p));

        // Design matrix with a trailing column of ones for the intercept.
        let mut design = Array2::<f64>::ones((n, d + 1));
        design.slice_mut(ndarray::s![.., ..d]).assign(&x);

        let mut grad = design.t().dot(&residual) * self.c;
        let weighted = &design * &weights.view().insert_axis(Axis(1));
        let mut hess = design.t().dot(&weighted) * self.c;

        for j in 0..d {
            grad[j] += theta[j];
            hess[[j, j]] += 1.0;
        }
        if !self.fit_intercept {
            grad[d] = 0.0;
            hess.row_mut(d).fill(0.0);
            hess.column_mut(d).fill(0.0);
            hess[[d, d]] = 1.0;
        }
        (grad, hess)
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Gaussian elimination with partial pivoting. `None` when `a` is singular.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn separable() -> (Array2<f64>, Array1<i64>) {
        let x = array![
            [1.0, 2.0],
            [2.0, 1.0],
            [1.5, 1.5],
            [2.5, 0.5],
            [6.0, 7.0],
            [7.0, 6.0],
            [6.5, 6.5],
            [7.5, 5.5],
        ];
        let y = array![0, 0, 0, 0, 1, 1, 1, 1];
        (x, y)
    }

    #[test]
    fn test_solve() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);

        assert!(solve(array![[1.0, 2.0], [2.0, 4.0]], array![1.0, 2.0]).is_none());
    }

    #[test]
    fn test_fit_separable_data() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(100);
        model.fit(&x, &y).unwrap();

        assert!(model.converged());
        assert!(model.n_iter() > 0);
        assert_eq!(model.classes(), &[0, 1]);
        assert_eq!(model.predict(&x).unwrap(), y);

        let proba = model.predict_proba(&x).unwrap();
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(proba[0] < 0.5 && proba[4] > 0.5);
    }

    #[test]
    fn test_gradient_is_small_at_solution() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(100);
        model.fit(&x, &y).unwrap();

        let mut theta = Array1::<f64>::zeros(3);
        theta[0] = model.coef()[0];
        theta[1] = model.coef()[1];
        theta[2] = model.intercept();
        let targets = y.mapv(|v| v as f64);
        let (grad, _) = model.gradient_hessian(x.view(), targets.view(), theta.view());
        assert!(grad.iter().all(|g| g.abs() <= 1e-4));
    }

    #[test]
    fn test_arbitrary_labels() {
        let (x, y) = separable();
        let y = y.mapv(|v| if v == 1 { 7 } else { -3 });
        let mut model = LogisticRegression::default();
        model.fit(&x, &y).unwrap();
        assert_eq!(model.classes(), &[-3, 7]);
        assert_eq!(model.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_max_iter_one_does_not_converge() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(1).with_tol(1e-12);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.n_iter(), 1);
        assert!(!model.converged());
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = separable();
        let mut a = LogisticRegression::new(50);
        let mut b = LogisticRegression::new(50);
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_input() {
        let (x, y) = separable();
        let mut model = LogisticRegression::default();
        assert!(matches!(
            model.fit(&x, &Array1::from(vec![1; 8])),
            Err(MlError::Training(_))
        ));
        assert!(matches!(
            model.fit(&x, &array![0, 1]),
            Err(MlError::InvalidInput(_))
        ));
        assert!(matches!(model.predict(&x), Err(MlError::Model(_))));

        model.fit(&x, &y).unwrap();
        assert!(matches!(
            model.predict(&array![[1.0, 2.0, 3.0]]),
            Err(MlError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_json_roundtrip_preserves_predictions() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new(100);
        model.fit(&x, &y).unwrap();

        let restored = LogisticRegression::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(restored.predict(&x).unwrap(), model.predict(&x).unwrap());
        assert!(LogisticRegression::from_json(&LogisticRegression::default().to_json().unwrap()).is_err());
    }
}
