use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

use super::constants::{PINV_RELATIVE_TOLERANCE, RIDGE_EPSILON};
use super::covariance::estimate_moments;
use super::error::{EngineError, Result};
use super::types::{AssetReturnMatrix, AssetWeight, PortfolioConfig, PortfolioWeights};

/// Regularised mean-variance allocation.
///
/// Solves `w ∝ (risk_aversion * Σ + εI)⁺ (μ + noise)` and normalises the weights to
/// sum to one. Short positions are allowed. Reported metrics use the unperturbed `μ`.
pub fn optimize_portfolio(matrix: &AssetReturnMatrix, config: &PortfolioConfig) -> Result<PortfolioWeights> {
    config.validate()?;
    let (means, covariance) = estimate_moments(matrix)?;
    let n_assets = means.len();

    // Perturb expected returns so near-identical means do not collapse the allocation
    let perturbed = &means + &sample_noise(n_assets, config)?;

    let mut risk = covariance.mapv(|c| c * config.risk_aversion);
    risk.diag_mut().mapv_inplace(|d| d + RIDGE_EPSILON);

    let raw_weights = pseudo_inverse_symmetric(&risk)?.dot(&perturbed);
    let raw_sum = raw_weights.sum();
    if !raw_sum.is_finite() {
        return Err(EngineError::numerical_instability("raw portfolio weights"));
    }
    if raw_sum == 0.0 {
        warn!(n_assets, "Raw weights sum to zero, cannot normalise");
        return Err(EngineError::DegenerateOptimization);
    }

    let weights = raw_weights / raw_sum;
    if weights.iter().any(|w| !w.is_finite()) {
        return Err(EngineError::numerical_instability("normalised portfolio weights"));
    }

    let expected_return = weights.dot(&means);
    let expected_risk = weights.dot(&covariance.dot(&weights)).max(0.0).sqrt();
    let sharpe_like_ratio = expected_return / (expected_risk + RIDGE_EPSILON);

    debug!(
        n_assets,
        periods = matrix.num_periods(),
        expected_return,
        expected_risk,
        sharpe_like_ratio,
        "Portfolio optimised"
    );

    Ok(PortfolioWeights {
        weights: matrix
            .labels()
            .iter()
            .zip(weights.iter())
            .map(|(label, &weight)| AssetWeight { label: label.clone(), weight })
            .collect(),
        expected_return,
        expected_risk,
        sharpe_like_ratio,
    })
}

fn sample_noise(n_assets: usize, config: &PortfolioConfig) -> Result<Array1<f64>> {
    if config.noise_std_dev == 0.0 {
        return Ok(Array1::zeros(n_assets));
    }
    let normal = Normal::new(0.0, config.noise_std_dev)
        .map_err(|e| EngineError::invalid_parameter(format!("noise distribution: {}", e)))?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    Ok((0..n_assets).map(|_| normal.sample(&mut rng)).collect())
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix via eigendecomposition.
///
/// Eigenvalues with magnitude at or below `PINV_RELATIVE_TOLERANCE` times the largest
/// are treated as zero, so singular inputs degrade instead of failing.
fn pseudo_inverse_symmetric(matrix: &Array2<f64>) -> Result<Array2<f64>> {
    let n = matrix.nrows();
    let eigen = DMatrix::from_fn(n, n, |i, j| matrix[[i, j]]).symmetric_eigen();
    let q = eigen.eigenvectors;
    let eigenvalues = eigen.eigenvalues;

    if eigenvalues.iter().any(|l| !l.is_finite()) {
        return Err(EngineError::numerical_instability("risk matrix eigendecomposition"));
    }
    let largest = eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
    let cutoff = largest * PINV_RELATIVE_TOLERANCE;

    let mut pinv = Array2::zeros((n, n));
    for (k, &lambda) in eigenvalues.iter().enumerate() {
        if lambda.abs() <= cutoff {
            continue;
        }
        for i in 0..n {
            let coeff = q[(i, k)] / lambda;
            for j in 0..n {
                pinv[[i, j]] += coeff * q[(j, k)];
            }
        }
    }
    Ok(pinv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{Array2, array};

    fn standardized(seed: u64, n: usize) -> Vec<f64> {
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let raw: Vec<f64> = (0..n).map(|_| normal.sample(&mut rng)).collect();
        let mean = raw.iter().sum::<f64>() / n as f64;
        let sd = (raw.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt();
        raw.iter().map(|x| (x - mean) / sd).collect()
    }

    /// Two assets with identical sample means, asset A four times the variance of B
    fn two_asset_matrix() -> AssetReturnMatrix {
        let a = standardized(1, 50);
        let b = standardized(2, 50);
        let returns = Array2::from_shape_fn((50, 2), |(t, j)| {
            if j == 0 { 0.001 + 0.02 * a[t] } else { 0.001 + 0.01 * b[t] }
        });
        AssetReturnMatrix::new(vec!["A".into(), "B".into()], returns).unwrap()
    }

    #[test]
    fn prefers_lower_variance_asset_with_equal_means() {
        let weights = optimize_portfolio(&two_asset_matrix(), &PortfolioConfig::default()).unwrap();
        assert!(weights.weight("B").unwrap() > weights.weight("A").unwrap());
        assert_abs_diff_eq!(weights.total_weight(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn metrics_use_unperturbed_means() {
        let matrix = two_asset_matrix();
        let config = PortfolioConfig { noise_std_dev: 0.0005, seed: 9, ..Default::default() };
        let weights = optimize_portfolio(&matrix, &config).unwrap();

        let (means, covariance) = estimate_moments(&matrix).unwrap();
        let w = weights.weight_vector();
        assert_relative_eq!(weights.expected_return, w.dot(&means), epsilon = 1e-15);
        assert_relative_eq!(
            weights.expected_risk,
            w.dot(&covariance.dot(&w)).sqrt(),
            epsilon = 1e-15
        );
        assert_relative_eq!(
            weights.sharpe_like_ratio,
            weights.expected_return / (weights.expected_risk + RIDGE_EPSILON),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(weights.total_weight(), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn noise_is_reproducible_per_seed() {
        let matrix = two_asset_matrix();
        let config = PortfolioConfig { noise_std_dev: 0.001, seed: 5, ..Default::default() };
        let first = optimize_portfolio(&matrix, &config).unwrap();
        let second = optimize_portfolio(&matrix, &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn duplicated_columns_stay_finite() {
        let returns = array![[0.01, 0.01, 0.02], [-0.02, -0.02, 0.01], [0.03, 0.03, -0.01], [0.00, 0.00, 0.02]];
        let matrix = AssetReturnMatrix::new(vec!["X".into(), "Y".into(), "Z".into()], returns).unwrap();

        match optimize_portfolio(&matrix, &PortfolioConfig::default()) {
            Ok(weights) => {
                assert!(weights.weights.iter().all(|w| w.weight.is_finite()));
                assert_abs_diff_eq!(weights.total_weight(), 1.0, epsilon = 1e-8);
                // Identical columns receive identical weights
                assert_relative_eq!(
                    weights.weight("X").unwrap(),
                    weights.weight("Y").unwrap(),
                    max_relative = 1e-6
                );
            }
            Err(e) => assert!(matches!(
                e,
                EngineError::DegenerateOptimization | EngineError::NumericalInstability { .. }
            )),
        }
    }

    #[test]
    fn zero_means_are_degenerate() {
        let returns = array![[0.01, -0.02], [-0.01, 0.02]];
        let matrix = AssetReturnMatrix::new(vec!["A".into(), "B".into()], returns).unwrap();
        assert_eq!(
            optimize_portfolio(&matrix, &PortfolioConfig::default()).unwrap_err(),
            EngineError::DegenerateOptimization
        );
    }

    #[test]
    fn single_asset_gets_full_weight() {
        let returns = array![[0.01], [0.03], [-0.01]];
        let matrix = AssetReturnMatrix::new(vec!["ONLY".into()], returns).unwrap();
        let weights = optimize_portfolio(&matrix, &PortfolioConfig::default()).unwrap();
        assert_relative_eq!(weights.weight("ONLY").unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn rejects_invalid_inputs() {
        let short = AssetReturnMatrix::new(vec!["A".into()], array![[0.01]]).unwrap();
        assert!(matches!(
            optimize_portfolio(&short, &PortfolioConfig::default()),
            Err(EngineError::InvalidInput { .. })
        ));

        let infinite = AssetReturnMatrix::new(vec!["A".into()], array![[0.01], [f64::INFINITY]]).unwrap();
        assert!(matches!(
            optimize_portfolio(&infinite, &PortfolioConfig::default()),
            Err(EngineError::InvalidInput { .. })
        ));

        let config = PortfolioConfig { risk_aversion: -1.0, ..Default::default() };
        assert!(matches!(
            optimize_portfolio(&two_asset_matrix(), &config),
            Err(EngineError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn pseudo_inverse_handles_singular_matrix() {
        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        let pinv = pseudo_inverse_symmetric(&singular).unwrap();
        // Pseudo-inverse of [[1,1],[1,1]] is [[0.25,0.25],[0.25,0.25]]
        for v in pinv.iter() {
            assert_abs_diff_eq!(*v, 0.25, epsilon = 1e-12);
        }

        let diagonal = array![[4.0, 0.0], [0.0, 2.0]];
        let pinv = pseudo_inverse_symmetric(&diagonal).unwrap();
        assert_abs_diff_eq!(pinv[[0, 0]], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(pinv[[1, 1]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(pinv[[0, 1]], 0.0, epsilon = 1e-12);
    }
}
