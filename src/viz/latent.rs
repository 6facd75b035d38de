//! Latent-space arithmetic: distances, nearest neighbours and interpolation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

use crate::error::{Result, RopeGanError};

/// Below this `sin(omega)` two codes are treated as parallel
const SLERP_EPS: f64 = 1e-6;

/// Distance used for nearest-neighbour retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared Euclidean distance
    L2,
    /// Negative dot product
    DotProduct,
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::L2 => write!(f, "l2"),
            DistanceMetric::DotProduct => write!(f, "dotproduct"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = RopeGanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "l2" => Ok(DistanceMetric::L2),
            "dotproduct" => Ok(DistanceMetric::DotProduct),
            other => Err(RopeGanError::InvalidArgument(format!(
                "unknown metric '{}', expected l2 or dotproduct",
                other
            ))),
        }
    }
}

/// Path between two latent codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationKind {
    /// Straight line
    Linear,
    /// Great circle (spherical linear interpolation)
    #[default]
    Slerp,
}

impl fmt::Display for InterpolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationKind::Linear => write!(f, "linear"),
            InterpolationKind::Slerp => write!(f, "slerp"),
        }
    }
}

impl FromStr for InterpolationKind {
    type Err = RopeGanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(InterpolationKind::Linear),
            "slerp" => Ok(InterpolationKind::Slerp),
            other => Err(RopeGanError::InvalidArgument(format!(
                "unknown interpolation '{}', expected linear or slerp",
                other
            ))),
        }
    }
}

/// Distances between every query and key, shape `[q, n]`
///
/// * L2: `||q||^2 - 2 q.k + ||k||^2`
/// * DotProduct: `-q.k`
pub fn pairwise_distances(queries: &Tensor, keys: &Tensor, metric: DistanceMetric) -> Tensor {
    let dots = queries.matmul(&keys.transpose(0, 1));
    match metric {
        DistanceMetric::L2 => {
            let qq = queries
                .square()
                .sum_dim_intlist([-1].as_slice(), false, Kind::Float)
                .unsqueeze(1);
            let kk = keys
                .square()
                .sum_dim_intlist([-1].as_slice(), false, Kind::Float)
                .unsqueeze(0);
            qq - dots * 2.0 + kk
        }
        DistanceMetric::DotProduct => -dots,
    }
}

/// Indices of the `k` smallest distances per row, nearest first
///
/// `k` is clamped to the number of columns.
pub fn nearest_indices(dists: &Tensor, k: i64) -> Tensor {
    let n = dists.size()[1];
    let (_, indices) = dists.topk(k.clamp(0, n), 1, false, true);
    indices
}

/// `n_interp + 2` evenly spaced weights on `[0, 1]` (endpoints included)
pub fn lambdas(n_interp: usize) -> Vec<f64> {
    let steps = n_interp + 1;
    (0..=steps).map(|i| i as f64 / steps as f64).collect()
}

/// Interpolate between paired codes
///
/// # Arguments
///
/// * `z_start` - Start codes `[b, d]`
/// * `z_goal` - Goal codes `[b, d]`
/// * `n_interp` - Intermediate points per pair
/// * `kind` - Linear or slerp
///
/// # Returns
///
/// `[b * (n_interp + 2), d]`, all points of the first pair, then the second, ...
pub fn interpolate(
    z_start: &Tensor,
    z_goal: &Tensor,
    n_interp: usize,
    kind: InterpolationKind,
) -> Result<Tensor> {
    if z_start.size() != z_goal.size() || z_start.dim() != 2 {
        return Err(RopeGanError::InvalidArgument(format!(
            "start {:?} and goal {:?} must both be [b, d]",
            z_start.size(),
            z_goal.size()
        )));
    }
    let z_dim = z_start.size()[1];

    let points: Vec<Tensor> = match kind {
        InterpolationKind::Linear => lambdas(n_interp)
            .into_iter()
            .map(|l| z_start * (1.0 - l) + z_goal * l)
            .collect(),
        InterpolationKind::Slerp => {
            let norms = z_start.norm_scalaropt_dim(2, [1].as_slice(), false)
                * z_goal.norm_scalaropt_dim(2, [1].as_slice(), false);
            let cos = (z_start * z_goal).sum_dim_intlist([1].as_slice(), false, Kind::Float) / norms;
            let omegas = cos.clamp(-1.0, 1.0).acos().unsqueeze(1);
            let sin_omegas = omegas.sin();
            // zero-norm codes give NaN angles and are handled like parallel ones
            let parallel = sin_omegas.abs().lt(SLERP_EPS).logical_or(&sin_omegas.isnan());
            let safe_sin = sin_omegas.where_scalarother(&parallel.logical_not(), 1.0);

            lambdas(n_interp)
                .into_iter()
                .map(|l| {
                    let a1 = ((&omegas * (1.0 - l)).sin() / &safe_sin)
                        .where_scalarother(&parallel.logical_not(), 1.0 - l);
                    let a2 = ((&omegas * l).sin() / &safe_sin)
                        .where_scalarother(&parallel.logical_not(), l);
                    a1 * z_start + a2 * z_goal
                })
                .collect()
        }
    };

    Ok(Tensor::stack(&points, 1).view([-1, z_dim]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn t(rows: &[&[f32]]) -> Tensor {
        let cols = rows[0].len() as i64;
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_slice(&flat).view([-1, cols])
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("l2".parse::<DistanceMetric>().unwrap(), DistanceMetric::L2);
        assert_eq!(
            "dotproduct".parse::<DistanceMetric>().unwrap(),
            DistanceMetric::DotProduct
        );
        assert!("cosine".parse::<DistanceMetric>().is_err());
        assert_eq!("slerp".parse::<InterpolationKind>().unwrap(), InterpolationKind::Slerp);
        assert!("cubic".parse::<InterpolationKind>().is_err());
    }

    #[test]
    fn test_l2_distances() {
        let q = t(&[&[0.0, 0.0], &[1.0, 1.0]]);
        let k = t(&[&[3.0, 4.0], &[1.0, 1.0], &[0.0, 0.0]]);
        let d = pairwise_distances(&q, &k, DistanceMetric::L2);
        assert_eq!(d.size(), vec![2, 3]);
        assert!((d.double_value(&[0, 0]) - 25.0).abs() < 1e-5);
        assert!(d.double_value(&[1, 1]).abs() < 1e-5);
        assert!((d.double_value(&[1, 2]) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_dot_product_distances() {
        let q = t(&[&[1.0, 2.0]]);
        let k = t(&[&[3.0, 4.0], &[-1.0, 0.0]]);
        let d = pairwise_distances(&q, &k, DistanceMetric::DotProduct);
        assert!((d.double_value(&[0, 0]) + 11.0).abs() < 1e-5);
        assert!((d.double_value(&[0, 1]) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_nearest_indices_sorted_and_clamped() {
        let d = t(&[&[5.0, 1.0, 3.0], &[0.0, 2.0, -1.0]]);
        let idx = nearest_indices(&d, 2);
        assert_eq!(Vec::<i64>::try_from(idx.get(0)).unwrap(), vec![1, 2]);
        assert_eq!(Vec::<i64>::try_from(idx.get(1)).unwrap(), vec![2, 0]);

        let all = nearest_indices(&d, 101);
        assert_eq!(all.size(), vec![2, 3]);
    }

    #[test]
    fn test_lambdas() {
        assert_eq!(lambdas(0), vec![0.0, 1.0]);
        let l = lambdas(3);
        assert_eq!(l.len(), 5);
        assert_eq!(l[0], 0.0);
        assert!((l[2] - 0.5).abs() < 1e-12);
        assert_eq!(l[4], 1.0);
    }

    #[test]
    fn test_linear_interpolation_order() {
        let start = t(&[&[0.0, 0.0], &[10.0, 10.0]]);
        let goal = t(&[&[2.0, 4.0], &[10.0, 10.0]]);
        let zs = interpolate(&start, &goal, 1, InterpolationKind::Linear).unwrap();

        assert_eq!(zs.size(), vec![6, 2]);
        assert!((zs.double_value(&[1, 0]) - 1.0).abs() < 1e-6);
        assert!((zs.double_value(&[1, 1]) - 2.0).abs() < 1e-6);
        assert!((zs.double_value(&[2, 1]) - 4.0).abs() < 1e-6);
        assert!((zs.double_value(&[3, 0]) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_slerp_keeps_unit_norm() {
        let start = t(&[&[1.0, 0.0]]);
        let goal = t(&[&[0.0, 1.0]]);
        let zs = interpolate(&start, &goal, 3, InterpolationKind::Slerp).unwrap();

        let norms = zs.norm_scalaropt_dim(2, [1].as_slice(), false);
        let ones = Tensor::ones([5], (Kind::Float, Device::Cpu));
        assert!(norms.allclose(&ones, 1e-5, 1e-5, false));
        // midpoint at 45 degrees
        let half = std::f64::consts::FRAC_1_SQRT_2;
        assert!((zs.double_value(&[2, 0]) - half).abs() < 1e-5);
        assert!((zs.double_value(&[2, 1]) - half).abs() < 1e-5);
    }

    #[test]
    fn test_slerp_parallel_codes_fall_back_to_linear() {
        let start = t(&[&[1.0, 1.0]]);
        let goal = t(&[&[2.0, 2.0]]);
        let slerp = interpolate(&start, &goal, 2, InterpolationKind::Slerp).unwrap();
        let linear = interpolate(&start, &goal, 2, InterpolationKind::Linear).unwrap();
        assert_eq!(slerp.isnan().any().to_kind(Kind::Int64).int64_value(&[]), 0);
        assert!(slerp.allclose(&linear, 1e-5, 1e-5, false));
    }

    #[test]
    fn test_interpolate_shape_mismatch() {
        let start = t(&[&[1.0, 0.0]]);
        let goal = t(&[&[1.0, 0.0, 0.0]]);
        assert!(interpolate(&start, &goal, 2, InterpolationKind::Linear).is_err());
    }
}
