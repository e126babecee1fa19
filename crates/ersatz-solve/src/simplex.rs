//! Euclidean projection onto the probability simplex.

use ndarray::{Array1, ArrayView1};

/// Project `point` onto `{ w : w_i >= 0, sum w_i = 1 }`.
///
/// Sort-based projection: with the coordinates in descending order, find the
/// largest prefix whose shifted values stay positive, then clip everything
/// at the implied threshold. O(n log n), exact up to floating error, and the
/// result satisfies both constraints by construction.
pub(crate) fn project(point: ArrayView1<'_, f64>) -> Array1<f64> {
    let mut sorted: Vec<f64> = point.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    let mut cumsum = 0.0;
    let mut threshold = 0.0;
    for (i, &u) in sorted.iter().enumerate() {
        cumsum += u;
        let candidate = (cumsum - 1.0) / (i + 1) as f64;
        if u - candidate > 0.0 {
            threshold = candidate;
        }
    }

    point.mapv(|u| (u - threshold).max(0.0))
}
