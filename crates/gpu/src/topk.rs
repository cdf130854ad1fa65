//! Host-side top-k selection
//!
//! All backends download the score vector and select here, so the CPU scorer
//! and every device rank identically: score descending, then row index
//! ascending. NaN scores rank below every real score.

use std::cmp::Ordering;

/// Select the `k` best of `scores`, returning (row indices, scores).
///
/// `k` is clamped to `scores.len()`. Uses a partial selection followed by a
/// sort of the selected prefix, so cost is O(n + k log k).
pub fn select_top_k(scores: &[f32], k: usize) -> (Vec<usize>, Vec<f32>) {
    let k = k.min(scores.len());
    if k == 0 {
        return (Vec::new(), Vec::new());
    }

    let cmp = |a: &usize, b: &usize| rank(scores[*a], scores[*b]).then_with(|| a.cmp(b));

    let mut order: Vec<usize> = (0..scores.len()).collect();
    if k < order.len() {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_unstable_by(cmp);

    let values = order.iter().map(|&i| scores[i]).collect();
    (order, values)
}

/// Descending total order over scores.
fn rank(a: f32, b: f32) -> Ordering {
    sort_key(b).total_cmp(&sort_key(a))
}

/// Collapse NaN to -inf and -0.0 to 0.0 so `total_cmp` matches numeric order.
fn sort_key(x: f32) -> f32 {
    if x.is_nan() {
        f32::NEG_INFINITY
    } else if x == 0.0 {
        0.0
    } else {
        x
    }
}
