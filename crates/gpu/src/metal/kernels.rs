//! Metal Shading Language source for the similarity kernels.
//!
//! Compiled at runtime by `newLibraryWithSource:options:error:`. One thread
//! per row; the dispatch rounds `n` up to whole threadgroups and surplus
//! threads return early.

/// Kernel entry points, in pipeline order.
pub(crate) const KERNEL_NAMES: [&str; 2] = ["normalize_rows", "cosine_scores"];

pub(crate) const MSL_SOURCE: &str = r#"
#include <metal_stdlib>
using namespace metal;

// Scale each row of `data` to unit L2 norm. Zero rows stay zero.
kernel void normalize_rows(
    device       float* data [[buffer(0)]],
    constant     uint&  n    [[buffer(1)]],
    constant     uint&  dims [[buffer(2)]],
    uint row [[thread_position_in_grid]])
{
    if (row >= n) return;
    device float* v = data + (ulong)row * dims;

    float sum = 0.0f;
    for (uint i = 0; i < dims; i++) {
        sum = fma(v[i], v[i], sum);
    }
    if (!(sum > 0.0f)) return;

    float norm = sqrt(sum);
    for (uint i = 0; i < dims; i++) {
        v[i] = v[i] / norm;
    }
}

// Score each row of `emb` against `query`. With `normalized` set the rows
// and query are unit length and the score is the dot product.
kernel void cosine_scores(
    device const float* emb        [[buffer(0)]],
    device const float* query      [[buffer(1)]],
    device       float* scores     [[buffer(2)]],
    constant     uint&  n          [[buffer(3)]],
    constant     uint&  dims       [[buffer(4)]],
    constant     uint&  normalized [[buffer(5)]],
    uint row [[thread_position_in_grid]])
{
    if (row >= n) return;
    device const float* v = emb + (ulong)row * dims;

    float dot = 0.0f;
    float norm_v = 0.0f;
    float norm_q = 0.0f;
    for (uint i = 0; i < dims; i++) {
        dot = fma(v[i], query[i], dot);
        norm_v = fma(v[i], v[i], norm_v);
        norm_q = fma(query[i], query[i], norm_q);
    }

    float score;
    if (normalized != 0) {
        score = dot;
    } else if (norm_v > 0.0f && norm_q > 0.0f) {
        score = dot / (sqrt(norm_v) * sqrt(norm_q));
    } else {
        score = 0.0f;
    }
    scores[row] = score;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_defines_every_kernel() {
        for name in KERNEL_NAMES {
            assert!(MSL_SOURCE.contains(&format!("kernel void {}(", name)));
        }
    }
}
