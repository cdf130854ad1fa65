//! OpenCL C source for the similarity kernels, built per device at startup.

pub(crate) const CL_SOURCE: &str = r#"
__kernel void normalize_rows(__global float* data, const uint n, const uint dims)
{
    const uint row = get_global_id(0);
    if (row >= n) return;
    __global float* v = data + (ulong)row * dims;

    float sum = 0.0f;
    for (uint i = 0; i < dims; i++) {
        sum = fma(v[i], v[i], sum);
    }
    if (!(sum > 0.0f)) return;

    const float norm = sqrt(sum);
    for (uint i = 0; i < dims; i++) {
        v[i] = v[i] / norm;
    }
}

__kernel void cosine_scores(
    __global const float* emb,
    __global const float* query,
    __global float* scores,
    const uint n,
    const uint dims,
    const uint normalized)
{
    const uint row = get_global_id(0);
    if (row >= n) return;
    __global const float* v = emb + (ulong)row * dims;

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
