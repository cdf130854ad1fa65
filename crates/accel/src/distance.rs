//! CPU scoring for the embedding index.
//!
//! Scores are "higher = more similar". Stored vectors are never modified;
//! the unit-length helpers scale on the fly or work on a copy.
//!
//! Two scoring forms exist because a normalized GPU mirror scores as
//! `dot(q/|q|, r/|r|)` while a raw mirror scores as `dot(q, r)/(|q|·|r|)`.
//! These round differently, and the CPU must round like the mirror it
//! stands in for, or scaled copies of one vector rank differently.

/// Cosine similarity: dot(a,b) / (||a|| * ||b||)
///
/// Range: [-1, 1]. Returns 0.0 if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Dimension mismatch in similarity computation");
    cosine_with_norm(a, l2_norm(a), b)
}

/// Cosine similarity with the first vector's norm precomputed.
///
/// The index scores one query against every row, so the query norm is
/// computed once per search.
pub fn cosine_with_norm(query: &[f32], query_norm: f32, row: &[f32]) -> f32 {
    let norm_row = l2_norm(row);
    if query_norm == 0.0 || norm_row == 0.0 {
        0.0
    } else {
        dot_product(query, row) / (query_norm * norm_row)
    }
}

/// Dot product (inner product)
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm (Euclidean length)
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale `v` to unit length in place. Zero vectors are left unchanged.
pub fn normalize(v: &mut [f32]) {
    let len = l2_norm(v);
    if len > 0.0 {
        v.iter_mut().for_each(|x| *x /= len);
    }
}

/// Dot product of `unit_query` with `row` scaled to unit length.
///
/// Rounds exactly like normalizing a copy of `row` and calling
/// [`dot_product`], without the copy.
pub fn dot_with_unit_row(unit_query: &[f32], row: &[f32]) -> f32 {
    let len = l2_norm(row);
    if len > 0.0 {
        row.iter().zip(unit_query).map(|(x, q)| (x / len) * q).sum()
    } else {
        dot_product(row, unit_query)
    }
}
