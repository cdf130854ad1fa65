//! PTX for the CUDA similarity kernels.
//!
//! Hand-written PTX ISA 6.0 targeting sm_50, so the driver JIT-compiles it
//! for whatever GPU is present. One thread handles one row. Launch with a
//! 1-D grid covering `n` rows; surplus threads exit immediately.
//!
//! `normalize_rows(data, n, dims)` scales each row to unit length in place.
//! Rows whose squared norm is not positive are left untouched.
//!
//! `cosine_scores(emb, query, scores, n, dims, normalized)` writes one score
//! per row. With `normalized != 0` the score is the plain dot product;
//! otherwise it is `dot / (|row| * |query|)`, or 0 when either norm is zero.

/// NUL-terminated module image for `cuModuleLoadData`.
pub(crate) const PTX_MODULE: &str = concat!(
    r#"
.version 6.0
.target sm_50
.address_size 64

.visible .entry normalize_rows(
    .param .u64 normalize_rows_param_0,
    .param .u32 normalize_rows_param_1,
    .param .u32 normalize_rows_param_2
)
{
    .reg .pred %p<4>;
    .reg .b32 %r<12>;
    .reg .f32 %f<8>;
    .reg .b64 %rd<8>;

    ld.param.u64 %rd1, [normalize_rows_param_0];
    ld.param.u32 %r1, [normalize_rows_param_1];
    ld.param.u32 %r2, [normalize_rows_param_2];
    mov.u32 %r3, %ctaid.x;
    mov.u32 %r4, %ntid.x;
    mov.u32 %r5, %tid.x;
    mad.lo.u32 %r6, %r3, %r4, %r5;
    setp.ge.u32 %p1, %r6, %r1;
    @%p1 bra NR_DONE;

    cvta.to.global.u64 %rd2, %rd1;
    mul.wide.u32 %rd3, %r6, %r2;
    shl.b64 %rd3, %rd3, 2;
    add.s64 %rd4, %rd2, %rd3;

    mov.f32 %f1, 0f00000000;
    mov.u32 %r7, 0;
    mov.u64 %rd5, %rd4;
NR_SUM:
    setp.ge.u32 %p2, %r7, %r2;
    @%p2 bra NR_SUM_END;
    ld.global.f32 %f2, [%rd5];
    fma.rn.f32 %f1, %f2, %f2, %f1;
    add.s64 %rd5, %rd5, 4;
    add.u32 %r7, %r7, 1;
    bra.uni NR_SUM;
NR_SUM_END:
    setp.gt.f32 %p3, %f1, 0f00000000;
    @!%p3 bra NR_DONE;
    sqrt.rn.f32 %f3, %f1;

    mov.u32 %r7, 0;
    mov.u64 %rd5, %rd4;
NR_SCALE:
    setp.ge.u32 %p2, %r7, %r2;
    @%p2 bra NR_DONE;
    ld.global.f32 %f2, [%rd5];
    div.rn.f32 %f4, %f2, %f3;
    st.global.f32 [%rd5], %f4;
    add.s64 %rd5, %rd5, 4;
    add.u32 %r7, %r7, 1;
    bra.uni NR_SCALE;
NR_DONE:
    ret;
}

.visible .entry cosine_scores(
    .param .u64 cosine_scores_param_0,
    .param .u64 cosine_scores_param_1,
    .param .u64 cosine_scores_param_2,
    .param .u32 cosine_scores_param_3,
    .param .u32 cosine_scores_param_4,
    .param .u32 cosine_scores_param_5
)
{
    .reg .pred %p<8>;
    .reg .b32 %r<12>;
    .reg .f32 %f<12>;
    .reg .b64 %rd<16>;

    ld.param.u64 %rd1, [cosine_scores_param_0];
    ld.param.u64 %rd2, [cosine_scores_param_1];
    ld.param.u64 %rd3, [cosine_scores_param_2];
    ld.param.u32 %r1, [cosine_scores_param_3];
    ld.param.u32 %r2, [cosine_scores_param_4];
    ld.param.u32 %r3, [cosine_scores_param_5];
    mov.u32 %r4, %ctaid.x;
    mov.u32 %r5, %ntid.x;
    mov.u32 %r6, %tid.x;
    mad.lo.u32 %r7, %r4, %r5, %r6;
    setp.ge.u32 %p1, %r7, %r1;
    @%p1 bra CS_DONE;

    cvta.to.global.u64 %rd4, %rd1;
    cvta.to.global.u64 %rd5, %rd2;
    cvta.to.global.u64 %rd6, %rd3;
    mul.wide.u32 %rd7, %r7, %r2;
    shl.b64 %rd7, %rd7, 2;
    add.s64 %rd8, %rd4, %rd7;

    mov.f32 %f1, 0f00000000;
    mov.f32 %f2, 0f00000000;
    mov.f32 %f3, 0f00000000;
    mov.u32 %r8, 0;
    mov.u64 %rd9, %rd8;
    mov.u64 %rd10, %rd5;
CS_LOOP:
    setp.ge.u32 %p2, %r8, %r2;
    @%p2 bra CS_REDUCED;
    ld.global.f32 %f4, [%rd9];
    ld.global.f32 %f5, [%rd10];
    fma.rn.f32 %f1, %f4, %f5, %f1;
    fma.rn.f32 %f2, %f4, %f4, %f2;
    fma.rn.f32 %f3, %f5, %f5, %f3;
    add.s64 %rd9, %rd9, 4;
    add.s64 %rd10, %rd10, 4;
    add.u32 %r8, %r8, 1;
    bra.uni CS_LOOP;
CS_REDUCED:
    mov.f32 %f6, %f1;
    setp.ne.u32 %p3, %r3, 0;
    @%p3 bra CS_STORE;
    mov.f32 %f6, 0f00000000;
    setp.gt.f32 %p4, %f2, 0f00000000;
    @!%p4 bra CS_STORE;
    setp.gt.f32 %p5, %f3, 0f00000000;
    @!%p5 bra CS_STORE;
    sqrt.rn.f32 %f7, %f2;
    sqrt.rn.f32 %f8, %f3;
    mul.rn.f32 %f9, %f7, %f8;
    div.rn.f32 %f6, %f1, %f9;
CS_STORE:
    mul.wide.u32 %rd11, %r7, 4;
    add.s64 %rd12, %rd6, %rd11;
    st.global.f32 [%rd12], %f6;
CS_DONE:
    ret;
}
"#,
    "\0"
);
