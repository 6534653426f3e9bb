//! Small dense kernels shared by the losses and the retrieval code.
//!
//! - `gemm_f32`: strided matrix multiply. Default is a safe triple loop; the
//!   `matrixmultiply` feature switches to `matrixmultiply::sgemm`.
//! - `dot`, `euclidean_distance`: per-row helpers.
//!
//! Every distance in this crate goes through `euclidean_distance`, so the exact
//! and indexed k-NN backends rank candidates by bit-identical keys.

/// `C = alpha * A * B + beta * C` with arbitrary strides.
///
/// Shapes: `A` is `(m, k)`, `B` is `(k, n)`, `C` is `(m, n)`.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    beta: f32,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);
    debug_assert!(rsa > 0 || m <= 1);
    debug_assert!(csa > 0 || k <= 1);
    debug_assert!(rsb > 0 || k <= 1);
    debug_assert!(csb > 0 || n <= 1);
    debug_assert!(rsc > 0 || m <= 1);
    debug_assert!(csc > 0 || n <= 1);

    #[cfg(feature = "matrixmultiply")]
    {
        // SAFETY: callers validate that every strided access stays inside the slices.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f32;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                let av = a[a0 + p * csa];
                let bv = b[p * rsb + b0];
                acc = av.mul_add(bv, acc);
            }

            let idx = i * rsc + j * csc;
            c[idx] = alpha * acc + beta * c[idx];
        }
    }
}

/// Similarity matrix `S = X * Y^T / temperature`.
///
/// `x` is `(rows, dim)`, `y` is `(cols, dim)`, both row-major. Returns `(rows, cols)`.
pub(crate) fn scaled_similarity(
    x: &[f32],
    rows: usize,
    y: &[f32],
    cols: usize,
    dim: usize,
    temperature: f32,
) -> Vec<f32> {
    debug_assert_eq!(x.len(), rows * dim);
    debug_assert_eq!(y.len(), cols * dim);

    let mut out = vec![0.0_f32; rows * cols];
    if rows == 0 || cols == 0 {
        return out;
    }
    // Y^T is read through its strides: element (p, j) of Y^T lives at y[j * dim + p].
    gemm_f32(
        rows,
        cols,
        dim,
        1.0,
        x,
        dim,
        1,
        y,
        1,
        dim,
        0.0,
        &mut out,
        cols,
        1,
    );
    for v in out.iter_mut() {
        *v /= temperature;
    }
    out
}

/// Backprop through `S = X * Y^T / temperature`.
///
/// Given `d_s = dL/dS` with shape `(rows, cols)`, writes (overwrite semantics):
/// - `d_x = d_s * Y / temperature`, shape `(rows, dim)`
/// - `d_y = d_s^T * X / temperature`, shape `(cols, dim)`
#[allow(clippy::too_many_arguments)]
pub(crate) fn scaled_similarity_backward(
    d_s: &[f32],
    x: &[f32],
    rows: usize,
    y: &[f32],
    cols: usize,
    dim: usize,
    temperature: f32,
    d_x: &mut [f32],
    d_y: &mut [f32],
) {
    debug_assert_eq!(d_s.len(), rows * cols);
    debug_assert_eq!(d_x.len(), rows * dim);
    debug_assert_eq!(d_y.len(), cols * dim);

    if rows == 0 || cols == 0 {
        d_x.fill(0.0);
        d_y.fill(0.0);
        return;
    }
    let inv_t = 1.0 / temperature;
    gemm_f32(
        rows, dim, cols, inv_t, d_s, cols, 1, y, dim, 1, 0.0, d_x, dim, 1,
    );
    // d_s^T read through swapped strides.
    gemm_f32(
        cols, dim, rows, inv_t, d_s, 1, cols, x, dim, 1, 0.0, d_y, dim, 1,
    );
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = 0.0_f32;
    for i in 0..a.len() {
        acc = a[i].mul_add(b[i], acc);
    }
    acc
}

/// L2 distance between two vectors of equal length.
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum_sq = 0.0_f32;
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_similarity_matches_naive_dot() {
        let x = [1.0_f32, 2.0, 0.5, -1.0, 3.0, 0.0];
        let y = [0.5_f32, 0.5, 2.0, -1.0, 0.0, 1.0];
        let s = scaled_similarity(&x, 2, &y, 3, 2, 0.5);

        for i in 0..2 {
            for j in 0..3 {
                let expected = dot(&x[i * 2..i * 2 + 2], &y[j * 2..j * 2 + 2]) / 0.5;
                assert!((s[i * 3 + j] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn euclidean_distance_is_l2() {
        let a = [0.0_f32, 0.0];
        let b = [3.0_f32, 4.0];
        assert_eq!(euclidean_distance(&a, &b), 5.0);
        assert_eq!(euclidean_distance(&b, &a), 5.0);
    }
}
