//! Small numeric helpers shared by the policies: dense linear algebra for the
//! ridge statistics, softmax, argmax with ties, categorical sampling and a
//! stable hash for signatures and per-decision seeds.

use rand::{Rng, RngCore};

/// Scores closer than this count as tied.
pub const TIE_TOLERANCE: f64 = 1e-12;

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Row-major `dim x dim` matrix times vector.
pub fn mat_vec(a: &[f64], dim: usize, x: &[f64]) -> Vec<f64> {
    (0..dim)
        .map(|i| dot(&a[i * dim..(i + 1) * dim], x))
        .collect()
}

/// `diag * I` in row-major layout.
pub fn scaled_identity(dim: usize, diag: f64) -> Vec<f64> {
    let mut m = vec![0.0; dim * dim];
    for i in 0..dim {
        m[i * dim + i] = diag;
    }
    m
}

/// Sherman–Morrison rank-1 update of a stored inverse.
///
/// For `A := A + x xᵀ`:
/// `A⁻¹ <- A⁻¹ - (A⁻¹ x)(A⁻¹ x)ᵀ / (1 + xᵀ A⁻¹ x)`.
/// `A⁻¹` stays symmetric so `xᵀA⁻¹ = (A⁻¹x)ᵀ`. Returns `false` and leaves
/// the matrix untouched if the denominator is not usable.
pub fn sherman_morrison_update(a_inv: &mut [f64], dim: usize, x: &[f64]) -> bool {
    let ax = mat_vec(a_inv, dim, x);
    let denom = 1.0 + dot(x, &ax);
    if !(denom.is_finite() && denom > TIE_TOLERANCE) {
        return false;
    }
    for i in 0..dim {
        for j in 0..dim {
            a_inv[i * dim + j] -= ax[i] * ax[j] / denom;
        }
    }
    true
}

/// `softmax(scores * multiplier)`, max-subtracted. Falls back to uniform if
/// the input is not finite.
pub fn softmax(scores: &[f64], multiplier: f64) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }
    let logits: Vec<f64> = scores.iter().map(|s| s * multiplier).collect();
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return uniform(scores.len());
    }
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !(sum.is_finite() && sum > 0.0) {
        return uniform(scores.len());
    }
    exps.into_iter().map(|e| e / sum).collect()
}

pub fn uniform(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let p = 1.0 / n as f64;
    vec![p; n]
}

/// Index of the largest score; the first one wins on ties. NaN never wins.
pub fn argmax(scores: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i).or(if scores.is_empty() { None } else { Some(0) })
}

/// All indices whose score is within [`TIE_TOLERANCE`] of the maximum.
pub fn ties_at_max(scores: &[f64]) -> Vec<usize> {
    let Some(best) = argmax(scores) else {
        return Vec::new();
    };
    let max = scores[best];
    if max.is_nan() {
        return (0..scores.len()).collect();
    }
    scores
        .iter()
        .enumerate()
        .filter(|(_, &s)| (s - max).abs() <= TIE_TOLERANCE || s == max)
        .map(|(i, _)| i)
        .collect()
}

/// Uniform over `ties`, zero elsewhere.
pub fn uniform_over(n: usize, ties: &[usize]) -> Vec<f64> {
    let mut probs = vec![0.0; n];
    if ties.is_empty() {
        return probs;
    }
    #[allow(clippy::cast_precision_loss)]
    let p = 1.0 / ties.len() as f64;
    for &i in ties {
        probs[i] = p;
    }
    probs
}

/// Mixture of uniform exploration and a greedy pick:
/// `epsilon / n` everywhere plus `1 - epsilon` on `greedy`.
pub fn epsilon_mixture(n: usize, greedy: usize, epsilon: f64) -> Vec<f64> {
    #[allow(clippy::cast_precision_loss)]
    let explore = epsilon / n as f64;
    let mut probs = vec![explore; n];
    probs[greedy] += 1.0 - epsilon;
    probs
}

/// Inverse-CDF draw. Numerical leftovers land on the last index with non-zero
/// mass.
pub fn sample_categorical(probs: &[f64], rng: &mut dyn RngCore) -> usize {
    let r: f64 = rng.gen();
    let mut cdf = 0.0;
    let mut last_nonzero = 0;
    for (i, &p) in probs.iter().enumerate() {
        if p <= 0.0 {
            continue;
        }
        last_nonzero = i;
        cdf += p;
        if r < cdf {
            return i;
        }
    }
    last_nonzero
}

/// Deterministic (non-crypto) hash: FNV-1a over the bytes, SplitMix64
/// finalizer.
#[must_use]
pub fn stable_hash64(seed: u64, s: &str) -> u64 {
    let mut h: u64 = 14_695_981_039_346_656_037;
    for b in s.as_bytes() {
        h ^= u64::from(*b);
        h = h.wrapping_mul(1_099_511_628_211);
    }
    splitmix64(seed ^ h)
}

#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn invert_2x2(m: &[f64]) -> Vec<f64> {
        let det = m[0] * m[3] - m[1] * m[2];
        vec![m[3] / det, -m[1] / det, -m[2] / det, m[0] / det]
    }

    #[test]
    fn sherman_morrison_matches_direct_inverse() {
        let mut a = vec![1.0, 0.0, 0.0, 1.0];
        let mut a_inv = scaled_identity(2, 1.0);
        for x in [[1.0, 2.0], [0.5, -1.0], [3.0, 0.25]] {
            for i in 0..2 {
                for j in 0..2 {
                    a[i * 2 + j] += x[i] * x[j];
                }
            }
            assert!(sherman_morrison_update(&mut a_inv, 2, &x));
        }
        let direct = invert_2x2(&a);
        for (u, v) in a_inv.iter().zip(direct.iter()) {
            assert!((u - v).abs() < 1e-9, "{u} vs {v}");
        }
    }

    #[test]
    fn softmax_is_shift_invariant_and_normalized() {
        let p = softmax(&[1000.0, 1001.0, 999.0], 1.0);
        let q = softmax(&[0.0, 1.0, -1.0], 1.0);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        for (a, b) in p.iter().zip(q.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn softmax_falls_back_to_uniform_on_nan() {
        assert_eq!(softmax(&[f64::NAN, f64::NAN], 1.0), vec![0.5, 0.5]);
    }

    #[test]
    fn argmax_prefers_first_and_skips_nan() {
        assert_eq!(argmax(&[0.1, 0.9, 0.9]), Some(1));
        assert_eq!(argmax(&[f64::NAN, 0.2]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn ties_are_collected() {
        assert_eq!(ties_at_max(&[0.3, 0.3, 0.1]), vec![0, 1]);
        assert_eq!(uniform_over(3, &[0, 1]), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn epsilon_mixture_is_additive() {
        let p = epsilon_mixture(3, 0, 0.1);
        assert!((p[0] - (0.1 / 3.0 + 0.9)).abs() < 1e-12);
        assert!((p[1] - 0.1 / 3.0).abs() < 1e-12);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sample_categorical_never_picks_zero_mass() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let i = sample_categorical(&[0.0, 1.0, 0.0], &mut rng);
            assert_eq!(i, 1);
        }
    }

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash64(1, "lin_ucb"), stable_hash64(1, "lin_ucb"));
        assert_ne!(stable_hash64(1, "lin_ucb"), stable_hash64(2, "lin_ucb"));
    }
}
