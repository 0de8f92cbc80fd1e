//! Integer-support noise samplers after Canonne, Kamath & Steinke,
//! "The Discrete Gaussian for Differential Privacy" (2020).
//!
//! All draws reduce to Bernoulli(exp(-γ)) trials, so no transcendental
//! inverse-CDF evaluation is involved; the real-valued scale parameters
//! coming from the configuration are snapped to a fixed-denominator
//! rational before sampling.

use rand::Rng;

/// Denominator used to express a real scale as a rational `t / SCALE_DENOM`.
const SCALE_DENOM: u64 = 1 << 20;

/// Bernoulli(exp(-gamma)) for gamma in [0, 1].
///
/// Draws Bernoulli(gamma / k) until the first failure; the stopping index
/// is odd with probability exp(-gamma).
fn bernoulli_exp_unit<R: Rng + ?Sized>(rng: &mut R, gamma: f64) -> bool {
    debug_assert!((0.0..=1.0).contains(&gamma), "gamma must be in [0, 1]");

    let mut k = 1u64;
    while rng.random_bool((gamma / k as f64).min(1.0)) {
        k += 1;
    }
    k % 2 == 1
}

/// Bernoulli(exp(-gamma)) for any gamma >= 0.
fn bernoulli_exp<R: Rng + ?Sized>(rng: &mut R, gamma: f64) -> bool {
    debug_assert!(gamma >= 0.0 && gamma.is_finite(), "gamma must be finite and non-negative");

    let mut rest = gamma;
    while rest > 1.0 {
        if !bernoulli_exp_unit(rng, 1.0) {
            return false;
        }
        rest -= 1.0;
    }
    bernoulli_exp_unit(rng, rest)
}

/// Discrete Laplace with rational scale `t / s`: P(X = x) ∝ exp(-|x| s / t).
fn sample_discrete_laplace_ratio<R: Rng + ?Sized>(rng: &mut R, t: u64, s: u64) -> i64 {
    debug_assert!(t >= 1 && s >= 1, "scale numerator and denominator must be positive");

    loop {
        let u = rng.random_range(0..t);
        if !bernoulli_exp_unit(rng, u as f64 / t as f64) {
            continue;
        }
        let mut v = 0u64;
        while bernoulli_exp_unit(rng, 1.0) {
            v += 1;
        }
        let magnitude = ((u + t * v) / s) as i64;
        let negative = rng.random_bool(0.5);
        if negative && magnitude == 0 {
            continue;
        }
        return if negative { -magnitude } else { magnitude };
    }
}

/// Discrete Laplace with real scale `t`: P(X = x) ∝ exp(-|x| / t).
pub fn sample_discrete_laplace<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> i64 {
    debug_assert!(scale >= 0.0 && scale.is_finite(), "scale must be finite and non-negative");

    let t = ((scale * SCALE_DENOM as f64).round() as u64).max(1);
    sample_discrete_laplace_ratio(rng, t, SCALE_DENOM)
}

/// Discrete Gaussian with variance parameter `sigma2`:
/// P(X = x) ∝ exp(-x² / (2 sigma2)).
///
/// Rejection from a discrete Laplace with integer scale ⌊σ⌋ + 1.
pub fn sample_discrete_gaussian<R: Rng + ?Sized>(rng: &mut R, sigma2: f64) -> i64 {
    debug_assert!(sigma2 > 0.0 && sigma2.is_finite(), "sigma2 must be finite and positive");

    let t = sigma2.sqrt().floor() as u64 + 1;
    loop {
        let y = sample_discrete_laplace_ratio(rng, t, 1);
        let gamma = (y.unsigned_abs() as f64 - sigma2 / t as f64).powi(2) / (2.0 * sigma2);
        if bernoulli_exp(rng, gamma) {
            return y;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    const SAMPLES: usize = 20_000;

    fn moments(samples: &[i64]) -> (f64, f64) {
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<i64>() as f64 / n;
        let var = samples.iter().map(|&x| (x as f64 - mean).powi(2)).sum::<f64>() / n;
        (mean, var)
    }

    #[test]
    fn bernoulli_exp_matches_probability() {
        let mut rng = StdRng::seed_from_u64(7);
        for gamma in [0.0, 0.3, 1.0, 2.5] {
            let hits = (0..SAMPLES).filter(|_| bernoulli_exp(&mut rng, gamma)).count();
            let observed = hits as f64 / SAMPLES as f64;
            assert!(
                (observed - (-gamma).exp()).abs() < 0.02,
                "gamma={gamma}: observed {observed}"
            );
        }
    }

    #[test]
    fn laplace_is_centered() {
        let mut rng = StdRng::seed_from_u64(11);
        let samples: Vec<i64> =
            (0..SAMPLES).map(|_| sample_discrete_laplace(&mut rng, 1.0)).collect();
        let (mean, var) = moments(&samples);

        assert!(mean.abs() < 0.05, "mean {mean}");
        // Var = 2 e^{-1/t} / (1 - e^{-1/t})² ≈ 1.84 at scale t = 1.
        assert!((1.6..2.1).contains(&var), "variance {var}");
    }

    #[test]
    fn laplace_variance_tracks_scale() {
        let mut rng = StdRng::seed_from_u64(13);
        // Scale 1/ε with ε = 0.5: continuous approximation gives 2/ε² = 8.
        let samples: Vec<i64> =
            (0..SAMPLES).map(|_| sample_discrete_laplace(&mut rng, 2.0)).collect();
        let (mean, var) = moments(&samples);

        assert!(mean.abs() < 0.15, "mean {mean}");
        assert!((6.5..10.0).contains(&var), "variance {var}");
    }

    #[test]
    fn tiny_laplace_scale_is_mostly_zero() {
        let mut rng = StdRng::seed_from_u64(17);
        let zeros = (0..SAMPLES)
            .filter(|_| sample_discrete_laplace(&mut rng, 0.05) == 0)
            .count();
        assert!(zeros as f64 / SAMPLES as f64 > 0.99);
    }

    #[test]
    fn gaussian_is_centered_with_matching_variance() {
        let mut rng = StdRng::seed_from_u64(19);
        let samples: Vec<i64> =
            (0..SAMPLES).map(|_| sample_discrete_gaussian(&mut rng, 4.0)).collect();
        let (mean, var) = moments(&samples);

        assert!(mean.abs() < 0.1, "mean {mean}");
        assert!((3.4..4.6).contains(&var), "variance {var}");
    }

    #[test]
    fn gaussian_beats_laplace_at_small_noise() {
        let mut rng = StdRng::seed_from_u64(23);
        let gauss: f64 = (0..SAMPLES)
            .map(|_| sample_discrete_gaussian(&mut rng, 1.0 / 20.0).abs() as f64)
            .sum::<f64>() / SAMPLES as f64;
        let laplace: f64 = (0..SAMPLES)
            .map(|_| sample_discrete_laplace(&mut rng, 1.0 / 3.0).abs() as f64)
            .sum::<f64>() / SAMPLES as f64;
        assert!(gauss < laplace, "gaussian {gauss} vs laplace {laplace}");
    }
}
