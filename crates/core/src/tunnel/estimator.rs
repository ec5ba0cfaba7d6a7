/// Exponentially weighted estimate of the fraction of marked traffic.
///
/// `alpha <- (1 - g) * alpha + g * marked_ratio`, once per interval. With
/// `alpha` and the sample in `[0, 1]` and `g` in `(0, 1)` the estimate stays
/// in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionEstimator {
    alpha: f64,
    gamma: f64,
}

impl CongestionEstimator {
    /// Alpha before any sample: assume full congestion until told otherwise.
    pub const INITIAL_ALPHA: f64 = 1.0;

    pub fn new(gamma: f64) -> Self {
        Self::with_alpha(gamma, Self::INITIAL_ALPHA)
    }

    pub fn with_alpha(gamma: f64, alpha: f64) -> Self {
        Self { alpha, gamma }
    }

    /// The estimate that `refresh(marked_ratio)` would store.
    pub fn next(&self, marked_ratio: f64) -> f64 {
        (1.0 - self.gamma) * self.alpha + self.gamma * marked_ratio
    }

    /// Folds in the marked ratio of the interval that just ended.
    pub fn refresh(&mut self, marked_ratio: f64) -> f64 {
        self.alpha = self.next(marked_ratio);
        self.alpha
    }

    pub fn get(&self) -> f64 {
        self.alpha
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_starts_fully_congested() {
        let estimator = CongestionEstimator::new(1.0 / 16.0);
        assert_eq!(estimator.get(), 1.0);
    }

    #[test]
    fn test_half_gamma_halves_distance() {
        let mut estimator = CongestionEstimator::new(0.5);
        assert_eq!(estimator.refresh(0.0), 0.5);
        assert_eq!(estimator.refresh(0.0), 0.25);
        assert_eq!(estimator.refresh(1.0), 0.625);
    }

    #[test]
    fn test_default_gamma_decays_slowly() {
        let mut estimator = CongestionEstimator::new(1.0 / 16.0);
        estimator.refresh(0.5);
        assert_eq!(estimator.get(), 0.96875);
    }

    #[test]
    fn test_next_does_not_commit() {
        let estimator = CongestionEstimator::with_alpha(0.25, 0.0);
        assert_eq!(estimator.next(1.0), 0.25);
        assert_eq!(estimator.get(), 0.0);
    }

    proptest! {
        #[test]
        fn refresh_is_convex_combination(
            alpha in 0.0f64..=1.0,
            gamma in 0.0001f64..0.9999,
            ratio in 0.0f64..=1.0,
        ) {
            let mut estimator = CongestionEstimator::with_alpha(gamma, alpha);
            let updated = estimator.refresh(ratio);
            prop_assert_eq!(updated, (1.0 - gamma) * alpha + gamma * ratio);
            prop_assert!((0.0..=1.0).contains(&updated));
        }
    }
}
