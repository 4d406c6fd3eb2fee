use crate::config::SolverConfig;

/// Result of a bounded bisection search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BisectionOutcome {
    /// Largest candidate found feasible, if any.
    pub best: Option<f64>,
    pub iterations: u32,
}

/// Searches `[lo, hi]` for the largest value accepted by `feasible`, assuming
/// feasibility is monotone (feasible below some threshold, infeasible above).
///
/// `hi` is tried first and returned immediately when accepted. Otherwise the
/// bracket is halved until it is narrower than `config.tolerance` or
/// `config.max_iterations` candidates have been tried, keeping the best
/// feasible one seen.
pub fn largest_feasible<F>(lo: f64, hi: f64, config: &SolverConfig, mut feasible: F) -> BisectionOutcome
where
    F: FnMut(f64) -> bool,
{
    if !(lo.is_finite() && hi.is_finite()) || hi < lo {
        return BisectionOutcome { best: None, iterations: 0 };
    }

    let mut iterations = 1;
    if feasible(hi) {
        return BisectionOutcome { best: Some(hi), iterations };
    }

    let (mut low, mut high) = (lo, hi);
    let mut best = None;
    while iterations < config.max_iterations && high - low > config.tolerance {
        let mid = 0.5 * (low + high);
        iterations += 1;
        if feasible(mid) {
            best = Some(mid);
            low = mid;
        } else {
            high = mid;
        }
        tracing::trace!(iteration = iterations, low, high, "bisection step");
    }

    BisectionOutcome { best, iterations }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn config() -> SolverConfig { SolverConfig::default() }

    #[rstest]
    #[case(0.0, 100.0, 37.5)]
    #[case(0.0, 1.0, 0.25)]
    #[case(10.0, 20.0, 19.99)]
    fn test_converges_to_threshold(#[case] lo: f64, #[case] hi: f64, #[case] threshold: f64) {
        let out = largest_feasible(lo, hi, &config(), |x| x <= threshold);
        let best = out.best.unwrap();
        assert!(best <= threshold);
        assert!(threshold - best < 1e-3, "best {} too far from {}", best, threshold);
    }

    #[test]
    fn test_upper_bound_accepted_first() {
        let mut calls = 0;
        let out = largest_feasible(0.0, 50.0, &config(), |_| {
            calls += 1;
            true
        });
        assert_eq!(out.best, Some(50.0));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_nothing_feasible() {
        let out = largest_feasible(0.0, 10.0, &config(), |_| false);
        assert_eq!(out.best, None);
        assert!(out.iterations <= config().max_iterations);
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let cfg = SolverConfig { max_iterations: 5, tolerance: 1e-12, ..SolverConfig::default() };
        let mut calls = 0;
        let out = largest_feasible(0.0, 1e6, &cfg, |x| {
            calls += 1;
            x < 1.0
        });
        assert_eq!(out.iterations, 5);
        assert_eq!(calls, 5);
    }
}
