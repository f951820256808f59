/// `(period count above which the tier applies, decay rate)`, steepest first.
const DECAY_TIERS: &[(usize, f64)] = &[
    (127, 0.0153),
    (98, 0.0204),
    (66, 0.0306),
    (51, 0.0408),
    (34, 0.0611),
    (26, 0.075),
    (23, 0.09),
    (21, 0.1035),
];
const FALLBACK_RATE: f64 = 0.12;
/// Subtracted from every tier rate to flatten the curve slightly.
pub const RATE_OFFSET: f64 = 0.01;

/// Number of scoring periods in the lookback window, rounded up.
pub fn num_periods(lookback_hours: u32, period_minutes: u32) -> usize {
    let minutes = lookback_hours as usize * 60;
    let period = period_minutes.max(1) as usize;
    minutes.div_ceil(period)
}

pub fn tier_rate(num_periods: usize) -> f64 {
    DECAY_TIERS.iter().find(|(above, _)| num_periods > *above).map_or(FALLBACK_RATE, |(_, rate)| *rate)
}

pub fn decay_rate(num_periods: usize) -> f64 { tier_rate(num_periods) - RATE_OFFSET }

/// `weight[i] = exp(-rate * i)` for each period, newest first.
pub fn recency_curve(num_periods: usize) -> Vec<f64> {
    let rate = decay_rate(num_periods);
    (0..num_periods).map(|i| (-rate * i as f64).exp()).collect()
}
