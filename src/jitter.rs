//! Halton jitter sequence for temporal sampling

/// Radical inverse of `index` in `base`, in [0, 1)
pub fn radical_inverse(mut index: u64, base: u32) -> f32 {
    let base = base as u64;
    let inv_base = 1.0 / base as f64;
    let mut f = inv_base;
    let mut r = 0.0f64;
    while index > 0 {
        r += f * (index % base) as f64;
        index /= base;
        f *= inv_base;
    }
    // f64 values just below 1 round up to 1.0 in f32
    (r as f32).min(LARGEST_BELOW_ONE)
}

const LARGEST_BELOW_ONE: f32 = 1.0 - f32::EPSILON / 2.0;

/// Low-discrepancy sequence producing one ray-march offset per frame.
///
/// The cursor starts at 1 so the first value is `1 / base`. It only ever grows;
/// restarting the sequence means constructing a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltonSequence {
    base: u32,
    cursor: u64,
}

impl HaltonSequence {
    /// Base used for the cloud ray-march offset
    pub const DEFAULT_BASE: u32 = 3;

    pub fn new(base: u32) -> Self {
        Self {
            base: base.max(2),
            cursor: 1,
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Number of values produced so far
    pub fn calls(&self) -> u64 {
        self.cursor - 1
    }

    /// Next value in [0, 1)
    pub fn next(&mut self) -> f32 {
        let value = radical_inverse(self.cursor, self.base);
        self.cursor += 1;
        value
    }
}

impl Default for HaltonSequence {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BASE)
    }
}

impl Iterator for HaltonSequence {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        Some(HaltonSequence::next(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_two_prefix() {
        let values: Vec<f32> = HaltonSequence::new(2).take(4).collect();
        assert_eq!(values, vec![0.5, 0.25, 0.75, 0.125]);
    }

    #[test]
    fn base_is_at_least_two() {
        assert_eq!(HaltonSequence::new(1).base(), 2);
    }

    #[test]
    fn calls_tracks_next() {
        let mut seq = HaltonSequence::default();
        seq.next();
        seq.next();
        assert_eq!(seq.calls(), 2);
    }

    #[test]
    fn last_digit_run_stays_below_one() {
        for (base, digits) in [(2u32, 25u32), (2, 40), (3, 17), (3, 30), (5, 20)] {
            let index = (base as u64).pow(digits) - 1;
            let value = radical_inverse(index, base);
            assert!(value < 1.0, "base {} digits {} gave {}", base, digits, value);
            assert!(value > 0.99);
        }
    }

    #[test]
    fn values_stay_in_unit_interval() {
        assert!(HaltonSequence::new(7).take(1000).all(|v| (0.0..1.0).contains(&v)));
    }
}
