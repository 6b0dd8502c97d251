//! Skewed object-size sampling.
//!
//! Sizes are drawn from an approximation of a truncated exponential
//! distribution so that small objects dominate while the occasional large
//! one still exercises the multipart upload path.

use rand::Rng;

use crate::data_unit::DATA_UNIT_SIZE;
use crate::error::{Error, Result};

/// Draws a random object size in `[min_size, max_size]` aligned to the
/// data unit, biased toward the low end.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `min_size` is below one data unit,
/// either bound is not a multiple of the data unit, or the range is empty.
pub fn decide_size(min_size: usize, max_size: usize) -> Result<usize> {
    decide_size_with(&mut rand::thread_rng(), min_size, max_size)
}

/// [`decide_size`] with an explicit RNG, for deterministic tests.
///
/// # Errors
///
/// Same constraints as [`decide_size`].
pub fn decide_size_with<R: Rng>(rng: &mut R, min_size: usize, max_size: usize) -> Result<usize> {
    if min_size < DATA_UNIT_SIZE {
        return Err(Error::InvalidInput(format!(
            "min size must be at least {DATA_UNIT_SIZE}, got {min_size}"
        )));
    }
    if min_size % DATA_UNIT_SIZE != 0 {
        return Err(Error::InvalidInput(format!(
            "min size must be a multiple of {DATA_UNIT_SIZE}, got {min_size}"
        )));
    }
    if max_size % DATA_UNIT_SIZE != 0 {
        return Err(Error::InvalidInput(format!(
            "max size must be a multiple of {DATA_UNIT_SIZE}, got {max_size}"
        )));
    }
    if max_size < min_size {
        return Err(Error::InvalidInput(format!(
            "max size {max_size} must not be below min size {min_size}"
        )));
    }

    // Inverse transform sampling for the density f(x) = 2^(1-x) on [0, 1):
    // y ~ Unif[0,1) mapped through the inverse CDF -log2(1 - y/2) yields a
    // distribution close to a truncated exponential.
    let y: f64 = rng.gen();
    let x = -f64::log2(1.0 - 0.5 * y);

    let steps = (max_size - min_size) / DATA_UNIT_SIZE + 1;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let step = (steps as f64 * x) as usize;
    Ok(min_size + DATA_UNIT_SIZE * step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn rejects_invalid_ranges() {
        assert!(decide_size(128, 512).is_err());
        assert!(decide_size(300, 512).is_err());
        assert!(decide_size(256, 300).is_err());
        assert!(decide_size(512, 256).is_err());
    }

    #[test]
    fn degenerate_range_returns_the_single_size() {
        for _ in 0..32 {
            assert_eq!(decide_size(1024, 1024).unwrap(), 1024);
        }
    }

    #[test]
    fn small_sizes_dominate() {
        let mut rng = StdRng::seed_from_u64(7);
        let min = 256;
        let max = 256 * 1024;
        let mid = (min + max) / 2;
        let below_mid = (0..2000)
            .filter(|_| decide_size_with(&mut rng, min, max).unwrap() < mid)
            .count();
        assert!(below_mid > 1200, "only {below_mid}/2000 samples below the midpoint");
    }

    proptest! {
        #[test]
        fn samples_stay_in_range_and_aligned(
            min_units in 1usize..64,
            extra_units in 0usize..64,
            seed in any::<u64>(),
        ) {
            let min = min_units * DATA_UNIT_SIZE;
            let max = (min_units + extra_units) * DATA_UNIT_SIZE;
            let mut rng = StdRng::seed_from_u64(seed);
            let size = decide_size_with(&mut rng, min, max).unwrap();
            prop_assert!(size >= min);
            prop_assert!(size <= max);
            prop_assert_eq!(size % DATA_UNIT_SIZE, 0);
        }
    }
}
