//! Randomness for jitter, identity rotation and worker directory names.
//!
//! Entropy comes from v4 UUIDs, which are backed by the OS random source.

use std::time::Duration;

/// Uniform sample in `[0, 1)`.
pub fn unit() -> f64 {
    // Low 53 bits sit below the fixed version and variant fields.
    let bits = uuid::Uuid::new_v4().as_u128() as u64 & ((1u64 << 53) - 1);
    bits as f64 / (1u64 << 53) as f64
}

/// Uniform sample in `[min, max]`.
pub fn uniform(min: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    min + unit() * (max - min)
}

/// Triangular sample in `[min, max]` with the given mode.
pub fn triangular(min: f64, max: f64, mode: f64) -> f64 {
    if max <= min {
        return min;
    }
    let mode = mode.clamp(min, max);
    let u = unit();
    let split = (mode - min) / (max - min);
    if u < split {
        min + ((max - min) * (mode - min) * u).sqrt()
    } else {
        max - ((max - min) * (max - mode) * (1.0 - u)).sqrt()
    }
}

/// Human-like delay between `min_secs` and `max_secs`, peaking at the midpoint.
pub fn jitter(min_secs: f64, max_secs: f64) -> Duration {
    let secs = triangular(min_secs, max_secs, (min_secs + max_secs) / 2.0);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Integer in `[low, high]`.
pub fn range_inclusive(low: u32, high: u32) -> u32 {
    if high <= low {
        return low;
    }
    let span = (high - low) as f64 + 1.0;
    (low + (unit() * span) as u32).min(high)
}

pub fn choose<T>(items: &[T]) -> Option<&T> {
    if items.is_empty() {
        return None;
    }
    let idx = (unit() * items.len() as f64) as usize;
    items.get(idx.min(items.len() - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_stay_in_bounds() {
        for _ in 0..500 {
            let u = unit();
            assert!((0.0..1.0).contains(&u));

            let t = triangular(1.0, 3.5, 2.25);
            assert!((1.0..=3.5).contains(&t), "triangular out of range: {t}");

            let n = range_inclusive(1000, 9999);
            assert!((1000..=9999).contains(&n));
        }
    }

    #[test]
    fn test_degenerate_ranges() {
        assert_eq!(uniform(2.0, 2.0), 2.0);
        assert_eq!(triangular(3.0, 1.0, 2.0), 3.0);
        assert_eq!(range_inclusive(7, 7), 7);
        assert!(choose::<u8>(&[]).is_none());
    }

    #[test]
    fn test_jitter_duration() {
        let d = jitter(1.5, 3.0);
        assert!(d >= Duration::from_secs_f64(1.5));
        assert!(d <= Duration::from_secs_f64(3.0));
    }
}
