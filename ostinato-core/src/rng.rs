use std::time::{SystemTime, UNIX_EPOCH};

/// Small LCG used for step trigger probability. No reproducibility is
/// guaranteed across runs; tests construct it with a fixed seed.
#[derive(Debug, Clone)]
pub struct Rng(u64);

impl Rng {
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
            .unwrap_or(0x4d595df4d0f33173);
        Self(nanos | 1)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform draw over [0, 100).
    pub fn next_percent(&mut self) -> u8 {
        (self.next_u32() % 100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_range() {
        let mut rng = Rng::with_seed(1);
        for _ in 0..1000 {
            assert!(rng.next_percent() < 100);
        }
    }

    #[test]
    fn test_seed_determinism() {
        let mut a = Rng::with_seed(42);
        let mut b = Rng::with_seed(42);
        for _ in 0..100 {
            assert_eq!(a.next_percent(), b.next_percent());
        }
    }
}
