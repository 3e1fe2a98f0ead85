use std::sync::{atomic::AtomicU64, Arc};

/// Thread-safe monotonically increasing ID generator.
///
/// Used for mutable-block IDs, sealed-block IDs, and cold-file IDs; each
/// of those needs its own counter so IDs don't collide across ID spaces,
/// but the increment behavior is identical, hence one shared type.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator(Arc<AtomicU64>);

impl IdGenerator {
    /// Creates a new generator starting at `start`.
    #[must_use]
    pub fn starting_at(start: u64) -> Self {
        Self(Arc::new(AtomicU64::new(start)))
    }

    /// Gets the next ID, without consuming it.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Gets the next ID and advances the counter.
    #[must_use]
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::AcqRel)
    }

    /// Bumps the counter to be at least `value`, used when recovering
    /// a counter from persisted state so freshly-minted IDs never collide
    /// with ones that already exist on disk.
    pub fn fetch_max(&self, value: u64) {
        self.0.fetch_max(value, std::sync::atomic::Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let gen = IdGenerator::default();
        assert_eq!(0, gen.next());
        assert_eq!(1, gen.next());
        assert_eq!(2, gen.get());
    }

    #[test]
    fn fetch_max_only_increases() {
        let gen = IdGenerator::default();
        gen.fetch_max(10);
        assert_eq!(10, gen.next());
        gen.fetch_max(5);
        assert_eq!(11, gen.next());
    }
}
