//! Tag-indexed, set-associative instruction cache.
//!
//! The instruction word is always sourced from the backing ELF view,
//! hit or miss; a miss costs nothing but a statistic, matching §4.4's
//! "fetch is modelled only as a tag-indexed hit/miss counter".

/// One cache, `sets * ways` capacity, LRU within each set.
#[derive(Debug, Clone)]
pub struct ICache {
    line_size: usize,
    ways: usize,
    /// Per-set list of resident tags, MRU-first.
    sets: Vec<Vec<u64>>,
    hits: u64,
    misses: u64,
}

impl ICache {
    /// Builds a cache with `lines` total lines split into sets of
    /// `ways` each, and `line_size`-byte lines.
    #[must_use]
    pub fn new(lines: usize, ways: usize, line_size: usize) -> Self {
        let ways = ways.max(1);
        let num_sets = (lines / ways).max(1);
        Self {
            line_size: line_size.max(4),
            ways,
            sets: vec![Vec::with_capacity(ways); num_sets],
            hits: 0,
            misses: 0,
        }
    }

    fn split(&self, pc: u64) -> (u64, usize) {
        let line = pc / self.line_size as u64;
        let num_sets = self.sets.len() as u64;
        let index = (line % num_sets) as usize;
        let tag = line / num_sets;
        (tag, index)
    }

    /// Looks up `pc`, reports hit/miss, and updates LRU/statistics.
    /// Does not itself fetch the instruction word — callers read that
    /// from the backing view regardless of the result.
    pub fn access(&mut self, pc: u64) -> bool {
        let (tag, index) = self.split(pc);
        let set = &mut self.sets[index];
        if let Some(pos) = set.iter().position(|&t| t == tag) {
            let t = set.remove(pos);
            set.insert(0, t);
            self.hits += 1;
            true
        } else {
            if set.len() >= self.ways {
                let _ = set.pop();
            }
            set.insert(0, tag);
            self.misses += 1;
            false
        }
    }

    /// Total accesses that hit.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits
    }

    /// Total accesses that missed.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_access_is_a_hit() {
        let mut c = ICache::new(4, 2, 64);
        assert!(!c.access(0x1000));
        assert!(c.access(0x1000));
        assert_eq!(c.hits(), 1);
        assert_eq!(c.misses(), 1);
    }

    #[test]
    fn set_eviction_is_lru() {
        let mut c = ICache::new(2, 2, 64);
        // both lines map to the same single set (1 set, 2 ways).
        assert!(!c.access(0)); // miss, insert 0
        assert!(!c.access(64)); // miss, insert 1 (line 1)
        assert!(c.access(0)); // hit, 0 still resident
        assert!(!c.access(128)); // miss, evicts LRU (line 1), inserts line 2
        assert!(!c.access(64)); // line 1 was evicted: miss again
    }
}
