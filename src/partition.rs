// src/partition.rs

//! Row ownership across workers.
//!
//! Destination row `y` belongs to core `y mod num_cores`. Every drawing command
//! walks only the rows its core owns, so the workers together cover each row
//! of a command's footprint exactly once and never write the same pixel.
//!
//! The partition is a pure function of `(core, num_cores)`. The worker count is
//! fixed for a pipeline's lifetime, so it never changes under a command.

/// The slice of destination rows owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorePartition {
    core: usize,
    num_cores: usize,
}

impl CorePartition {
    /// # Panics
    /// Panics if `num_cores == 0` or `core >= num_cores`.
    pub fn new(core: usize, num_cores: usize) -> Self {
        assert!(num_cores >= 1, "partition needs at least one core");
        assert!(
            core < num_cores,
            "core {} out of range for {} cores",
            core,
            num_cores
        );
        Self { core, num_cores }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    pub fn num_cores(&self) -> usize {
        self.num_cores
    }

    /// Whether row `y` belongs to this core. Negative rows partition the same way.
    #[inline]
    pub fn owns(&self, y: i32) -> bool {
        y.rem_euclid(self.num_cores as i32) as usize == self.core
    }

    /// First owned row at or after `start`.
    #[inline]
    pub fn first_row(&self, start: i32) -> i32 {
        let n = self.num_cores as i32;
        let offset = (self.core as i32 - start.rem_euclid(n)).rem_euclid(n);
        start + offset
    }

    /// Owned rows in `start..end`, ascending.
    pub fn rows(&self, start: i32, end: i32) -> impl Iterator<Item = i32> {
        let first = self.first_row(start);
        (first..end.max(first)).step_by(self.num_cores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_row_is_owned_and_minimal() {
        for n in 1..9 {
            for core in 0..n {
                let p = CorePartition::new(core, n);
                for start in -20..20 {
                    let first = p.first_row(start);
                    assert!(p.owns(first));
                    assert!(first >= start && first < start + n as i32);
                }
            }
        }
    }

    #[test]
    fn rows_cover_range_exactly_once() {
        for n in 1..=8 {
            for (start, end) in [(0, 100), (-7, 13), (5, 6), (3, 3), (10, 2)] {
                let mut hits = vec![0u32; 200];
                for core in 0..n {
                    for y in CorePartition::new(core, n).rows(start, end) {
                        hits[(y + 100) as usize] += 1;
                    }
                }
                for y in -100..100 {
                    let expected = u32::from(y >= start && y < end);
                    assert_eq!(hits[(y + 100) as usize], expected, "row {} n={}", y, n);
                }
            }
        }
    }

    #[test]
    #[should_panic]
    fn core_out_of_range_panics() {
        let _ = CorePartition::new(4, 4);
    }
}
