//! Breakpoint set: future simulation times the integrator must land on
//! exactly (source edges, user requests, the final time).

/// Monotonically ordered set of breakpoint times.
///
/// Times closer together than the resolution coalesce. The set always
/// contains the final time once the driver has seeded it.
#[derive(Debug, Clone)]
pub struct Breakpoints {
    times: Vec<f64>,
    resolution: f64,
}

impl Breakpoints {
    /// Create an empty set with the given coalescing resolution.
    pub fn new(resolution: f64) -> Self {
        Self {
            times: Vec::new(),
            resolution,
        }
    }

    /// Coalescing resolution: two times within this distance are one
    /// breakpoint.
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Insert a breakpoint, keeping the set ordered. Duplicates within the
    /// resolution coalesce onto the existing entry.
    pub fn set(&mut self, time: f64) {
        match self
            .times
            .binary_search_by(|t| t.partial_cmp(&time).expect("finite breakpoint"))
        {
            Ok(_) => {}
            Err(idx) => {
                let near_prev = idx > 0 && (time - self.times[idx - 1]) < self.resolution;
                let near_next =
                    idx < self.times.len() && (self.times[idx] - time) < self.resolution;
                if !near_prev && !near_next {
                    self.times.insert(idx, time);
                }
            }
        }
    }

    /// Earliest pending breakpoint.
    pub fn first(&self) -> Option<f64> {
        self.times.first().copied()
    }

    /// Second-earliest pending breakpoint.
    pub fn second(&self) -> Option<f64> {
        self.times.get(1).copied()
    }

    /// Remove and return the earliest pending breakpoint.
    pub fn pop_first(&mut self) -> Option<f64> {
        if self.times.is_empty() {
            None
        } else {
            Some(self.times.remove(0))
        }
    }

    /// Remove breakpoints strictly before `time`. A breakpoint hit exactly
    /// (within the resolution) stays: the next step setup consumes it after
    /// applying the post-breakpoint step rules.
    pub fn clear_passed(&mut self, time: f64) {
        let res = self.resolution;
        self.times.retain(|&t| t > time - res);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Drop all breakpoints (unsetup).
    pub fn release(&mut self) {
        self.times.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_insertion() {
        let mut bp = Breakpoints::new(1e-12);
        bp.set(3e-3);
        bp.set(1e-3);
        bp.set(2e-3);

        assert_eq!(bp.first(), Some(1e-3));
        assert_eq!(bp.second(), Some(2e-3));
        assert_eq!(bp.len(), 3);
    }

    #[test]
    fn test_duplicates_coalesce() {
        let mut bp = Breakpoints::new(1e-9);
        bp.set(1e-3);
        bp.set(1e-3);
        bp.set(1e-3 + 1e-10); // within resolution
        assert_eq!(bp.len(), 1);

        bp.set(1e-3 + 1e-6); // outside resolution
        assert_eq!(bp.len(), 2);
    }

    #[test]
    fn test_clear_passed_keeps_exact_hit() {
        let mut bp = Breakpoints::new(1e-12);
        bp.set(1e-3);
        bp.set(2e-3);
        bp.set(3e-3);

        bp.clear_passed(2e-3);
        // 1ms is strictly passed; the exactly-hit 2ms stays.
        assert_eq!(bp.first(), Some(2e-3));
        assert_eq!(bp.len(), 2);

        assert_eq!(bp.pop_first(), Some(2e-3));
        assert_eq!(bp.first(), Some(3e-3));
    }
}
