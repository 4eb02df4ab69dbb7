//! Running metric trackers for progress reporting.

/// Exponentially smoothed value: `0.1 * new + 0.9 * running`, seeded with
/// the first observation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExponentialAverage {
    value: Option<f64>,
}

impl ExponentialAverage {
    const NEW_WEIGHT: f64 = 0.1;

    pub fn new() -> Self {
        Self::default()
    }

    /// Folds in `x` and returns the updated average.
    pub fn update(&mut self, x: f64) -> f64 {
        let next = match self.value {
            Some(running) => Self::NEW_WEIGHT * x + (1.0 - Self::NEW_WEIGHT) * running,
            None => x,
        };
        self.value = Some(next);
        next
    }

    /// Current average, 0 before any update.
    pub fn value(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

/// Plain arithmetic mean of everything seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, x: f64) -> f64 {
        self.sum += x;
        self.count += 1;
        self.value()
    }

    pub fn value(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}
