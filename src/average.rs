use anyhow::{ensure, Result};
use rust_decimal::Decimal;

pub const MIN_WINDOW: usize = 2;
pub const MAX_WINDOW: usize = 100;

/// Running mean of the most recent `capacity` values.
///
/// Each update is O(1): the value leaving the window is subtracted from the
/// running sum instead of re-summing the buffer. `running_sum` always equals
/// the exact sum of the `filled` values resident in `buffer`.
#[derive(Debug)]
pub struct SlidingAverage {
    buffer: Vec<Decimal>,
    cursor: usize,
    filled: usize,
    running_sum: Decimal,
}

impl SlidingAverage {
    pub fn new(capacity: usize) -> Result<Self> {
        ensure!(
            (MIN_WINDOW..=MAX_WINDOW).contains(&capacity),
            "window size must be between {MIN_WINDOW} and {MAX_WINDOW}, got {capacity}"
        );
        Ok(Self {
            buffer: vec![Decimal::ZERO; capacity],
            cursor: 0,
            filled: 0,
            running_sum: Decimal::ZERO,
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Largest magnitude a sample may have. A full window of the largest
    /// window size then sums to at most a tenth of `Decimal::MAX`, which
    /// leaves room for rescaling on each addition.
    pub fn max_sample() -> Decimal {
        Decimal::MAX / Decimal::from(MAX_WINDOW as u64 * 10)
    }

    pub fn accepts(value: Decimal) -> bool {
        value.abs() <= Self::max_sample()
    }

    /// Adds `value` and returns the mean of the values now in the window.
    /// The divisor is the number of samples seen so far until the window fills.
    ///
    /// Returns `None`, leaving the window untouched, if the running sum would
    /// overflow; that cannot happen for values that pass [`Self::accepts`].
    pub fn push(&mut self, value: Decimal) -> Option<Decimal> {
        let full = self.filled == self.capacity();
        let evicted = if full {
            self.buffer[self.cursor]
        } else {
            Decimal::ZERO
        };
        let sum = self.running_sum.checked_sub(evicted)?.checked_add(value)?;
        let filled = if full { self.filled } else { self.filled + 1 };
        let mean = sum.checked_div(Decimal::from(filled as u64))?;

        self.running_sum = sum;
        self.buffer[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.capacity();
        self.filled = filled;
        Some(mean)
    }
}
