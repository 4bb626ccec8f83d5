//! Fixed-capacity ring storage for per-sample signal series.
//!
//! Every series kept by a [`HarmonicProcessor`](crate::data::processor::HarmonicProcessor)
//! lives in a [`RingBuffer`]. Slots are addressed by a *logical* index, normally the
//! processor's monotonically increasing sample counter, which [`CircularSeries`] folds
//! onto a physical slot. Old samples are overwritten, never removed.
//!
//! ```
//! use rust_ppg::data::ring_buffer::{CircularSeries, RingBuffer};
//!
//! let series = CircularSeries::new(4);
//! assert_eq!(series.resolve(-1), 3);
//! assert_eq!(series.resolve(9), 1);
//!
//! let mut ring = RingBuffer::filled(4, 0.0_f64);
//! for tick in 0..6 {
//!     ring.set(tick, tick as f64);
//! }
//! // Logical index 5 overwrote slot 1.
//! assert_eq!(ring.get(5), 5.0);
//! assert_eq!(ring.window(6, 4), vec![2.0, 3.0, 4.0, 5.0]);
//! ```

/// Maps logical offsets onto slots of a fixed-length circular series.
///
/// `resolve` is defined for every integer, including negative offsets, and is periodic in
/// the series length: `resolve(i) == resolve(i + k * length)` for any `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircularSeries {
    length: usize,
}

impl CircularSeries {
    /// Creates a series of `length` slots.
    ///
    /// A zero length is promoted to one slot so that resolution is always defined.
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.length
    }

    /// Always false; a series has at least one slot.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Folds a logical offset onto a slot index in `0..len()`.
    #[inline]
    pub fn resolve(&self, offset: isize) -> usize {
        // rem_euclid keeps negative look-backs in range
        offset.rem_euclid(self.length as isize) as usize
    }
}

/// Owned ring of `T` addressed through a [`CircularSeries`].
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    series: CircularSeries,
}

impl<T: Clone> RingBuffer<T> {
    /// Creates a ring of `length` slots, each set to `value`.
    pub fn filled(length: usize, value: T) -> Self {
        let series = CircularSeries::new(length);
        Self {
            slots: vec![value; series.len()],
            series,
        }
    }

    /// Reads the slot for logical index `offset`.
    #[inline]
    pub fn get(&self, offset: isize) -> T {
        self.slots[self.series.resolve(offset)].clone()
    }

    /// Returns the `count` values ending just before logical index `end`, oldest first.
    ///
    /// `count` larger than the ring wraps around and repeats older slots.
    pub fn window(&self, end: isize, count: usize) -> Vec<T> {
        let start = end - count as isize;
        (0..count as isize).map(|i| self.get(start + i)).collect()
    }

    /// Fills every slot with `value`.
    pub fn fill(&mut self, value: T) {
        self.slots.fill(value);
    }
}

impl<T> RingBuffer<T> {
    /// Writes `value` into the slot for logical index `offset`.
    #[inline]
    pub fn set(&mut self, offset: isize, value: T) {
        let slot = self.series.resolve(offset);
        self.slots[slot] = value;
    }

    /// Mutable access to the slot for logical index `offset`.
    #[inline]
    pub fn get_mut(&mut self, offset: isize) -> &mut T {
        let slot = self.series.resolve(offset);
        &mut self.slots[slot]
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when the ring has no slots (never, see [`CircularSeries::new`]).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The slot addressing used by this ring.
    pub fn series(&self) -> CircularSeries {
        self.series
    }

    /// Raw slots in physical order.
    pub fn as_slice(&self) -> &[T] {
        &self.slots
    }

    /// Iterates over raw slots in physical order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.slots.iter()
    }
}
