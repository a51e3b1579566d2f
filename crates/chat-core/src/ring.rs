//! Fixed-capacity ring buffer.
//!
//! Slots are allocated lazily up to the capacity, after which every push
//! overwrites the oldest entry. `next_write_index` always equals the total
//! number of pushes modulo the capacity.

/// A fixed-capacity FIFO that evicts its oldest element when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    capacity: usize,
    /// Slot the next push writes to.
    head: usize,
}

impl<T> RingBuffer<T> {
    /// Create an empty buffer.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            head: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of elements currently held.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.len() == self.capacity
    }

    /// Index of the slot the next push writes to.
    pub fn next_write_index(&self) -> usize {
        self.head
    }

    /// Append an element, returning the evicted oldest element when full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let evicted = if self.is_full() {
            Some(std::mem::replace(&mut self.slots[self.head], value))
        } else {
            self.slots.push(value);
            None
        };
        self.head = (self.head + 1) % self.capacity;
        evicted
    }

    /// Most recently pushed element.
    pub fn newest(&self) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = (self.head + self.capacity - 1) % self.capacity;
        self.slots.get(idx)
    }

    /// Iterate from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        // While filling, head == len and the oldest element sits at slot 0.
        let split = if self.is_full() { self.head } else { 0 };
        let (newer, older) = self.slots.split_at(split);
        older.iter().chain(newer.iter())
    }

    /// Remove every element and reset the write cursor.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(ring: &RingBuffer<u32>) -> Vec<u32> {
        ring.iter().copied().collect()
    }

    #[test]
    fn test_fill_without_wrap() {
        let mut ring = RingBuffer::new(4);
        assert!(ring.is_empty());
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.next_write_index(), 2);
        assert_eq!(contents(&ring), vec![1, 2]);
        assert_eq!(ring.newest(), Some(&2));
    }

    #[test]
    fn test_wrap_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        for v in 1..=3 {
            ring.push(v);
        }
        assert!(ring.is_full());
        assert_eq!(ring.next_write_index(), 0);

        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.push(5), Some(2));
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.next_write_index(), 2);
        assert_eq!(contents(&ring), vec![3, 4, 5]);
        assert_eq!(ring.newest(), Some(&5));
    }

    #[test]
    fn test_write_index_tracks_total_pushes() {
        let mut ring = RingBuffer::new(7);
        for total in 1..=50usize {
            ring.push(total as u32);
            assert_eq!(ring.next_write_index(), total % 7);
            assert_eq!(ring.len(), total.min(7));
        }
        assert_eq!(contents(&ring), (44..=50).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.next_write_index(), 0);
        assert_eq!(ring.newest(), None);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::<u8>::new(0);
    }
}
