use std::collections::VecDeque;

/// A fixed-capacity double-ended ring. New elements go to the front; when the bucket is full,
///  inserting evicts the oldest element from the back and hands it to the caller.
///
/// The backing storage is allocated once with the full capacity and never grows.
pub struct Bucket<T> {
    elements: VecDeque<T>,
    capacity: usize,
}

impl<T> Bucket<T> {
    pub fn new(capacity: usize) -> Bucket<T> {
        assert!(capacity > 0, "bucket capacity must be positive");
        Bucket {
            elements: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Inserts `element` as the newest element, returning the evicted oldest element if the
    ///  bucket was full.
    pub fn push_front(&mut self, element: T) -> Option<T> {
        let evicted = if self.elements.len() == self.capacity {
            self.elements.pop_back()
        }
        else {
            None
        };
        self.elements.push_front(element);
        evicted
    }

    /// removes the newest element
    pub fn pop_front(&mut self) -> Option<T> {
        self.elements.pop_front()
    }

    /// removes the oldest element
    pub fn pop_back(&mut self) -> Option<T> {
        self.elements.pop_back()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.elements.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// iterates from newest to oldest
    pub fn iter(&self) -> impl Iterator<Item=&T> {
        self.elements.iter()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, 0)]
    #[case(1, 5)]
    #[case(3, 2)]
    #[case(3, 3)]
    #[case(3, 10)]
    #[case(100, 250)]
    fn test_capacity_invariant(#[case] capacity: usize, #[case] num_pushes: usize) {
        let mut bucket = Bucket::new(capacity);
        let mut num_evicted = 0;

        for i in 0..num_pushes {
            let was_full = bucket.is_full();
            let evicted = bucket.push_front(i);
            assert!(bucket.len() <= bucket.capacity());

            if was_full {
                // the oldest element is the one evicted
                assert_eq!(evicted, Some(i - capacity));
                num_evicted += 1;
            }
            else {
                assert_eq!(evicted, None);
            }
        }

        assert_eq!(bucket.len(), num_pushes.min(capacity));
        assert_eq!(num_evicted, num_pushes.saturating_sub(capacity));
    }

    #[test]
    fn test_order() {
        let mut bucket = Bucket::new(4);
        for i in 1..=4 {
            bucket.push_front(i);
        }

        assert_eq!(bucket.iter().cloned().collect::<Vec<_>>(), vec![4, 3, 2, 1]);
        assert_eq!(bucket.pop_front(), Some(4));
        assert_eq!(bucket.pop_back(), Some(1));
        assert_eq!(bucket.len(), 2);

        bucket.clear();
        assert!(bucket.is_empty());
        assert_eq!(bucket.pop_back(), None);
        assert_eq!(bucket.pop_front(), None);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity() {
        Bucket::<u32>::new(0);
    }
}
