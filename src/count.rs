use core::cell::Cell;

/// The pair of reference counters shared by every handle of one origin.
///
/// The value is alive iff `strong > 0`; the count record itself and the
/// control block are alive iff `strong > 0 || weak > 0`.
#[derive(Debug)]
pub(crate) struct Count {
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Count {
    /// The count of a freshly constructed origin: one shared handle, no weak
    /// ones.
    pub(crate) const fn new() -> Self {
        Count {
            strong: Cell::new(1),
            weak: Cell::new(0),
        }
    }

    #[inline]
    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline]
    pub(crate) fn increment_strong(&self) {
        self.strong.set(self.strong.get() + 1);
    }

    /// Returns the strong count after the decrement.
    #[inline]
    pub(crate) fn decrement_strong(&self) -> usize {
        let strong = self.strong.get();
        assert!(strong > 0, "strong count decremented below zero");
        self.strong.set(strong - 1);
        strong - 1
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    /// Returns the weak count after the decrement.
    #[inline]
    pub(crate) fn decrement_weak(&self) -> usize {
        let weak = self.weak.get();
        assert!(weak > 0, "weak count decremented below zero");
        self.weak.set(weak - 1);
        weak - 1
    }

    /// Whether the last handle of either kind is gone.
    #[inline]
    pub(crate) fn is_unreferenced(&self) -> bool {
        self.strong.get() == 0 && self.weak.get() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::Count;

    #[test]
    fn starts_with_one_strong() {
        let count = Count::new();
        assert_eq!(count.strong(), 1);
        assert_eq!(count.weak(), 0);
        assert!(!count.is_unreferenced());
    }

    #[test]
    fn counters_move_independently() {
        let count = Count::new();
        count.increment_weak();
        count.increment_strong();
        assert_eq!((count.strong(), count.weak()), (2, 1));

        assert_eq!(count.decrement_strong(), 1);
        assert_eq!(count.decrement_strong(), 0);
        assert!(!count.is_unreferenced());
        assert_eq!(count.decrement_weak(), 0);
        assert!(count.is_unreferenced());
    }

    #[test]
    #[should_panic(expected = "weak count decremented below zero")]
    fn weak_underflow_is_fatal() {
        Count::new().decrement_weak();
    }

    #[test]
    #[should_panic(expected = "strong count decremented below zero")]
    fn strong_underflow_is_fatal() {
        let count = Count::new();
        count.decrement_strong();
        count.decrement_strong();
    }
}
