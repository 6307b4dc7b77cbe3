use alloc::boxed::Box;

use crate::{AllocatorDestroyAndFree, ObjectAlloc, SharedPtr};

/// Adopts the boxed object in place; only the metadata is allocated, from the
/// box's own allocator.
///
/// # Examples
///
/// ```rust
/// use shared_ptr::SharedPtr;
///
/// let shared = SharedPtr::from(Box::new([1u8, 2, 3]));
/// assert_eq!(shared[..], [1, 2, 3]);
/// ```
impl<T, A> From<Box<T, A>> for SharedPtr<T>
where
    T: 'static,
    A: ObjectAlloc + Clone + 'static,
{
    fn from(boxed: Box<T, A>) -> Self {
        let (ptr, alloc) = Box::into_raw_with_allocator(boxed);
        let deleter = AllocatorDestroyAndFree::new(alloc.clone());
        // SAFETY: The object was allocated by `alloc` with `Layout::new::<T>()`
        // and the box gave up its ownership.
        unsafe { SharedPtr::from_raw_in(ptr, deleter, alloc) }
    }
}

#[cfg(test)]
mod tests {
    use alloc::{boxed::Box, rc::Rc};
    use core::cell::Cell;

    use crate::{SharedPtr, WeakPtr};

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn boxed_object_keeps_its_address() {
        let boxed = Box::new(11u32);
        let address = &*boxed as *const u32;
        let shared = SharedPtr::from(boxed);
        assert_eq!(&*shared as *const u32, address);
    }

    #[test]
    fn boxed_object_outlived_by_weak() {
        let drops = Rc::new(Cell::new(0));
        let shared = SharedPtr::from(Box::new(Tracked(drops.clone())));
        let weak = WeakPtr::from(&shared);

        drop(shared);
        assert_eq!(drops.get(), 1);
        assert!(weak.expired());
    }

    #[test]
    fn zero_sized_boxes_are_adopted() {
        let shared = SharedPtr::from(Box::new(()));
        assert_eq!(SharedPtr::use_count(&shared), 1);
    }
}
