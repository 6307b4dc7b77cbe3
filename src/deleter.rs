use core::{alloc::Layout, ptr::NonNull};

use crate::ObjectAlloc;

/// A strategy that destroys the object owned by a group of shared pointers.
///
/// The control block calls [`delete`](Deleter::delete) exactly once for every
/// live object, when the last [`SharedPtr`](crate::SharedPtr) goes away.
///
/// Any `FnMut(NonNull<T>)` closure is a deleter, so custom clean-up logic can
/// be passed directly to [`SharedPtr::from_raw_with`](crate::SharedPtr::from_raw_with).
pub trait Deleter<T: ?Sized> {
    /// Destroys the object behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be the pointer this deleter was registered with, pointing to
    /// a live object, and this method must not be called again afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);

    /// Makes subsequent calls to [`delete`](Deleter::delete) leave the object
    /// untouched.
    ///
    /// Used when the object failed to be constructed in place. Deleters that
    /// only ever wrap existing objects may ignore it.
    fn suppress(&mut self) {}
}

impl<T: ?Sized, F: FnMut(NonNull<T>)> Deleter<T> for F {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// Runs the destructor of an object embedded in the combined allocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainDestroy {
    suppressed: bool,
}

impl PlainDestroy {
    /// Creates a deleter that is not suppressed.
    pub const fn new() -> Self {
        PlainDestroy { suppressed: false }
    }
}

impl<T: ?Sized> Deleter<T> for PlainDestroy {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        if !self.suppressed {
            // SAFETY: The contract is satisfied by the caller.
            unsafe { ptr.as_ptr().drop_in_place() }
        }
    }

    fn suppress(&mut self) {
        self.suppressed = true;
    }
}

/// Destroys an object embedded in the combined allocation through the
/// allocator's own [destroy protocol](ObjectAlloc::destroy).
#[derive(Debug, Clone, Copy)]
pub struct AllocatorDestroy<A> {
    alloc: A,
    suppressed: bool,
}

impl<A> AllocatorDestroy<A> {
    /// Creates a deleter destroying through `alloc`.
    pub const fn new(alloc: A) -> Self {
        AllocatorDestroy {
            alloc,
            suppressed: false,
        }
    }

    /// The allocator objects are destroyed through.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }
}

impl<T: ?Sized, A: ObjectAlloc> Deleter<T> for AllocatorDestroy<A> {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        if !self.suppressed {
            // SAFETY: The contract is satisfied by the caller.
            unsafe { self.alloc.destroy(ptr.as_ptr()) }
        }
    }

    fn suppress(&mut self) {
        self.suppressed = true;
    }
}

/// Destroys an object that lives in its own allocation, then returns that
/// allocation to the allocator.
///
/// The object must have been allocated by `alloc` with `Layout::new::<T>()`,
/// as [`Box::new_in`](alloc::boxed::Box::new_in) does. Zero-sized objects are
/// assumed to own no memory.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorDestroyAndFree<A> {
    alloc: A,
    suppressed: bool,
}

impl<A> AllocatorDestroyAndFree<A> {
    /// Creates a deleter destroying through and freeing to `alloc`.
    pub const fn new(alloc: A) -> Self {
        AllocatorDestroyAndFree {
            alloc,
            suppressed: false,
        }
    }

    /// The allocator objects are destroyed through and freed to.
    pub fn allocator(&self) -> &A {
        &self.alloc
    }
}

impl<T, A: ObjectAlloc> Deleter<T> for AllocatorDestroyAndFree<A> {
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        if !self.suppressed {
            // SAFETY: The contract is satisfied by the caller.
            unsafe { self.alloc.destroy(ptr.as_ptr()) }
        }
        let layout = Layout::new::<T>();
        // Zero-sized objects are never allocated, as with `Box`.
        if layout.size() != 0 {
            // SAFETY: The object was allocated by `self.alloc` with this layout,
            // and it is already destroyed (or was never constructed).
            unsafe { self.alloc.deallocate(ptr.cast(), layout) }
        }
    }

    fn suppress(&mut self) {
        self.suppressed = true;
    }
}

#[cfg(test)]
mod tests {
    use core::{cell::Cell, mem::ManuallyDrop, ptr::NonNull};

    use super::*;

    struct Noisy<'a>(&'a Cell<usize>);

    impl Drop for Noisy<'_> {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn plain_destroy_runs_drop() {
        let drops = Cell::new(0);
        let mut slot = ManuallyDrop::new(Noisy(&drops));
        let ptr = NonNull::from(&mut *slot);

        // SAFETY: `slot` is live and never touched again.
        unsafe { PlainDestroy::new().delete(ptr) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn suppressed_plain_destroy_is_a_no_op() {
        let drops = Cell::new(0);
        let mut slot = ManuallyDrop::new(Noisy(&drops));
        let ptr = NonNull::from(&mut *slot);

        let mut deleter = PlainDestroy::new();
        Deleter::<Noisy>::suppress(&mut deleter);
        // SAFETY: Suppressed, so the object is not accessed.
        unsafe { deleter.delete(ptr) };
        assert_eq!(drops.get(), 0);

        // SAFETY: Still live.
        unsafe { ManuallyDrop::drop(&mut slot) };
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn closures_are_deleters() {
        let seen = Cell::new(None);
        let mut value = 5u32;
        let ptr = NonNull::from(&mut value);

        let mut deleter = |p: NonNull<u32>| seen.set(Some(p));
        // SAFETY: The closure only records the pointer.
        unsafe { deleter.delete(ptr) };
        assert_eq!(seen.get(), Some(ptr));
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn allocator_destroy_leaves_the_memory_to_its_allocator() {
        use alloc::{alloc::Global, boxed::Box};
        use core::alloc::Allocator;

        let drops = Cell::new(0);
        let raw = Box::into_raw(Box::new(Noisy(&drops)));
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };

        let mut deleter = AllocatorDestroy::new(Global);
        // SAFETY: The box gave up the object.
        unsafe { deleter.delete(ptr) };
        assert_eq!(drops.get(), 1);

        // SAFETY: Allocated by `Global` with this layout, object destroyed.
        unsafe { deleter.allocator().deallocate(ptr.cast(), Layout::new::<Noisy>()) };
    }

    #[cfg(feature = "alloc")]
    #[test]
    fn allocator_destroy_and_free_skips_destruction_when_suppressed() {
        use alloc::{alloc::Global, boxed::Box};

        let drops = Cell::new(0);
        let raw = Box::into_raw(Box::new(Noisy(&drops)));
        let mut deleter = AllocatorDestroyAndFree::new(Global);
        Deleter::<Noisy>::suppress(&mut deleter);

        // SAFETY: The object is freed without being dropped.
        unsafe { deleter.delete(NonNull::new_unchecked(raw)) };
        assert_eq!(drops.get(), 0);
    }
}
