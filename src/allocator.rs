use core::{alloc::Allocator, ptr};

use pinned_init::PinInit;

/// An [`Allocator`] that also decides how objects are constructed in and
/// destroyed from its memory.
///
/// Raw byte allocation comes from the [`Allocator`] supertrait, which is
/// untyped, so the same instance serves the control metadata, the value and
/// the combined block alike. The default bodies construct through the
/// initializer and destroy with [`ptr::drop_in_place`]; allocators that keep
/// their own bookkeeping override them.
///
/// # Examples
///
/// ```rust
/// #![feature(allocator_api)]
/// use core::alloc::{AllocError, Allocator, Layout};
/// use core::ptr::NonNull;
/// use std::alloc::Global;
///
/// use shared_ptr::{allocate_in_place, ObjectAlloc, SharedPtr};
///
/// #[derive(Clone, Copy)]
/// struct Plain;
///
/// unsafe impl Allocator for Plain {
///     fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
///         Global.allocate(layout)
///     }
///
///     unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
///         unsafe { Global.deallocate(ptr, layout) }
///     }
/// }
///
/// impl ObjectAlloc for Plain {}
///
/// let shared: Result<SharedPtr<u32>, AllocError> = allocate_in_place(Plain, Ok(7u32));
/// assert_eq!(*shared.unwrap(), 7);
/// ```
pub trait ObjectAlloc: Allocator {
    /// Constructs a value into `slot`.
    ///
    /// On error, `slot` is left uninitialized and must not be destroyed.
    ///
    /// # Safety
    ///
    /// `slot` must be valid for writes, properly aligned and uninitialized,
    /// and must not move after construction if `init` relies on pinning.
    unsafe fn construct<T, E>(&self, slot: *mut T, init: impl PinInit<T, E>) -> Result<(), E> {
        // SAFETY: The contract is satisfied by the caller.
        unsafe { init.__pinned_init(slot) }
    }

    /// Destroys the value behind `ptr` without releasing its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live value that is never used again.
    unsafe fn destroy<T: ?Sized>(&self, ptr: *mut T) {
        // SAFETY: The contract is satisfied by the caller.
        unsafe { ptr::drop_in_place(ptr) }
    }
}

impl<A: ObjectAlloc + ?Sized> ObjectAlloc for &A {
    unsafe fn construct<T, E>(&self, slot: *mut T, init: impl PinInit<T, E>) -> Result<(), E> {
        // SAFETY: Forwarded.
        unsafe { (**self).construct(slot, init) }
    }

    unsafe fn destroy<T: ?Sized>(&self, ptr: *mut T) {
        // SAFETY: Forwarded.
        unsafe { (**self).destroy(ptr) }
    }
}

#[cfg(feature = "alloc")]
impl ObjectAlloc for alloc::alloc::Global {}
