use core::{
    alloc::{AllocError, Allocator},
    mem::ManuallyDrop,
    pin::Pin,
};

use pinned_init::{Init, PinInit};

use crate::{block::Header, AllocatorDestroy, Deleter, ObjectAlloc, SharedPtr};

/// A freshly allocated origin whose object is not constructed yet.
///
/// Dropping it suppresses the deleter before giving up the strong count, so
/// the half-built origin is torn down without touching the object, whether
/// construction returned an error or panicked.
struct Unconstructed<T>(ManuallyDrop<SharedPtr<T>>);

impl<T> Unconstructed<T> {
    fn finish(self) -> SharedPtr<T> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the pointer is taken out once.
        unsafe { ManuallyDrop::take(&mut this.0) }
    }
}

impl<T> Drop for Unconstructed<T> {
    fn drop(&mut self) {
        if let Some(header) = self.0.header {
            header.block().invalidate_object(true);
        }
        // SAFETY: The pointer is dropped exactly once, here.
        unsafe { ManuallyDrop::drop(&mut self.0) }
    }
}

/// Allocates the metadata and the object in one block, then runs `construct`
/// on the object's slot.
fn construct_in_place<T, D, A, E>(
    deleter: D,
    alloc: A,
    construct: impl FnOnce(*mut T) -> Result<(), E>,
) -> Result<SharedPtr<T>, E>
where
    T: 'static,
    D: Deleter<T> + 'static,
    A: Allocator + 'static,
    E: From<AllocError>,
{
    let (header, slot) = Header::new_in_place::<A, D, T>(deleter, alloc)?;
    // SAFETY: The header was just created with one strong count, and the
    // object is not reachable until construction succeeds.
    let pending = Unconstructed(ManuallyDrop::new(unsafe {
        SharedPtr::from_parts(slot, Some(header))
    }));

    construct(slot.as_ptr())?;
    Ok(pending.finish())
}

/// Constructs an object in place, together with its metadata in a single
/// allocation from the global allocator.
///
/// If the initializer fails, the allocation is released without the object
/// ever being destroyed, and the error is returned.
///
/// # Examples
///
/// ```rust
/// #![feature(allocator_api)]
/// use core::alloc::AllocError;
/// use shared_ptr::{make_in_place, SharedPtr};
///
/// let shared: Result<SharedPtr<[u64; 4]>, AllocError> = make_in_place(Ok([7; 4]));
/// assert_eq!(shared.unwrap()[3], 7);
/// ```
#[cfg(feature = "alloc")]
pub fn make_in_place<T, E>(init: impl Init<T, E>) -> Result<SharedPtr<T>, E>
where
    T: 'static,
    E: From<AllocError>,
{
    construct_in_place(crate::PlainDestroy::new(), alloc::alloc::Global, |slot| {
        // SAFETY: The slot is valid, aligned and uninitialized.
        unsafe { init.__init(slot) }
    })
}

/// Constructs and pins an object in place, together with its metadata in a
/// single allocation from the global allocator.
#[cfg(feature = "alloc")]
pub fn pin_make_in_place<T, E>(init: impl PinInit<T, E>) -> Result<Pin<SharedPtr<T>>, E>
where
    T: 'static,
    E: From<AllocError>,
{
    let shared = construct_in_place(crate::PlainDestroy::new(), alloc::alloc::Global, |slot| {
        // SAFETY: The slot is valid, aligned and uninitialized, and the object
        // never moves.
        unsafe { init.__pinned_init(slot) }
    })?;
    Ok(SharedPtr::into_pin(shared))
}

/// Constructs an object in place through `alloc`.
///
/// The combined block is allocated from `alloc`, and the object is
/// constructed and later destroyed through its
/// [construct/destroy protocol](ObjectAlloc).
pub fn allocate_in_place<T, A, E>(alloc: A, init: impl Init<T, E>) -> Result<SharedPtr<T>, E>
where
    T: 'static,
    A: ObjectAlloc + Clone + 'static,
    E: From<AllocError>,
{
    let deleter = AllocatorDestroy::new(alloc.clone());
    construct_in_place(deleter, alloc.clone(), |slot| {
        // SAFETY: The slot is valid, aligned and uninitialized.
        unsafe { alloc.construct(slot, init) }
    })
}

/// Constructs and pins an object in place through `alloc`.
pub fn pin_allocate_in_place<T, A, E>(alloc: A, init: impl PinInit<T, E>) -> Result<Pin<SharedPtr<T>>, E>
where
    T: 'static,
    A: ObjectAlloc + Clone + 'static,
    E: From<AllocError>,
{
    let deleter = AllocatorDestroy::new(alloc.clone());
    let shared = construct_in_place(deleter, alloc.clone(), |slot| {
        // SAFETY: The slot is valid, aligned and uninitialized, and the object
        // never moves.
        unsafe { alloc.construct(slot, init) }
    })?;
    Ok(SharedPtr::into_pin(shared))
}

impl<T: 'static> SharedPtr<T> {
    /// Attempts to move `value` into a new allocation from `alloc`.
    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        A: ObjectAlloc + Clone + 'static,
    {
        allocate_in_place(alloc, Ok::<T, AllocError>(value))
    }
}

#[cfg(feature = "alloc")]
impl<T: 'static> SharedPtr<T> {
    /// Moves `value` into a new allocation from the global allocator.
    ///
    /// # Panics
    ///
    /// If there is not enough memory. Use `try_new` to handle failures
    /// gracefully.
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(shared) => shared,
            Err(AllocError) => alloc::alloc::handle_alloc_error(core::alloc::Layout::new::<T>()),
        }
    }

    /// Attempts to move `value` into a new allocation from the global
    /// allocator.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        make_in_place(Ok::<T, AllocError>(value))
    }

    /// Moves `value` into a new allocation from `alloc`.
    ///
    /// # Panics
    ///
    /// If there is not enough memory. Use `try_new_in` to handle failures
    /// gracefully.
    pub fn new_in<A>(value: T, alloc: A) -> Self
    where
        A: ObjectAlloc + Clone + 'static,
    {
        match Self::try_new_in(value, alloc) {
            Ok(shared) => shared,
            Err(AllocError) => alloc::alloc::handle_alloc_error(core::alloc::Layout::new::<T>()),
        }
    }

    /// Constructs a pinned object in place from the global allocator.
    pub fn pin(value: T) -> Pin<Self> {
        Self::into_pin(Self::new(value))
    }
}
