use core::{
    alloc::{AllocError, Allocator},
    fmt,
    hash::{Hash, Hasher},
    marker::{PhantomData, Unsize},
    mem,
    ops::{CoerceUnsized, Deref},
    pin::Pin,
    ptr::{self, NonNull},
};

use crate::{block::Header, Deleter, WeakPtr};

/// A shared-ownership pointer whose deleter and allocator are erased from its
/// type.
///
/// A `SharedPtr` is either *empty* or *engaged*. An engaged pointer owns one
/// strong count of its origin; the object is destroyed the moment the last
/// engaged `SharedPtr` goes away, while the metadata survives as long as any
/// [`WeakPtr`] still observes it.
///
/// Like [`Rc`](alloc::rc::Rc), most operations are associated functions so
/// they never shadow methods of `T`.
///
/// # Examples
///
/// ```rust
/// use shared_ptr::SharedPtr;
///
/// let first = SharedPtr::new(String::from("Hello"));
/// let second = first.clone();
/// assert_eq!(SharedPtr::use_count(&first), 2);
///
/// drop(first);
/// assert_eq!(*second, "Hello");
/// assert_eq!(SharedPtr::use_count(&second), 1);
/// ```
pub struct SharedPtr<T: ?Sized> {
    pub(crate) value: NonNull<T>,
    pub(crate) header: Option<Header>,
    pub(crate) marker: PhantomData<T>,
}

impl<T: ?Sized + Unsize<U>, U: ?Sized> CoerceUnsized<SharedPtr<U>> for SharedPtr<T> {}

impl<T: ?Sized> Unpin for SharedPtr<T> {}

impl<T: ?Sized> SharedPtr<T> {
    /// # Safety
    ///
    /// If `header` is present, the caller must transfer one strong count of it
    /// to the new pointer, and `value` must point to its object.
    pub(crate) unsafe fn from_parts(value: NonNull<T>, header: Option<Header>) -> Self {
        SharedPtr {
            value,
            header,
            marker: PhantomData,
        }
    }

    /// Returns a reference to the object, or `None` if the pointer is empty.
    pub fn get(this: &Self) -> Option<&T> {
        // SAFETY: An engaged pointer keeps its object alive.
        this.header.map(|_| unsafe { this.value.as_ref() })
    }

    /// Returns the raw pointer to the object, or `None` if the pointer is
    /// empty.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.header.map(|_| this.value)
    }

    pub fn is_empty(this: &Self) -> bool {
        this.header.is_none()
    }

    /// The number of engaged `SharedPtr`s of this origin.
    ///
    /// An empty pointer reports 1.
    pub fn use_count(this: &Self) -> usize {
        this.header.map_or(1, |header| header.count().strong())
    }

    /// The number of [`WeakPtr`]s observing this origin, or 0 if empty.
    pub fn weak_count(this: &Self) -> usize {
        this.header.map_or(0, |header| header.count().weak())
    }

    /// Whether both pointers are empty, or both point to the same object of
    /// the same origin.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (a.header, b.header) {
            (None, None) => true,
            (Some(x), Some(y)) => x.same_origin(&y) && ptr::addr_eq(a.value.as_ptr(), b.value.as_ptr()),
            _ => false,
        }
    }

    /// Creates a [`WeakPtr`] observing the same origin.
    pub fn downgrade(this: &Self) -> WeakPtr<T> {
        WeakPtr::from(this)
    }

    /// Gives up this pointer's ownership, leaving it empty.
    pub fn reset(this: &mut Self) {
        if let Some(header) = this.header.take() {
            // SAFETY: The strong count owned by `this` is given up, and the header
            // is no longer reachable from it.
            unsafe { header.release_strong() }
        }
    }

    /// Exchanges the origins of two pointers without touching any count.
    pub fn swap(a: &mut Self, b: &mut Self) {
        mem::swap(a, b)
    }

    /// Converts a `SharedPtr<T>` into a `Pin<SharedPtr<T>>`.
    ///
    /// The object never moves while any `SharedPtr` of its origin is alive.
    pub fn into_pin(this: Self) -> Pin<Self> {
        // SAFETY: The object is never moved out of or replaced through a shared
        // pointer.
        unsafe { Pin::new_unchecked(this) }
    }
}

impl<T> SharedPtr<T> {
    /// Constructs an empty pointer.
    pub const fn empty() -> Self {
        SharedPtr {
            value: NonNull::dangling(),
            header: None,
            marker: PhantomData,
        }
    }
}

impl<T: 'static> SharedPtr<T> {
    /// Adopts an object allocated elsewhere, destroying it with `deleter` and
    /// allocating the metadata with `alloc`.
    ///
    /// On failure, `ptr` is still owned by the caller and `deleter` is dropped
    /// without being called.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live object that nothing else
    /// owns, and calling `deleter` on it once must be sound.
    pub unsafe fn try_from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        debug_assert!(!ptr.is_null(), "adopting a null pointer");
        // SAFETY: The contract is satisfied by the caller.
        let value = unsafe { NonNull::new_unchecked(ptr) };
        let header = Header::new_external(value, deleter, alloc)?;
        // SAFETY: The header was just created with one strong count.
        Ok(unsafe { Self::from_parts(value, Some(header)) })
    }
}

#[cfg(feature = "alloc")]
impl<T: 'static> SharedPtr<T> {
    /// Adopts an object allocated by the global allocator with
    /// `Layout::new::<T>()`, such as one from [`Box::into_raw`](alloc::boxed::Box::into_raw).
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null, allocated as stated above, and own its object.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use shared_ptr::SharedPtr;
    ///
    /// let raw = Box::into_raw(Box::new(5u32));
    /// // SAFETY: `raw` comes from a `Box` and is not used again.
    /// let shared = unsafe { SharedPtr::from_raw(raw) };
    /// assert_eq!(*shared, 5);
    /// ```
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        let deleter = crate::AllocatorDestroyAndFree::new(alloc::alloc::Global);
        // SAFETY: The contract is satisfied by the caller.
        unsafe { Self::from_raw_in(ptr, deleter, alloc::alloc::Global) }
    }

    /// Adopts an object, destroying it with `deleter`.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live object that nothing else
    /// owns, and calling `deleter` on it once must be sound.
    pub unsafe fn from_raw_with<D>(ptr: *mut T, deleter: D) -> Self
    where
        D: Deleter<T> + 'static,
    {
        // SAFETY: The contract is satisfied by the caller.
        unsafe { Self::from_raw_in(ptr, deleter, alloc::alloc::Global) }
    }

    /// Adopts an object, destroying it with `deleter` and allocating the
    /// metadata with `alloc`.
    ///
    /// See [`try_from_raw_in`](SharedPtr::try_from_raw_in) for the fallible
    /// version.
    ///
    /// # Safety
    ///
    /// `ptr` must be non-null and point to a live object that nothing else
    /// owns, and calling `deleter` on it once must be sound.
    pub unsafe fn from_raw_in<D, A>(ptr: *mut T, deleter: D, alloc: A) -> Self
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        // SAFETY: The contract is satisfied by the caller.
        match unsafe { Self::try_from_raw_in(ptr, deleter, alloc) } {
            Ok(shared) => shared,
            Err(AllocError) => alloc::alloc::handle_alloc_error(core::alloc::Layout::new::<T>()),
        }
    }

    /// Gives up the current ownership, then adopts `ptr` as
    /// [`from_raw`](SharedPtr::from_raw) does.
    ///
    /// # Safety
    ///
    /// See [`from_raw`](SharedPtr::from_raw).
    pub unsafe fn reset_with_raw(this: &mut Self, ptr: *mut T) {
        Self::reset(this);
        // SAFETY: The contract is satisfied by the caller.
        *this = unsafe { Self::from_raw(ptr) };
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(header) = self.header {
            header.count().increment_strong();
        }
        // SAFETY: The strong count was just incremented for the copy.
        unsafe { Self::from_parts(self.value, self.header) }
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        Self::reset(self)
    }
}

impl<T> Default for SharedPtr<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the pointer is empty.
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<T: ?Sized> AsRef<T> for SharedPtr<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized + PartialEq> PartialEq for SharedPtr<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Self::get(self) == Self::get(other)
    }
}

impl<T: ?Sized + Eq> Eq for SharedPtr<T> {}

impl<T: ?Sized + Hash> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Self::get(self).hash(state)
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(value) => value.fmt(f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(value) => value.fmt(f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::as_ptr(self) {
            Some(ptr) => fmt::Pointer::fmt(&ptr, f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use alloc::{boxed::Box, rc::Rc, string::String};
    use core::{cell::Cell, ptr::NonNull};

    use super::SharedPtr;

    #[test]
    fn empty_pointer_quirks() {
        let mut empty = SharedPtr::<u32>::empty();
        assert!(SharedPtr::is_empty(&empty));
        assert_eq!(SharedPtr::use_count(&empty), 1);
        assert_eq!(SharedPtr::weak_count(&empty), 0);
        assert_eq!(SharedPtr::get(&empty), None);

        let copy = empty.clone();
        assert!(SharedPtr::ptr_eq(&empty, &copy));
        SharedPtr::reset(&mut empty);
        assert!(SharedPtr::is_empty(&empty));
    }

    #[test]
    #[should_panic(expected = "dereferenced an empty SharedPtr")]
    fn deref_of_empty_is_fatal() {
        let empty = SharedPtr::<u32>::default();
        let _value: u32 = *empty;
    }

    #[test]
    fn custom_deleter_runs_once() {
        let deleted = Rc::new(Cell::new(0));

        let raw = Box::into_raw(Box::new(String::from("adopted")));
        let counter = deleted.clone();
        let deleter = move |ptr: NonNull<String>| {
            // SAFETY: The pointer comes from `Box::into_raw` above.
            drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            counter.set(counter.get() + 1);
        };
        // SAFETY: `raw` is owned and the deleter frees it the way it was made.
        let first = unsafe { SharedPtr::from_raw_with(raw, deleter) };
        let second = first.clone();
        assert_eq!(SharedPtr::as_ptr(&second).map(NonNull::as_ptr), Some(raw));

        drop(first);
        assert_eq!(deleted.get(), 0);
        drop(second);
        assert_eq!(deleted.get(), 1);
    }

    #[test]
    fn swap_exchanges_origins() {
        let mut a = SharedPtr::new(1);
        let mut b = SharedPtr::new(2);
        let c = b.clone();

        SharedPtr::swap(&mut a, &mut b);
        assert_eq!((*a, *b), (2, 1));
        assert!(SharedPtr::ptr_eq(&a, &c));
        assert_eq!(SharedPtr::use_count(&a), 2);
        assert_eq!(SharedPtr::use_count(&b), 1);
    }

    #[test]
    fn reset_with_raw_replaces_the_origin() {
        let mut shared = SharedPtr::new(10u64);
        let other = shared.clone();

        // SAFETY: The pointer comes from a `Box` and is not used again.
        unsafe { SharedPtr::reset_with_raw(&mut shared, Box::into_raw(Box::new(20u64))) };
        assert_eq!(*shared, 20);
        assert_eq!(SharedPtr::use_count(&shared), 1);
        assert_eq!(SharedPtr::use_count(&other), 1);
        assert_eq!(*other, 10);
    }

    #[test]
    fn formatting_follows_the_object() {
        let shared = SharedPtr::new(String::from("text"));
        assert_eq!(alloc::format!("{shared} {shared:?}"), "text \"text\"");
        assert_eq!(alloc::format!("{:?}", SharedPtr::<u8>::empty()), "(empty)");
    }
}
