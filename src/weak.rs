use core::{
    fmt,
    marker::{PhantomData, Unsize},
    ops::CoerceUnsized,
    ptr::NonNull,
};

use crate::{block::Header, SharedPtr};

/// A non-owning observer of an object managed by [`SharedPtr`]s.
///
/// A `WeakPtr` keeps the metadata of its origin alive, but not the object.
///
/// # Examples
///
/// ```rust
/// use shared_ptr::{SharedPtr, WeakPtr};
///
/// let shared = SharedPtr::new(42);
/// let weak = WeakPtr::from(&shared);
/// assert!(!weak.expired());
/// assert_eq!(*weak.lock(), 42);
///
/// drop(shared);
/// assert!(weak.expired());
/// assert!(SharedPtr::is_empty(&weak.lock()));
/// ```
pub struct WeakPtr<T: ?Sized> {
    value: NonNull<T>,
    header: Option<Header>,
    marker: PhantomData<T>,
}

impl<T: ?Sized + Unsize<U>, U: ?Sized> CoerceUnsized<WeakPtr<U>> for WeakPtr<T> {}

impl<T> WeakPtr<T> {
    /// Constructs an empty weak pointer, observing nothing.
    pub const fn new() -> Self {
        WeakPtr {
            value: NonNull::dangling(),
            header: None,
            marker: PhantomData,
        }
    }
}

impl<T: ?Sized> WeakPtr<T> {
    /// Whether the object is gone, or this weak pointer is empty.
    pub fn expired(&self) -> bool {
        self.header
            .map_or(true, |header| !header.block().object_is_valid())
    }

    /// Obtains a [`SharedPtr`] to the object, or an empty one if the object
    /// is already gone.
    pub fn lock(&self) -> SharedPtr<T> {
        if self.expired() {
            // SAFETY: An empty pointer carries no count.
            return unsafe { SharedPtr::from_parts(self.value, None) };
        }
        // SAFETY: The object is alive, so sharing it again is sound.
        unsafe { self.lock_unchecked() }
    }

    /// Obtains a [`SharedPtr`] sharing this origin without checking whether
    /// the object is still alive.
    ///
    /// The strong count is incremented even if the object is already
    /// destroyed; dropping the returned pointer then destroys nothing again.
    ///
    /// # Safety
    ///
    /// If [`expired`](WeakPtr::expired) is true, the returned pointer must
    /// not be dereferenced, and nothing derived from it may be either.
    pub unsafe fn lock_unchecked(&self) -> SharedPtr<T> {
        if let Some(header) = self.header {
            header.count().increment_strong();
        }
        // SAFETY: The strong count was just incremented for the new pointer.
        unsafe { SharedPtr::from_parts(self.value, self.header) }
    }

    /// The number of [`SharedPtr`]s of this origin, or 0 if empty.
    pub fn use_count(&self) -> usize {
        self.header.map_or(0, |header| header.count().strong())
    }

    /// The number of `WeakPtr`s of this origin, or 0 if empty.
    pub fn weak_count(&self) -> usize {
        self.header.map_or(0, |header| header.count().weak())
    }

    /// Whether both weak pointers are empty, or both observe the same origin.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self.header, other.header) {
            (None, None) => true,
            (Some(x), Some(y)) => x.same_origin(&y),
            _ => false,
        }
    }
}

impl<T: ?Sized> From<&SharedPtr<T>> for WeakPtr<T> {
    fn from(shared: &SharedPtr<T>) -> Self {
        if let Some(header) = shared.header {
            header.count().increment_weak();
        }
        WeakPtr {
            value: shared.value,
            header: shared.header,
            marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Clone for WeakPtr<T> {
    fn clone(&self) -> Self {
        if let Some(header) = self.header {
            header.count().increment_weak();
        }
        WeakPtr {
            value: self.value,
            header: self.header,
            marker: PhantomData,
        }
    }
}

impl<T: ?Sized> Drop for WeakPtr<T> {
    fn drop(&mut self) {
        if let Some(header) = self.header.take() {
            // SAFETY: The weak count owned by `self` is given up.
            unsafe { header.release_weak() }
        }
    }
}

impl<T> Default for WeakPtr<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(WeakPtr)")
    }
}
