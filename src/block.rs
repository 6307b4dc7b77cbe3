//! The metadata shared by every handle of one origin.
//!
//! A combined allocation is laid out as follows, with every offset computed
//! up front by [`BlockLayout`]:
//!
//! ```text
//! +-------------+-------+--------------+-----------------+
//! | Storage<A>  | Count | Block<D, R>  | R (in place)    |
//! +-------------+-------+--------------+-----------------+
//! ^ base
//! ```
//!
//! The trailing value slot only exists for objects constructed in place;
//! objects adopted from a raw pointer live in their own allocation.

use core::{
    alloc::{AllocError, Allocator, Layout},
    any,
    cell::{Cell, UnsafeCell},
    ptr::NonNull,
};

use crate::{count::Count, Deleter};

/// The type-erased capability set of a control block.
pub(crate) trait ControlBlock {
    /// If `suppress` is set, the object will never be touched by its deleter.
    ///
    /// This does not change [`object_is_valid`](ControlBlock::object_is_valid).
    fn invalidate_object(&self, suppress: bool);

    fn object_is_valid(&self) -> bool;

    /// Runs the deleter, keeping the control block itself alive.
    ///
    /// Does nothing if the object is already invalid.
    ///
    /// # Safety
    ///
    /// No reference to the object may be used afterwards.
    unsafe fn destroy_object_only(&self);
}

/// The one implementation of [`ControlBlock`], holding the deleter and the
/// pointer to the object as it was originally constructed.
pub(crate) struct Block<D: Deleter<R>, R> {
    value: NonNull<R>,
    deleter: UnsafeCell<D>,
    valid: Cell<bool>,
}

impl<D: Deleter<R>, R> Block<D, R> {
    fn new(value: NonNull<R>, deleter: D) -> Self {
        Block {
            value,
            deleter: UnsafeCell::new(deleter),
            valid: Cell::new(true),
        }
    }
}

impl<D: Deleter<R>, R> ControlBlock for Block<D, R> {
    fn invalidate_object(&self, suppress: bool) {
        if suppress {
            // SAFETY: The deleter is only borrowed by this method and by
            // `destroy_object_only`, neither of which can re-enter the other.
            unsafe { (*self.deleter.get()).suppress() }
        }
    }

    fn object_is_valid(&self) -> bool {
        self.valid.get()
    }

    unsafe fn destroy_object_only(&self) {
        // Cleared first, so a destructor observing its own weak handles sees
        // the object as gone and a nested call is a no-op.
        if self.valid.replace(false) {
            log::trace!("destroying shared {}", any::type_name::<R>());
            // SAFETY: The object is valid until now and the caller gives up every
            // reference to it.
            unsafe { (*self.deleter.get()).delete(self.value) }
        }
    }
}

impl<D: Deleter<R>, R> Drop for Block<D, R> {
    fn drop(&mut self) {
        if self.valid.replace(false) {
            log::trace!("destroying shared {}", any::type_name::<R>());
            // SAFETY: The object is still valid and the block is going away with
            // its last handle.
            unsafe { self.deleter.get_mut().delete(self.value) }
        }
    }
}

/// The allocator state at the start of a combined allocation.
struct Storage<A> {
    alloc: A,
    layout: Layout,
}

/// Gives the bytes of a combined allocation back to the allocator that
/// produced them.
///
/// # Safety
///
/// `base` must be the start of a combined allocation whose `Storage<A>` is
/// initialized, and every other part of it must already be torn down.
unsafe fn release_storage<A: Allocator>(base: NonNull<u8>) {
    // SAFETY: The storage record sits at offset zero and is read exactly once.
    let Storage { alloc, layout } = unsafe { base.cast::<Storage<A>>().read() };
    log::trace!("releasing {} bytes of shared metadata", layout.size());
    // SAFETY: `base` was allocated by `alloc` with `layout`.
    unsafe { alloc.deallocate(base, layout) }
}

/// A type-erased handle on the allocator behind a combined allocation.
#[derive(Clone, Copy)]
pub(crate) struct StorageReleaser {
    base: NonNull<u8>,
    release: unsafe fn(NonNull<u8>),
}

impl StorageReleaser {
    fn new<A: Allocator>(base: NonNull<u8>) -> Self {
        StorageReleaser {
            base,
            release: release_storage::<A>,
        }
    }

    /// # Safety
    ///
    /// Must be called exactly once, after the control block is torn down.
    pub(crate) unsafe fn release(self) {
        // SAFETY: The contract is satisfied by the caller.
        unsafe { (self.release)(self.base) }
    }
}

/// Sizes and offsets of the parts of a combined allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub(crate) layout: Layout,
    pub(crate) count: usize,
    pub(crate) block: usize,
    pub(crate) value: Option<usize>,
}

impl BlockLayout {
    fn compute(storage: Layout, block: Layout, value: Option<Layout>) -> Result<Self, AllocError> {
        let (layout, count) = storage
            .extend(Layout::new::<Count>())
            .map_err(|_| AllocError)?;
        let (layout, block) = layout.extend(block).map_err(|_| AllocError)?;
        let (layout, value) = match value {
            Some(value) => {
                let (layout, offset) = layout.extend(value).map_err(|_| AllocError)?;
                (layout, Some(offset))
            }
            None => (layout, None),
        };
        Ok(BlockLayout {
            layout: layout.pad_to_align(),
            count,
            block,
            value,
        })
    }

    /// The layout for an object adopted from a raw pointer.
    pub(crate) fn external<A, D: Deleter<R>, R>() -> Result<Self, AllocError> {
        Self::compute(Layout::new::<Storage<A>>(), Layout::new::<Block<D, R>>(), None)
    }

    /// The layout for an object constructed in place.
    pub(crate) fn in_place<A, D: Deleter<R>, R>() -> Result<Self, AllocError> {
        Self::compute(
            Layout::new::<Storage<A>>(),
            Layout::new::<Block<D, R>>(),
            Some(Layout::new::<R>()),
        )
    }
}

/// The count record, control block and storage releaser of one origin.
///
/// Every engaged handle carries a copy. A header is only dereferenced while
/// the handle carrying it holds a strong or weak count.
#[derive(Clone, Copy)]
pub(crate) struct Header {
    count: NonNull<Count>,
    block: NonNull<dyn ControlBlock>,
    releaser: StorageReleaser,
}

impl Header {
    /// Allocates the metadata for an object that lives elsewhere.
    ///
    /// The returned header accounts for one strong count.
    pub(crate) fn new_external<A, D, R>(value: NonNull<R>, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        A: Allocator + 'static,
        D: Deleter<R> + 'static,
        R: 'static,
    {
        let layout = BlockLayout::external::<A, D, R>()?;
        let base = alloc.allocate(layout.layout)?.cast::<u8>();
        // SAFETY: `base` was just allocated with `layout`.
        Ok(unsafe { Self::write(base, &layout, value, deleter, alloc) })
    }

    /// Allocates the metadata together with an uninitialized slot for the
    /// object.
    ///
    /// The returned header accounts for one strong count. The object must be
    /// constructed into the slot, or suppressed, before the header is released.
    pub(crate) fn new_in_place<A, D, R>(deleter: D, alloc: A) -> Result<(Self, NonNull<R>), AllocError>
    where
        A: Allocator + 'static,
        D: Deleter<R> + 'static,
        R: 'static,
    {
        let layout = BlockLayout::in_place::<A, D, R>()?;
        let base = alloc.allocate(layout.layout)?.cast::<u8>();
        let offset = layout.value.unwrap_or_default();
        // SAFETY: The value slot is inside the allocation, suitably aligned.
        let value = unsafe { base.add(offset) }.cast::<R>();
        // SAFETY: `base` was just allocated with `layout`.
        Ok((unsafe { Self::write(base, &layout, value, deleter, alloc) }, value))
    }

    /// # Safety
    ///
    /// `base` must be a fresh allocation from `alloc` fitting `layout`.
    unsafe fn write<A, D, R>(
        base: NonNull<u8>,
        layout: &BlockLayout,
        value: NonNull<R>,
        deleter: D,
        alloc: A,
    ) -> Self
    where
        A: Allocator + 'static,
        D: Deleter<R> + 'static,
        R: 'static,
    {
        log::trace!(
            "allocated {} bytes of shared metadata for {}",
            layout.layout.size(),
            any::type_name::<R>()
        );
        // SAFETY: Every offset is computed from `layout`, so each part is in
        // bounds and aligned.
        unsafe {
            let count = base.add(layout.count).cast::<Count>();
            let block = base.add(layout.block).cast::<Block<D, R>>();

            count.write(Count::new());
            block.write(Block::new(value, deleter));
            base.cast::<Storage<A>>().write(Storage {
                alloc,
                layout: layout.layout,
            });

            let block: NonNull<dyn ControlBlock> = block;
            Header {
                count,
                block,
                releaser: StorageReleaser::new::<A>(base),
            }
        }
    }

    pub(crate) fn count(&self) -> &Count {
        // SAFETY: The header is only reachable from a handle holding a count.
        unsafe { self.count.as_ref() }
    }

    pub(crate) fn block(&self) -> &dyn ControlBlock {
        // SAFETY: The header is only reachable from a handle holding a count.
        unsafe { self.block.as_ref() }
    }

    /// Whether two headers belong to the same origin.
    pub(crate) fn same_origin(&self, other: &Header) -> bool {
        self.count == other.count
    }

    /// Tears the control block down, then releases the storage.
    ///
    /// # Safety
    ///
    /// Both counts must be zero and the header must never be used again.
    unsafe fn destroy(self) {
        // SAFETY: The control block is live and dropped exactly once.
        unsafe { self.block.as_ptr().drop_in_place() };
        // SAFETY: The control block is gone; nothing else refers to the bytes.
        unsafe { self.releaser.release() };
    }

    /// Gives up one strong count.
    ///
    /// # Safety
    ///
    /// The caller must own a strong count of this header and must not use the
    /// header afterwards.
    pub(crate) unsafe fn release_strong(self) {
        let count = self.count();
        if count.decrement_strong() > 0 {
            return;
        }

        if count.weak() == 0 {
            // SAFETY: Both counts are zero.
            unsafe { self.destroy() };
            return;
        }

        // Weak handles keep the metadata alive. Pin it while the object is
        // destroyed, in case its destructor drops one of them.
        count.increment_weak();
        // SAFETY: The last strong count is gone.
        unsafe { self.block().destroy_object_only() };
        let count = self.count();
        count.decrement_weak();
        if count.is_unreferenced() {
            // SAFETY: Both counts are zero.
            unsafe { self.destroy() };
        }
    }

    /// Gives up one weak count.
    ///
    /// # Safety
    ///
    /// The caller must own a weak count of this header and must not use the
    /// header afterwards.
    pub(crate) unsafe fn release_weak(self) {
        let count = self.count();
        count.decrement_weak();
        if count.is_unreferenced() {
            // SAFETY: Both counts are zero.
            unsafe { self.destroy() };
        }
    }
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use alloc::alloc::Global;
    use core::{alloc::Layout, cell::Cell, mem, ptr::NonNull};

    use super::*;
    use crate::{AllocatorDestroy, PlainDestroy};

    #[test]
    fn in_place_layout_orders_every_part() {
        let layout = BlockLayout::in_place::<Global, PlainDestroy, u64>().unwrap();

        assert_eq!(layout.count, mem::size_of::<Storage<Global>>());
        assert!(layout.block >= layout.count + mem::size_of::<Count>());
        let value = layout.value.unwrap();
        assert!(value >= layout.block + mem::size_of::<Block<PlainDestroy, u64>>());
        assert_eq!(value % mem::align_of::<u64>(), 0);
        assert!(layout.layout.size() >= value + mem::size_of::<u64>());
        assert_eq!(layout.layout.size() % layout.layout.align(), 0);
    }

    #[test]
    fn external_layout_has_no_value_slot() {
        let external = BlockLayout::external::<Global, PlainDestroy, [u8; 64]>().unwrap();
        let in_place = BlockLayout::in_place::<Global, PlainDestroy, [u8; 64]>().unwrap();

        assert_eq!(external.value, None);
        assert!(in_place.layout.size() >= external.layout.size() + 64);
    }

    #[test]
    fn oversized_values_fail_to_lay_out() {
        let result = BlockLayout::compute(
            Layout::new::<Storage<Global>>(),
            Layout::new::<Block<PlainDestroy, u8>>(),
            Layout::from_size_align(isize::MAX as usize, 1).ok(),
        );
        assert_eq!(result, Err(AllocError));
    }

    #[test]
    fn suppression_keeps_validity() {
        let calls = Cell::new(0);
        let mut value = 1u8;
        let block = Block::new(NonNull::from(&mut value), AllocatorDestroy::new(Global));
        block.invalidate_object(true);
        assert!(block.object_is_valid());

        let counting = Block::new(NonNull::from(&mut value), |_: NonNull<u8>| calls.set(calls.get() + 1));
        // SAFETY: The closure does not touch the object.
        unsafe {
            counting.destroy_object_only();
            counting.destroy_object_only();
        }
        assert!(!counting.object_is_valid());
        drop(counting);
        assert_eq!(calls.get(), 1);
        drop(block);
    }
}
