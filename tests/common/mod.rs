#![allow(dead_code)]

use std::{
    alloc::{AllocError, Allocator, Global, Layout},
    cell::Cell,
    ptr::NonNull,
    rc::Rc,
};

use pinned_init::PinInit;
use shared_ptr::ObjectAlloc;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What a [`Counting`] allocator has seen so far.
#[derive(Debug, Default)]
pub struct Stats {
    pub allocations: Cell<usize>,
    pub deallocations: Cell<usize>,
    pub constructs: Cell<usize>,
    pub destroys: Cell<usize>,
    pub fail_next: Cell<bool>,
}

impl Stats {
    pub fn live_allocations(&self) -> usize {
        self.allocations.get() - self.deallocations.get()
    }
}

/// Forwards to [`Global`] and counts every step of the allocator protocol.
#[derive(Debug, Clone, Default)]
pub struct Counting {
    pub stats: Rc<Stats>,
}

impl Counting {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(cell: &Cell<usize>) {
    cell.set(cell.get() + 1);
}

unsafe impl Allocator for Counting {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
        if self.stats.fail_next.replace(false) {
            return Err(AllocError);
        }
        let block = Global.allocate(layout)?;
        bump(&self.stats.allocations);
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        bump(&self.stats.deallocations);
        unsafe { Global.deallocate(ptr, layout) }
    }
}

impl ObjectAlloc for Counting {
    unsafe fn construct<T, E>(&self, slot: *mut T, init: impl PinInit<T, E>) -> Result<(), E> {
        let result = unsafe { init.__pinned_init(slot) };
        if result.is_ok() {
            bump(&self.stats.constructs);
        }
        result
    }

    unsafe fn destroy<T: ?Sized>(&self, ptr: *mut T) {
        bump(&self.stats.destroys);
        unsafe { ptr.drop_in_place() }
    }
}

/// Counts how many times it has been dropped.
#[derive(Debug)]
pub struct Tracked {
    pub id: u32,
    pub drops: Rc<Cell<usize>>,
}

impl Tracked {
    pub fn new(id: u32) -> (Self, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));
        (
            Tracked {
                id,
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        bump(&self.drops);
    }
}
