//! Allocator-aware shared and weak pointers with type-erased deleters.
//!
//! [`SharedPtr<T>`] is a shared-ownership pointer in the spirit of C++'s
//! `std::shared_ptr`: unlike [`Rc<T, A>`](alloc::rc::Rc), neither the
//! allocator nor the way the object is destroyed appears in its type. They
//! are erased into a *control block*, so pointers to objects made in
//! completely different ways can be stored side by side:
//!
//! ```rust
//! use core::ptr::NonNull;
//! use shared_ptr::SharedPtr;
//!
//! static mut SLOT: u32 = 3;
//!
//! // Constructed in place, metadata and object in a single allocation.
//! let made = SharedPtr::new(1u32);
//! // Adopted from a box.
//! let adopted = SharedPtr::from(Box::new(2u32));
//! // Adopted with a custom deleter that frees nothing.
//! // SAFETY: The static is only reached through this pointer.
//! let borrowed = unsafe {
//!     SharedPtr::from_raw_with(&raw mut SLOT, |_: NonNull<u32>| {})
//! };
//!
//! let all: [SharedPtr<u32>; 3] = [made, adopted, borrowed];
//! assert_eq!(all.iter().map(|p| **p).sum::<u32>(), 6);
//! ```
//!
//! # Ownership
//!
//! Every origin carries two counters. Each engaged [`SharedPtr`] owns one
//! *strong* count and each engaged [`WeakPtr`] owns one *weak* count:
//!
//! - the object is destroyed the moment the strong count reaches zero, even if
//!   weak pointers remain;
//! - the counters, the control block and the allocator state are released
//!   once both counters are zero.
//!
//! Teardown always happens in two steps: the control block is dropped in
//! place first (running the deleter if the object is still alive), then the
//! bytes of the combined allocation are given back to the allocator they
//! came from.
//!
//! # Construction
//!
//! - [`make_in_place`] and [`allocate_in_place`] allocate the metadata and the
//!   object together, then construct the object with a
//!   [`pinned_init`] initializer. If the initializer fails, the object is
//!   never destroyed, the allocation is released, and the error is returned.
//! - [`SharedPtr::from_raw`], [`SharedPtr::from_raw_with`] and
//!   [`SharedPtr::from_raw_in`] adopt an existing object with a [`Deleter`].
//!
//! Allocators take part through [`ObjectAlloc`], which extends
//! [`Allocator`](core::alloc::Allocator) with the construct/destroy protocol
//! applied to objects placed in its memory.
//!
//! # Conversions
//!
//! Like `Rc`, pointers coerce to unsized targets, such as trait objects. The
//! control block keeps the original concrete type, so the object is always
//! destroyed as what it was constructed as:
//!
//! ```rust
//! use core::fmt::Display;
//! use shared_ptr::SharedPtr;
//!
//! let shared: SharedPtr<dyn Display> = SharedPtr::new(7u8);
//! assert_eq!(shared.to_string(), "7");
//! ```
//!
//! # Threads
//!
//! The counters are plain integers. Neither pointer is `Send` nor `Sync`.
//!
//! # Features
//!
//! - `alloc` (default): constructors backed by the global allocator, and
//!   adoption of [`Box`](alloc::boxed::Box)es.
#![no_std]
#![feature(allocator_api)]
#![feature(coerce_unsized)]
#![feature(unsize)]

#[cfg(feature = "alloc")]
extern crate alloc;

mod allocator;
mod block;
#[cfg(feature = "alloc")]
mod boxed;
mod count;
mod deleter;
mod make;
mod shared;
mod weak;

#[cfg(feature = "alloc")]
pub use self::make::{make_in_place, pin_make_in_place};
pub use self::{
    allocator::ObjectAlloc,
    deleter::{AllocatorDestroy, AllocatorDestroyAndFree, Deleter, PlainDestroy},
    make::{allocate_in_place, pin_allocate_in_place},
    shared::SharedPtr,
    weak::WeakPtr,
};
