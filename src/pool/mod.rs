//! Reuse of per-query scratch allocations.
//!
//! Filter normalization, row buffering, and segment sorting all allocate
//! short-lived vectors on every call. The thread-local pools here hand those
//! allocations to the next caller on the same thread instead of returning
//! them to the allocator.

use std::{
    cell::RefCell,
    mem,
    ops::{Deref, DerefMut},
};

use crate::common::Term;


/// A trait for types whose allocations can be handed back to a pool.
pub(crate) trait Clear: Default {
    /// Reset the object to its `Default` state, keeping its allocation.
    fn clear(&mut self);
    /// Whether the object is worth keeping around.
    fn reuse(&self) -> bool;
    /// Rough in-memory footprint of the object, used to bound a pool.
    fn bytes(&self) -> usize;
}

impl<T> Clear for Vec<T> {
    fn clear(&mut self) {
        self.clear()
    }
    fn reuse(&self) -> bool {
        self.capacity() > 0
    }
    fn bytes(&self) -> usize {
        self.capacity() * mem::size_of::<T>()
    }
}

struct PoolState<T> {
    data: Vec<T>,
    bytes: usize,
    limit: usize,
}

/// A byte-bounded pool of reusable objects.
pub(crate) struct Pool<T: Clear> {
    state: RefCell<PoolState<T>>,
}

impl<T: Clear> Pool<T> {
    fn new(limit: usize) -> Pool<T> {
        Pool {
            state: RefCell::new(PoolState {
                data: Vec::new(),
                bytes: 0,
                limit,
            }),
        }
    }

    fn take(&self) -> T {
        let mut state = self.state.borrow_mut();
        if let Some(got) = state.data.pop() {
            state.bytes -= got.bytes();
            got
        } else {
            Default::default()
        }
    }

    fn give(&self, mut item: T) {
        if !item.reuse() {
            return;
        }
        let mut state = self.state.borrow_mut();
        if state.bytes + item.bytes() > state.limit {
            return;
        }
        item.clear();
        state.bytes += item.bytes();
        state.data.push(item);
    }
}

/// Types with a thread-local pool of their own.
pub(crate) trait PoolItem: Clear + Sized + 'static {
    fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R;
}

/// An owned scratch object that rejoins its thread-local pool on drop.
pub(crate) struct Pooled<T: PoolItem> {
    // Populated for the whole life of the wrapper; taken in `drop`.
    data: Option<T>,
}

impl<T: PoolItem> Pooled<T> {
    /// Get an empty value of type `T`, reused from the pool when possible.
    pub(crate) fn get() -> Pooled<T> {
        T::with_pool(|pool| Pooled {
            data: Some(pool.take()),
        })
    }
}

impl<T: PoolItem> Default for Pooled<T> {
    fn default() -> Self {
        Pooled::get()
    }
}

impl<T: PoolItem> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.data.take() {
            T::with_pool(|pool| pool.give(item));
        }
    }
}

impl<T: PoolItem> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data.as_ref().unwrap()
    }
}

impl<T: PoolItem> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data.as_mut().unwrap()
    }
}

impl<T: PoolItem + std::fmt::Debug> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data: &T = self;
        data.fmt(f)
    }
}

// Per-type thread-local pools. The syntax is `NAME: type [byte limit]`; the
// limit bounds how much cleared capacity a single thread may cache per type.
macro_rules! thread_local_pools {
    ($($pool:ident : $ty:ty [ $limit:expr ],)*) => {
        $(
            thread_local! {
                static $pool: Pool<$ty> = Pool::new($limit);
            }

            impl PoolItem for $ty {
                fn with_pool<R>(f: impl FnOnce(&Pool<Self>) -> R) -> R {
                    $pool.with(|pool| f(pool))
                }
            }
        )*
    };
}

thread_local_pools! {
    TERM_VECS: Vec<Term> [1 << 25],
    PAIR_VECS: Vec<(Term, Term)> [1 << 25],
    PERM_VECS: Vec<usize> [1 << 20],
}
