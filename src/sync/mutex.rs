/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Mutex
//!
//! The coordination lock protecting the arbiter bookkeeping. It is a plain atomic test-and-set lock around the
//! guarded data that yields the current thread to the scheduler while contended. The bookkeeping sections it protects
//! are short and never wait on hardware, so there is no need for a parking lock with poisoning.
//!
//! # Example
//! ```
//! use ruspiro_hwlock::sync::Mutex;
//!
//! let owners: Mutex<Vec<Option<u64>>> = Mutex::new(vec![None; 2]);
//! {
//!     let mut owners = owners.lock();
//!     owners[0] = Some(1);
//! }
//! // the guard went out of scope, the lock is available again
//! assert!(owners.try_lock().is_some());
//! ```

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// Spin attempts before the thread yields to the scheduler
const SPIN_LIMIT: u32 = 64;

/// An mutual exclusive access lock for the interior data
pub struct Mutex<T: ?Sized> {
  locked: AtomicBool,
  data: UnsafeCell<T>,
}

/// The MutexGuard is the result of successfully aquiring the mutual exclusive lock for the interior
/// data. If this guard goes ot of scope the lock will be released
pub struct MutexGuard<'a, T: ?Sized + 'a> {
  mutex: &'a Mutex<T>,
}

impl<T> Mutex<T> {
  /// Create a new data access guarding lock
  pub const fn new(value: T) -> Self {
    Mutex {
      locked: AtomicBool::new(false),
      data: UnsafeCell::new(value),
    }
  }

  /// Consume the Mutex and return the inner value
  pub fn into_inner(self) -> T {
    self.data.into_inner()
  }
}

impl<T: ?Sized> Mutex<T> {
  /// Try to lock the interior data for mutual exclusive access. Returns ``None`` if the lock is currently held.
  pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
    if self
      .locked
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_ok()
    {
      Some(MutexGuard { mutex: self })
    } else {
      None
    }
  }

  /// Lock the guarded data for mutual exclusive access. This blocks until the data could be
  /// successfully locked.
  pub fn lock(&self) -> MutexGuard<'_, T> {
    let mut spins = 0;
    loop {
      if let Some(guard) = self.try_lock() {
        return guard;
      }
      // only retry the atomic exchange once the lock looks free to keep the cache line shared
      while self.locked.load(Ordering::Relaxed) {
        if spins < SPIN_LIMIT {
          spins += 1;
          core::hint::spin_loop();
        } else {
          std::thread::yield_now();
        }
      }
    }
  }

  /// Mutable access to the data without locking, the borrow checker guarantees exclusiveness
  pub fn get_mut(&mut self) -> &mut T {
    self.data.get_mut()
  }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut dbg = f.debug_struct("Mutex");
    match self.try_lock() {
      Some(guard) => {
        dbg.field("data", &&*guard);
      }
      None => {
        dbg.field("data", &"<locked>");
      }
    }
    dbg.finish_non_exhaustive()
  }
}

impl<T: Default> Default for Mutex<T> {
  fn default() -> Self {
    Mutex::new(T::default())
  }
}

// when the MutexGuard is dropped release the owning lock
impl<T: ?Sized> Drop for MutexGuard<'_, T> {
  fn drop(&mut self) {
    self.mutex.locked.store(false, Ordering::Release);
  }
}

// a MutexGuard does only exist while the exclusive access to the data is ensured, so handing out shared and mutable
// references through it is fine
impl<T: ?Sized> Deref for MutexGuard<'_, T> {
  type Target = T;

  fn deref(&self) -> &T {
    unsafe { &*self.mutex.data.get() }
  }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
  fn deref_mut(&mut self) -> &mut T {
    unsafe { &mut *self.mutex.data.get() }
  }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&**self, f)
  }
}

/// The Mutex is always `Sync`, to share it across threads it need to be wrapped into an `Arc`.
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
