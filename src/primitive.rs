/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Hardware Spinlock Contract
//!
//! The traits a platform has to implement to hand its bank of hardware spinlocks over to the
//! [Arbiter](crate::Arbiter). A [HwLockPool] reserves and frees single lock handles by their id, the handle itself
//! implements [HwSpinlock] and provides the test-and-set attempt, the bounded wait and the unconditional release.
//!
//! The actual register protocol behind a handle is up to the platform. The crate ships the software
//! [SpinlockBank](crate::SpinlockBank) that can be used if no hardware bank is present.

use crate::error::{PoolError, PrimitiveError};
use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier of a hardware lock as assigned by the platform. Ids are not required to be contiguous nor to start at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u32);

impl LockId {
  pub const fn value(self) -> u32 {
    self.0
  }
}

impl fmt::Display for LockId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The result of a bounded wait on a hardware lock. There is no third outcome, a wait that did not acquire the lock
/// has not changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
  Acquired,
  TimedOut,
}

/// A single hardware spinlock handle as reserved from a [HwLockPool].
///
/// The lock may be contended by agents this process does not know about (other cores, co-processors, firmware).
/// Therefore the only way to take it is the atomic test-and-set provided with [HwSpinlock::try_lock].
pub trait HwSpinlock: Send + Sync {
  /// The platform id of this lock
  fn id(&self) -> LockId;

  /// Do one test-and-set attempt on the lock. Returns `true` if the lock has been taken. This never blocks.
  fn try_lock(&self) -> bool;

  /// Unconditionally release the lock. An error reports that the device did not accept the release, the lock state
  /// is unknown afterwards.
  fn unlock(&self) -> Result<(), PrimitiveError>;

  /// Wait up to `timeout` for the lock to become available. While the lock is contended the calling thread is
  /// parked for `relax` (or the remaining time if shorter) between two attempts. A `timeout` of zero does exactly
  /// one attempt.
  ///
  /// Platforms providing a native bounded wait may override this.
  fn lock_timeout(&self, timeout: Duration, relax: Duration) -> WaitOutcome {
    let start = Instant::now();
    loop {
      if self.try_lock() {
        return WaitOutcome::Acquired;
      }
      let remaining = timeout.saturating_sub(start.elapsed());
      if remaining.is_zero() {
        return WaitOutcome::TimedOut;
      }
      let nap = remaining.min(relax);
      if nap.is_zero() {
        std::thread::yield_now();
      } else {
        std::thread::sleep(nap);
      }
    }
  }
}

/// The platform wide pool of hardware spinlocks. A handle is handed out at most once until it is given back with
/// [HwLockPool::free].
pub trait HwLockPool {
  type Handle: HwSpinlock;

  /// Reserve the lock with the given id.
  fn request_specific(&self, id: LockId) -> Result<Self::Handle, PoolError>;

  /// Give a previously reserved lock back to the pool.
  fn free(&self, handle: Self::Handle);
}

impl<P: HwLockPool + ?Sized> HwLockPool for &P {
  type Handle = P::Handle;

  fn request_specific(&self, id: LockId) -> Result<Self::Handle, PoolError> {
    (**self).request_specific(id)
  }

  fn free(&self, handle: Self::Handle) {
    (**self).free(handle)
  }
}

impl<P: HwLockPool + ?Sized> HwLockPool for Arc<P> {
  type Handle = P::Handle;

  fn request_specific(&self, id: LockId) -> Result<Self::Handle, PoolError> {
    (**self).request_specific(id)
  }

  fn free(&self, handle: Self::Handle) {
    (**self).free(handle)
  }
}
