/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Spinlock Bank
//!
//! A software bank of atomic spinlocks with fixed ids, serving as [HwLockPool] where no hardware spinlock block is
//! available. Each lock is a simple atomic test-and-set flag. The bank is cheap to clone, every clone refers to the
//! same set of locks.
//!
//! Besides the reservable handles the bank hands out [BankAgent]s. An agent takes the very same lock flag without any
//! reservation, the way another core or a co-processor would use a real hardware spinlock.
//!
//! # Example
//! ```
//! use ruspiro_hwlock::{HwLockPool, HwSpinlock, LockId, SpinlockBank};
//!
//! let bank = SpinlockBank::new([3, 7]);
//! let lock = bank.request_specific(LockId(3)).unwrap();
//! assert!(lock.try_lock());
//! assert!(bank.is_locked(LockId(3)));
//! lock.unlock().unwrap();
//! bank.free(lock);
//! assert_eq!(bank.reserved_count(), 0);
//! ```

use crate::error::{PoolError, PrimitiveError};
use crate::primitive::{HwLockPool, HwSpinlock, LockId};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct BankCell {
  id: LockId,
  reserved: AtomicBool,
  locked: AtomicBool,
}

impl BankCell {
  fn new(id: LockId) -> Self {
    BankCell {
      id,
      reserved: AtomicBool::new(false),
      locked: AtomicBool::new(false),
    }
  }

  fn try_lock(&self) -> bool {
    // set the flag if it has been cleared before
    self.locked
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .is_ok()
  }

  fn unlock(&self) -> Result<(), PrimitiveError> {
    if self.locked.swap(false, Ordering::Release) {
      Ok(())
    } else {
      Err(PrimitiveError::NotLocked(self.id))
    }
  }
}

/// A bank of software spinlocks
#[derive(Debug, Clone)]
pub struct SpinlockBank {
  cells: Arc<[BankCell]>,
}

impl SpinlockBank {
  /// Create a bank providing one lock for each given id. Repeated ids are only added once.
  pub fn new<I>(ids: I) -> Self
  where
    I: IntoIterator<Item = u32>,
  {
    let mut cells: Vec<BankCell> = Vec::new();
    for id in ids.into_iter().map(LockId) {
      if !cells.iter().any(|cell| cell.id == id) {
        cells.push(BankCell::new(id));
      }
    }
    SpinlockBank {
      cells: cells.into(),
    }
  }

  /// The ids of all locks in this bank
  pub fn ids(&self) -> impl Iterator<Item = LockId> + '_ {
    self.cells.iter().map(|cell| cell.id)
  }

  /// Whether the lock is currently reserved by some user of the pool
  pub fn is_reserved(&self, id: LockId) -> bool {
    self.cell(id)
      .map(|cell| cell.reserved.load(Ordering::Acquire))
      .unwrap_or(false)
  }

  /// Whether the lock flag is currently set, regardless of who set it
  pub fn is_locked(&self, id: LockId) -> bool {
    self.cell(id)
      .map(|cell| cell.locked.load(Ordering::Acquire))
      .unwrap_or(false)
  }

  /// Number of locks currently reserved from this bank
  pub fn reserved_count(&self) -> usize {
    self.cells
      .iter()
      .filter(|cell| cell.reserved.load(Ordering::Acquire))
      .count()
  }

  /// Access to a lock bypassing the reservation, as any contender outside of this process would do
  pub fn external_agent(&self, id: LockId) -> Option<BankAgent> {
    self.position(id).map(|index| BankAgent {
      cells: Arc::clone(&self.cells),
      index,
    })
  }

  fn position(&self, id: LockId) -> Option<usize> {
    self.cells.iter().position(|cell| cell.id == id)
  }

  fn cell(&self, id: LockId) -> Option<&BankCell> {
    self.cells.iter().find(|cell| cell.id == id)
  }
}

impl HwLockPool for SpinlockBank {
  type Handle = BankLock;

  fn request_specific(&self, id: LockId) -> Result<BankLock, PoolError> {
    let index = self.position(id).ok_or(PoolError::Unknown(id))?;
    if self.cells[index].reserved.swap(true, Ordering::AcqRel) {
      return Err(PoolError::Busy(id));
    }
    Ok(BankLock {
      cells: Arc::clone(&self.cells),
      index,
    })
  }

  fn free(&self, handle: BankLock) {
    if !Arc::ptr_eq(&self.cells, &handle.cells) {
      log::warn!(
        "hardware lock {} does not belong to this bank, not freed",
        handle.id()
      );
      return;
    }
    let cell = &self.cells[handle.index];
    cell.locked.store(false, Ordering::Release);
    cell.reserved.store(false, Ordering::Release);
  }
}

/// A reserved lock of a [SpinlockBank]. It can only be given back through [HwLockPool::free].
#[derive(Debug)]
pub struct BankLock {
  cells: Arc<[BankCell]>,
  index: usize,
}

impl HwSpinlock for BankLock {
  fn id(&self) -> LockId {
    self.cells[self.index].id
  }

  fn try_lock(&self) -> bool {
    self.cells[self.index].try_lock()
  }

  fn unlock(&self) -> Result<(), PrimitiveError> {
    self.cells[self.index].unlock()
  }
}

/// An unreserved contender on one lock of a [SpinlockBank]
#[derive(Debug, Clone)]
pub struct BankAgent {
  cells: Arc<[BankCell]>,
  index: usize,
}

impl HwSpinlock for BankAgent {
  fn id(&self) -> LockId {
    self.cells[self.index].id
  }

  fn try_lock(&self) -> bool {
    self.cells[self.index].try_lock()
  }

  fn unlock(&self) -> Result<(), PrimitiveError> {
    self.cells[self.index].unlock()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reserve_once() {
    let bank = SpinlockBank::new([3, 7]);
    let lock = bank.request_specific(LockId(7)).unwrap();
    assert_eq!(lock.id(), LockId(7));
    assert_eq!(
      bank.request_specific(LockId(7)).unwrap_err(),
      PoolError::Busy(LockId(7))
    );
    bank.free(lock);
    assert!(bank.request_specific(LockId(7)).is_ok());
  }

  #[test]
  fn unknown_id() {
    let bank = SpinlockBank::new([3]);
    assert_eq!(
      bank.request_specific(LockId(4)).unwrap_err(),
      PoolError::Unknown(LockId(4))
    );
    assert!(bank.external_agent(LockId(4)).is_none());
  }

  #[test]
  fn agent_contends_with_handle() {
    let bank = SpinlockBank::new([3]);
    let lock = bank.request_specific(LockId(3)).unwrap();
    let agent = bank.external_agent(LockId(3)).unwrap();

    assert!(agent.try_lock());
    assert!(!lock.try_lock());
    agent.unlock().unwrap();
    assert!(lock.try_lock());
    assert!(!agent.try_lock());
  }

  #[test]
  fn unlock_of_free_lock_is_reported() {
    let bank = SpinlockBank::new([3]);
    let lock = bank.request_specific(LockId(3)).unwrap();
    assert_eq!(lock.unlock(), Err(PrimitiveError::NotLocked(LockId(3))));
  }

  #[test]
  fn free_clears_lock_flag() {
    let bank = SpinlockBank::new([3]);
    let lock = bank.request_specific(LockId(3)).unwrap();
    assert!(lock.try_lock());
    bank.free(lock);
    assert!(!bank.is_locked(LockId(3)));
    assert!(!bank.is_reserved(LockId(3)));
  }

  #[test]
  fn foreign_handle_is_not_freed() {
    let bank = SpinlockBank::new([3]);
    let other = SpinlockBank::new([3]);
    let lock = other.request_specific(LockId(3)).unwrap();
    bank.free(lock);
    assert!(other.is_reserved(LockId(3)));
  }

  #[test]
  fn repeated_ids_collapse() {
    let bank = SpinlockBank::new([5, 5, 1]);
    assert_eq!(bank.ids().collect::<Vec<_>>(), vec![LockId(5), LockId(1)]);
  }
}
