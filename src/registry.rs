/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Lock Registry
//!
//! The fixed set of hardware locks reserved from the platform pool at startup. Building the registry is all or
//! nothing: if one of the requested locks can not be reserved, the locks already reserved are given back before the
//! error is returned. Once built, the set of entries never changes. Each handle is given back to the pool exactly once
//! when the registry is torn down or dropped.
//!
//! # Example
//! ```
//! use ruspiro_hwlock::{LockId, Registry, SpinlockBank};
//!
//! let bank = SpinlockBank::new([3, 7]);
//! let registry = Registry::build(bank.clone(), [LockId(3), LockId(7)]).unwrap();
//! assert!(registry.lookup(LockId(7)).is_some());
//! assert!(registry.lookup(LockId(4)).is_none());
//!
//! registry.teardown();
//! assert_eq!(bank.reserved_count(), 0);
//! ```

use crate::error::ConfigError;
use crate::primitive::{HwLockPool, LockId};

/// One reserved hardware lock
#[derive(Debug)]
pub struct LockEntry<H> {
  id: LockId,
  handle: H,
}

impl<H> LockEntry<H> {
  pub fn id(&self) -> LockId {
    self.id
  }

  pub fn handle(&self) -> &H {
    &self.handle
  }
}

pub struct Registry<P: HwLockPool> {
  pool: P,
  entries: Vec<LockEntry<P::Handle>>,
}

impl<P: HwLockPool> Registry<P> {
  /// Reserve the locks with the given ids from the pool, in the given order. If any of them can not be reserved
  /// every lock reserved so far is given back to the pool and the error is returned.
  pub fn build<I>(pool: P, ids: I) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = LockId>,
  {
    let mut entries: Vec<LockEntry<P::Handle>> = Vec::new();
    for id in ids {
      match pool.request_specific(id) {
        Ok(handle) => entries.push(LockEntry { id, handle }),
        Err(err) => {
          log::error!("failed to request hardware lock {}: {}", id, err);
          while let Some(entry) = entries.pop() {
            pool.free(entry.handle);
          }
          return Err(err.into());
        }
      }
    }

    log::info!("requested {} hardware locks", entries.len());
    Ok(Registry { pool, entries })
  }

  /// Find the entry of the given lock
  pub fn lookup(&self, id: LockId) -> Option<&LockEntry<P::Handle>> {
    self.entries.iter().find(|entry| entry.id == id)
  }

  /// The index of the given lock within the registry
  pub fn position(&self, id: LockId) -> Option<usize> {
    self.entries.iter().position(|entry| entry.id == id)
  }

  pub fn entries(&self) -> &[LockEntry<P::Handle>] {
    &self.entries
  }

  pub fn ids(&self) -> impl Iterator<Item = LockId> + '_ {
    self.entries.iter().map(|entry| entry.id)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Give all locks back to the pool, whether they are currently locked or not
  pub fn teardown(self) {
    log::info!("freeing {} hardware locks", self.entries.len());
    drop(self);
  }
}

impl<P: HwLockPool> Drop for Registry<P> {
  fn drop(&mut self) {
    for entry in self.entries.drain(..) {
      self.pool.free(entry.handle);
    }
  }
}

impl<P: HwLockPool> core::fmt::Debug for Registry<P> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("Registry")
      .field("ids", &self.ids().collect::<Vec<_>>())
      .finish_non_exhaustive()
  }
}
