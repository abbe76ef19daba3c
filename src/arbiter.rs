/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Arbiter
//!
//! The [Arbiter] keeps track of which session owns which of the registered hardware locks. Ownership is recorded under
//! a single short living coordination lock. The actual wait for a contended hardware lock happens outside of it, so a
//! session waiting for one lock never stalls operations on any other lock.
//!
//! If a session goes away without unlocking, [Arbiter::session_closed] forcefully releases whatever it still holds.
//!
//! # Example
//! ```
//! use ruspiro_hwlock::{Arbiter, ArbiterConfig, LockId, SpinlockBank};
//! use std::time::Duration;
//!
//! let bank = SpinlockBank::new([3, 7]);
//! let arbiter = Arbiter::build(bank, [LockId(3), LockId(7)], ArbiterConfig::default()).unwrap();
//! let s1 = arbiter.allocate_session();
//! let s2 = arbiter.allocate_session();
//!
//! arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();
//! assert!(arbiter.acquire(s2, LockId(3), Duration::from_millis(10)).is_err());
//! assert_eq!(arbiter.owner(LockId(3)), Some(s1));
//!
//! arbiter.session_closed(s1);
//! arbiter.acquire(s2, LockId(3), Duration::ZERO).unwrap();
//! ```

use crate::config::{ArbiterConfig, ReleasePolicy};
use crate::error::{AcquireError, ConfigError, ReleaseError};
use crate::primitive::{HwLockPool, HwSpinlock, LockId, WaitOutcome};
use crate::registry::{LockEntry, Registry};
use crate::session::SessionId;
use crate::sync::Mutex;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use core::task::Waker;
use std::collections::BTreeMap;
use std::time::Duration;

/// The ownership state guarded by the coordination lock. `owners[i]` belongs to the registry entry at index `i`.
pub(crate) struct Bookkeeping {
  owners: Vec<Option<SessionId>>,
  /// Tasks waiting for a lock to be released, keyed by their waiter id. The value holds the registry index of the
  /// lock waited for.
  waiters: BTreeMap<usize, (usize, Waker)>,
  /// Number of releases through the arbiter per registry index
  #[cfg_attr(not(feature = "async_locks"), allow(dead_code))]
  releases: Vec<u64>,
  #[cfg_attr(not(feature = "async_locks"), allow(dead_code))]
  next_waiter: usize,
}

impl Bookkeeping {
  fn new(size: usize) -> Self {
    Bookkeeping {
      owners: vec![None; size],
      waiters: BTreeMap::new(),
      releases: vec![0; size],
      next_waiter: 0,
    }
  }

  /// Count a release of the lock at `index` and wake all tasks waiting on it. They re-register if they still can't
  /// get it.
  fn wake(&mut self, index: usize) {
    self.releases[index] = self.releases[index].wrapping_add(1);
    let woken: Vec<usize> = self
      .waiters
      .iter()
      .filter(|(_, (waiting_on, _))| *waiting_on == index)
      .map(|(&waiter, _)| waiter)
      .collect();
    for waiter in woken {
      if let Some((_, waker)) = self.waiters.remove(&waiter) {
        waker.wake();
      }
    }
  }

  #[cfg(feature = "async_locks")]
  pub(crate) fn releases(&self, index: usize) -> u64 {
    self.releases[index]
  }

  #[cfg(feature = "async_locks")]
  pub(crate) fn add_waiter(&mut self, index: usize, waker: Waker) -> usize {
    let waiter = self.next_waiter;
    self.next_waiter = self.next_waiter.wrapping_add(1);
    self.waiters.insert(waiter, (index, waker));
    waiter
  }

  /// Refresh the waker of a still pending waiter. Returns `false` if the waiter has been woken in the meantime.
  #[cfg(feature = "async_locks")]
  pub(crate) fn refresh_waiter(&mut self, waiter: usize, waker: &Waker) -> bool {
    match self.waiters.get_mut(&waiter) {
      Some((_, registered)) => {
        if !registered.will_wake(waker) {
          *registered = waker.clone();
        }
        true
      }
      None => false,
    }
  }

  #[cfg(feature = "async_locks")]
  pub(crate) fn remove_waiter(&mut self, waiter: usize) {
    self.waiters.remove(&waiter);
  }

  #[cfg(all(test, feature = "async_locks"))]
  pub(crate) fn waiting(&self) -> usize {
    self.waiters.len()
  }
}

/// Arbitrates the locks of one [Registry] between sessions
pub struct Arbiter<P: HwLockPool> {
  registry: Registry<P>,
  config: ArbiterConfig,
  book: Mutex<Bookkeeping>,
  next_session: AtomicU64,
}

impl<P: HwLockPool> Arbiter<P> {
  pub fn new(registry: Registry<P>, config: ArbiterConfig) -> Self {
    let book = Bookkeeping::new(registry.len());
    Arbiter {
      registry,
      config,
      book: Mutex::new(book),
      next_session: AtomicU64::new(1),
    }
  }

  /// Reserve the given locks from the pool and arbitrate them
  pub fn build<I>(pool: P, ids: I, config: ArbiterConfig) -> Result<Self, ConfigError>
  where
    I: IntoIterator<Item = LockId>,
  {
    Registry::build(pool, ids).map(|registry| Arbiter::new(registry, config))
  }

  pub fn registry(&self) -> &Registry<P> {
    &self.registry
  }

  pub fn config(&self) -> &ArbiterConfig {
    &self.config
  }

  /// Hand out a session id that has never been used with this arbiter
  pub fn allocate_session(&self) -> SessionId {
    SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed))
  }

  /// Take the hardware lock `id` for `session`, waiting up to `timeout` while it is held by someone else. The
  /// calling thread is parked while waiting.
  pub fn acquire(&self, session: SessionId, id: LockId, timeout: Duration) -> Result<(), AcquireError> {
    let index = self.acquire_index(id)?;
    let entry = &self.registry.entries()[index];

    // the wait must not hold the coordination lock
    match entry.handle().lock_timeout(timeout, self.config.relax) {
      WaitOutcome::Acquired => {
        self.record_owner(index, session);
        Ok(())
      }
      WaitOutcome::TimedOut => {
        log::debug!("session {} timed out on hardware lock {}", session, id);
        Err(AcquireError::TimedOut(id))
      }
    }
  }

  /// Release the hardware lock `id` on behalf of `session`. This never blocks.
  pub fn release(&self, session: SessionId, id: LockId) -> Result<(), ReleaseError> {
    let index = self.registry.position(id).ok_or_else(|| {
      log::error!("hardware lock {} is not reserved", id);
      ReleaseError::InvalidLockId(id)
    })?;

    let mut book = self.book.lock();
    let owner = book.owners[index].ok_or(ReleaseError::NotLocked(id))?;
    if owner != session {
      if self.config.release_policy == ReleasePolicy::OwnerOnly {
        return Err(ReleaseError::NotOwner { id, owner });
      }
      log::warn!(
        "session {} releases hardware lock {} owned by session {}",
        session,
        id,
        owner
      );
    }

    unlock_entry(&self.registry.entries()[index]);
    book.owners[index] = None;
    book.wake(index);
    log::trace!("session {} released hardware lock {}", session, id);
    Ok(())
  }

  /// Forcefully release every lock still owned by `session`. Returns the number of locks released. This always
  /// completes, a device refusing the release is only logged.
  pub fn session_closed(&self, session: SessionId) -> usize {
    let mut book = self.book.lock();
    let mut released = 0;
    for (index, entry) in self.registry.entries().iter().enumerate() {
      if book.owners[index] == Some(session) {
        log::warn!("hardware lock {} is forcefully unlocked", entry.id());
        unlock_entry(entry);
        book.owners[index] = None;
        book.wake(index);
        released += 1;
      }
    }
    released
  }

  /// The session currently owning the lock, `None` if the lock is free or not registered
  pub fn owner(&self, id: LockId) -> Option<SessionId> {
    let index = self.registry.position(id)?;
    self.book.lock().owners[index]
  }

  /// Snapshot of the ownership of all registered locks in registry order
  pub fn ownership(&self) -> Vec<(LockId, Option<SessionId>)> {
    let book = self.book.lock();
    self.registry.ids().zip(book.owners.iter().copied()).collect()
  }

  /// Shut the arbiter down. Locks still owned by a session are released before every lock is given back to the
  /// pool.
  pub fn teardown(self) {
    let Arbiter { registry, book, .. } = self;
    let book = book.into_inner();
    for (entry, owner) in registry.entries().iter().zip(book.owners) {
      if let Some(owner) = owner {
        log::warn!(
          "hardware lock {} still held by session {} at teardown",
          entry.id(),
          owner
        );
        unlock_entry(entry);
      }
    }
    registry.teardown();
  }

  pub(crate) fn acquire_index(&self, id: LockId) -> Result<usize, AcquireError> {
    self.registry.position(id).ok_or_else(|| {
      log::error!("hardware lock {} is not reserved", id);
      AcquireError::InvalidLockId(id)
    })
  }

  pub(crate) fn record_owner(&self, index: usize, session: SessionId) {
    let mut book = self.book.lock();
    if let Some(stale) = book.owners[index].replace(session) {
      // only possible if someone outside of the arbiter released the hardware lock
      log::warn!(
        "hardware lock {} taken over from session {} by session {}",
        self.registry.entries()[index].id(),
        stale,
        session
      );
    }
    log::trace!(
      "session {} acquired hardware lock {}",
      session,
      self.registry.entries()[index].id()
    );
  }

  #[cfg(feature = "async_locks")]
  pub(crate) fn bookkeeping(&self) -> &Mutex<Bookkeeping> {
    &self.book
  }
}

fn unlock_entry<H: HwSpinlock>(entry: &LockEntry<H>) {
  if let Err(err) = entry.handle().unlock() {
    log::warn!("failed to release hardware lock {}: {}", entry.id(), err);
  }
}

impl<P: HwLockPool> fmt::Debug for Arbiter<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Arbiter")
      .field("ownership", &self.ownership())
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bank::SpinlockBank;
  use crate::error::PrimitiveError;
  use std::sync::Arc;
  use std::thread;
  use std::time::Instant;

  fn arbiter(bank: &SpinlockBank, config: ArbiterConfig) -> Arbiter<SpinlockBank> {
    Arbiter::build(bank.clone(), [LockId(3), LockId(7)], config).unwrap()
  }

  #[test]
  fn acquire_free_lock_immediately() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();

    let start = Instant::now();
    arbiter.acquire(s1, LockId(7), Duration::ZERO).unwrap();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(arbiter.owner(LockId(7)), Some(s1));
    assert!(bank.is_locked(LockId(7)));
  }

  #[test]
  fn acquire_unknown_lock() {
    let bank = SpinlockBank::new([3, 7, 9]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    let before = arbiter.ownership();

    assert_eq!(
      arbiter.acquire(s1, LockId(9), Duration::ZERO),
      Err(AcquireError::InvalidLockId(LockId(9)))
    );
    assert_eq!(arbiter.ownership(), before);
    assert!(!bank.is_locked(LockId(9)));
  }

  #[test]
  fn contended_acquire_times_out() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    let s2 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::from_millis(100)).unwrap();

    let start = Instant::now();
    assert_eq!(
      arbiter.acquire(s2, LockId(3), Duration::from_millis(50)),
      Err(AcquireError::TimedOut(LockId(3)))
    );
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(arbiter.owner(LockId(3)), Some(s1));
  }

  #[test]
  fn reacquire_by_owner_is_not_reentrant() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();
    assert_eq!(
      arbiter.acquire(s1, LockId(3), Duration::from_millis(5)),
      Err(AcquireError::TimedOut(LockId(3)))
    );
    assert_eq!(arbiter.owner(LockId(3)), Some(s1));
  }

  #[test]
  fn session_may_own_several_locks() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();
    arbiter.acquire(s1, LockId(7), Duration::ZERO).unwrap();
    assert_eq!(
      arbiter.ownership(),
      vec![(LockId(3), Some(s1)), (LockId(7), Some(s1))]
    );
  }

  #[test]
  fn external_agent_blocks_acquire() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    let agent = bank.external_agent(LockId(7)).unwrap();
    assert!(agent.try_lock());

    assert_eq!(
      arbiter.acquire(s1, LockId(7), Duration::from_millis(10)),
      Err(AcquireError::TimedOut(LockId(7)))
    );
    assert_eq!(arbiter.owner(LockId(7)), None);

    agent.unlock().unwrap();
    arbiter.acquire(s1, LockId(7), Duration::ZERO).unwrap();
  }

  #[test]
  fn waiter_gets_lock_after_release() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = Arc::new(arbiter(&bank, ArbiterConfig::default()));
    let s1 = arbiter.allocate_session();
    let s2 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();

    let waiter = {
      let arbiter = Arc::clone(&arbiter);
      thread::spawn(move || arbiter.acquire(s2, LockId(3), Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    arbiter.release(s1, LockId(3)).unwrap();

    assert_eq!(waiter.join().unwrap(), Ok(()));
    assert_eq!(arbiter.owner(LockId(3)), Some(s2));
  }

  #[test]
  fn wait_does_not_stall_other_locks() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = Arc::new(arbiter(&bank, ArbiterConfig::default()));
    let s1 = arbiter.allocate_session();
    let s2 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();

    let waiter = {
      let arbiter = Arc::clone(&arbiter);
      thread::spawn(move || arbiter.acquire(s2, LockId(3), Duration::from_millis(300)))
    };
    thread::sleep(Duration::from_millis(20));
    let start = Instant::now();
    arbiter.acquire(s1, LockId(7), Duration::ZERO).unwrap();
    arbiter.release(s1, LockId(7)).unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    assert_eq!(waiter.join().unwrap(), Err(AcquireError::TimedOut(LockId(3))));
  }

  #[test]
  fn release_error_paths_leave_state_unchanged() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    let s2 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();
    let before = arbiter.ownership();

    assert_eq!(
      arbiter.release(s1, LockId(4)),
      Err(ReleaseError::InvalidLockId(LockId(4)))
    );
    assert_eq!(
      arbiter.release(s1, LockId(7)),
      Err(ReleaseError::NotLocked(LockId(7)))
    );
    assert_eq!(
      arbiter.release(s2, LockId(3)),
      Err(ReleaseError::NotOwner {
        id: LockId(3),
        owner: s1
      })
    );
    assert_eq!(arbiter.ownership(), before);
    assert!(bank.is_locked(LockId(3)));
    assert!(!bank.is_locked(LockId(7)));
  }

  #[test]
  fn permissive_release_by_other_session() {
    let bank = SpinlockBank::new([3, 7]);
    let config = ArbiterConfig::default().with_release_policy(ReleasePolicy::Permissive);
    let arbiter = arbiter(&bank, config);
    let s1 = arbiter.allocate_session();
    let rescuer = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();

    arbiter.release(rescuer, LockId(3)).unwrap();
    assert_eq!(arbiter.owner(LockId(3)), None);
    assert!(!bank.is_locked(LockId(3)));
    // not held at all is still an error
    assert_eq!(
      arbiter.release(rescuer, LockId(3)),
      Err(ReleaseError::NotLocked(LockId(3)))
    );
  }

  #[test]
  fn session_closed_frees_all_owned_locks() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    let s2 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();
    arbiter.acquire(s1, LockId(7), Duration::ZERO).unwrap();

    assert_eq!(arbiter.session_closed(s2), 0);
    assert_eq!(arbiter.session_closed(s1), 2);
    assert_eq!(arbiter.ownership(), vec![(LockId(3), None), (LockId(7), None)]);

    let s3 = arbiter.allocate_session();
    arbiter.acquire(s3, LockId(3), Duration::ZERO).unwrap();
    assert_eq!(arbiter.session_closed(s1), 0);
  }

  /// lock whose device refuses every release
  struct Broken;

  struct BrokenPool;

  impl HwSpinlock for Broken {
    fn id(&self) -> LockId {
      LockId(1)
    }

    fn try_lock(&self) -> bool {
      true
    }

    fn unlock(&self) -> Result<(), PrimitiveError> {
      Err(PrimitiveError::Device(LockId(1)))
    }
  }

  impl HwLockPool for BrokenPool {
    type Handle = Broken;

    fn request_specific(&self, _id: LockId) -> Result<Broken, crate::error::PoolError> {
      Ok(Broken)
    }

    fn free(&self, _handle: Broken) {}
  }

  #[test]
  fn failing_device_release_still_clears_owner() {
    let arbiter = Arbiter::build(BrokenPool, [LockId(1)], ArbiterConfig::default()).unwrap();
    let s1 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(1), Duration::ZERO).unwrap();
    assert_eq!(arbiter.session_closed(s1), 1);
    assert_eq!(arbiter.owner(LockId(1)), None);

    arbiter.acquire(s1, LockId(1), Duration::ZERO).unwrap();
    arbiter.release(s1, LockId(1)).unwrap();
    assert_eq!(arbiter.owner(LockId(1)), None);
  }

  #[test]
  fn at_most_one_owner_under_contention() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = Arc::new(arbiter(&bank, ArbiterConfig::default().with_relax(Duration::ZERO)));
    let workers: Vec<_> = (0..4)
      .map(|_| {
        let arbiter = Arc::clone(&arbiter);
        thread::spawn(move || {
          let me = arbiter.allocate_session();
          let mut held = 0;
          for _ in 0..200 {
            if arbiter.acquire(me, LockId(3), Duration::from_millis(50)).is_ok() {
              assert_eq!(arbiter.owner(LockId(3)), Some(me));
              held += 1;
              arbiter.release(me, LockId(3)).unwrap();
            }
          }
          held
        })
      })
      .collect();
    let total: u32 = workers.into_iter().map(|worker| worker.join().unwrap()).sum();
    assert!(total > 0);
    assert_eq!(arbiter.owner(LockId(3)), None);
  }

  #[test]
  fn teardown_releases_everything() {
    let bank = SpinlockBank::new([3, 7]);
    let arbiter = arbiter(&bank, ArbiterConfig::default());
    let s1 = arbiter.allocate_session();
    arbiter.acquire(s1, LockId(3), Duration::ZERO).unwrap();

    arbiter.teardown();
    assert_eq!(bank.reserved_count(), 0);
    assert!(!bank.is_locked(LockId(3)));
  }

  #[test]
  fn session_ids_are_unique() {
    let bank = SpinlockBank::new([3]);
    let arbiter = Arbiter::build(bank, [LockId(3)], ArbiterConfig::default()).unwrap();
    let a = arbiter.allocate_session();
    let b = arbiter.allocate_session();
    assert_ne!(a, b);
  }
}
