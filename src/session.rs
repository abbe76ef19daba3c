/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Session
//!
//! A client connection to the [Arbiter]. Locks are owned by sessions. Once a [Session] is closed or dropped, every lock
//! it still holds is forcefully released, so a client that crashes can not keep a hardware lock forever.
//!
//! # Example
//! ```
//! use ruspiro_hwlock::{Arbiter, ArbiterConfig, LockId, Session, SpinlockBank};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let bank = SpinlockBank::new([3]);
//! let arbiter = Arc::new(Arbiter::build(bank, [LockId(3)], ArbiterConfig::default()).unwrap());
//!
//! let session = Session::open(&arbiter);
//! session.lock(LockId(3), Duration::from_millis(100)).unwrap();
//! drop(session);
//!
//! // the dropped session did not unlock, but the lock is free again
//! assert_eq!(arbiter.owner(LockId(3)), None);
//! ```

use crate::arbiter::Arbiter;
use crate::command::{self, Status};
use crate::error::{AcquireError, ReleaseError};
use crate::primitive::{HwLockPool, LockId};
use core::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identifies one client connection for as long as it is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
  pub const fn new(raw: u64) -> Self {
    SessionId(raw)
  }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

pub struct Session<P: HwLockPool> {
  arbiter: Arc<Arbiter<P>>,
  id: SessionId,
  closed: bool,
}

impl<P: HwLockPool> Session<P> {
  /// Connect a new client to the arbiter
  pub fn open(arbiter: &Arc<Arbiter<P>>) -> Self {
    let id = arbiter.allocate_session();
    log::debug!("session {} opened", id);
    Session {
      arbiter: Arc::clone(arbiter),
      id,
      closed: false,
    }
  }

  pub fn id(&self) -> SessionId {
    self.id
  }

  pub fn arbiter(&self) -> &Arc<Arbiter<P>> {
    &self.arbiter
  }

  pub fn lock(&self, id: LockId, timeout: Duration) -> Result<(), AcquireError> {
    self.arbiter.acquire(self.id, id, timeout)
  }

  /// Same as [Session::lock], but the calling task is suspended instead of the thread while waiting
  #[cfg(feature = "async_locks")]
  pub async fn lock_async(&self, id: LockId, timeout: Duration) -> Result<(), AcquireError> {
    self.arbiter.acquire_async(self.id, id, timeout).await
  }

  pub fn unlock(&self, id: LockId) -> Result<(), ReleaseError> {
    self.arbiter.release(self.id, id)
  }

  /// Run a raw command as received from the client transport
  pub fn handle(&self, command: u32, payload: &[u8]) -> Status {
    command::dispatch(&*self.arbiter, self.id, command, payload)
  }

  /// Disconnect the client. Returns the number of locks that had to be released forcefully.
  pub fn close(mut self) -> usize {
    self.cleanup()
  }

  fn cleanup(&mut self) -> usize {
    if self.closed {
      return 0;
    }
    self.closed = true;
    let released = self.arbiter.session_closed(self.id);
    log::debug!("session {} closed", self.id);
    released
  }
}

impl<P: HwLockPool> Drop for Session<P> {
  fn drop(&mut self) {
    self.cleanup();
  }
}

impl<P: HwLockPool> fmt::Debug for Session<P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Session")
      .field("id", &self.id)
      .field("closed", &self.closed)
      .finish()
  }
}
