/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Async Acquire
//!
//! Waiting for a contended hardware lock without blocking the executor thread. A waiting task registers its [Waker]
//! with the arbiter and gets woken as soon as the lock is released through the arbiter. As the lock might as well be
//! released by an agent outside of this process that nobody tells us about, the task also re-checks the lock after
//! the configured relax period.

use crate::arbiter::Arbiter;
use crate::error::AcquireError;
use crate::primitive::{HwLockPool, HwSpinlock, LockId};
use crate::session::SessionId;
use core::{
  future::Future,
  pin::Pin,
  task::{Context, Poll},
};
use std::time::{Duration, Instant};

impl<P: HwLockPool> Arbiter<P> {
  /// Take the hardware lock `id` for `session`, waiting up to `timeout` while it is held by someone else. While
  /// waiting the calling task is suspended. The outcome is the same as with [Arbiter::acquire].
  pub async fn acquire_async(
    &self,
    session: SessionId,
    id: LockId,
    timeout: Duration,
  ) -> Result<(), AcquireError> {
    let index = self.acquire_index(id)?;
    let handle = self.registry().entries()[index].handle();
    let start = Instant::now();

    loop {
      // a release between the attempt and the waker registration must not go unnoticed
      let seen = self.bookkeeping().lock().releases(index);
      if handle.try_lock() {
        self.record_owner(index, session);
        return Ok(());
      }
      let remaining = timeout.saturating_sub(start.elapsed());
      if remaining.is_zero() {
        log::debug!("session {} timed out on hardware lock {}", session, id);
        return Err(AcquireError::TimedOut(id));
      }

      let nap = remaining.min(self.config().relax);
      if nap.is_zero() {
        async_std::task::yield_now().await;
      } else {
        // elapsing is fine, it only means we have to check the lock again
        let _ = async_std::future::timeout(nap, ReleaseNotified::new(self, index, seen)).await;
      }
    }
  }
}

/// `Future` resolving once the lock at the given registry index has been released through the [Arbiter]. `seen` is
/// the release count of that lock at the time of the last failed attempt.
struct ReleaseNotified<'a, P: HwLockPool> {
  arbiter: &'a Arbiter<P>,
  index: usize,
  seen: u64,
  waiter: Option<usize>,
}

impl<'a, P: HwLockPool> ReleaseNotified<'a, P> {
  fn new(arbiter: &'a Arbiter<P>, index: usize, seen: u64) -> Self {
    Self {
      arbiter,
      index,
      seen,
      waiter: None,
    }
  }
}

impl<P: HwLockPool> Future for ReleaseNotified<'_, P> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = self.get_mut();
    let mut book = this.arbiter.bookkeeping().lock();
    match this.waiter {
      None => {
        if book.releases(this.index) != this.seen {
          // released since the last attempt, nobody will wake us for that one
          return Poll::Ready(());
        }
        this.waiter = Some(book.add_waiter(this.index, cx.waker().clone()));
        Poll::Pending
      }
      Some(waiter) => {
        if book.refresh_waiter(waiter, cx.waker()) {
          Poll::Pending
        } else {
          // the release removed our registration before waking us
          this.waiter = None;
          Poll::Ready(())
        }
      }
    }
  }
}

impl<P: HwLockPool> Drop for ReleaseNotified<'_, P> {
  fn drop(&mut self) {
    if let Some(waiter) = self.waiter.take() {
      self.arbiter.bookkeeping().lock().remove_waiter(waiter);
    }
  }
}
