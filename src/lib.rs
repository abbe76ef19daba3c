/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/
#![doc(html_root_url = "https://docs.rs/ruspiro-hwlock/||VERSION||")]

//! # Hardware Spinlock Arbitration
//!
//! This crate shares a fixed bank of hardware spinlocks between independent client sessions. Hardware spinlocks
//! synchronize execution domains that do not share a scheduler, like the ARM cores and a co-processor on the same
//! SoC. Process local locking does not help there, the lock state lives in the hardware.
//!
//! The [Registry] reserves the configured locks from the platform [HwLockPool] once at startup, either all of them or
//! none. The [Arbiter] records which [Session] currently owns which lock and hands the actual waiting over to the
//! [HwSpinlock] itself. A session that goes away while still owning locks gets them forcefully released.
//!
//! ## Features
//!
//! Feature | Usage
//! --------|--------
//! async_locks | allows to wait for a lock in `async` code without blocking the executor.
//!
//! The [Arbiter] is typically shared with the sessions through an `Arc`.
//!
//! # Usage
//!
//! ```
//! use ruspiro_hwlock::{Arbiter, ArbiterConfig, LockId, Session, SpinlockBank};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() {
//!     // without a hardware spinlock block a software bank does the job
//!     let bank = SpinlockBank::new([3, 7]);
//!     let arbiter = Arbiter::build(bank, [LockId(3), LockId(7)], ArbiterConfig::default())
//!         .expect("locks are not available");
//!     let arbiter = Arc::new(arbiter);
//!
//!     let s1 = Session::open(&arbiter);
//!     let s2 = Session::open(&arbiter);
//!     s1.lock(LockId(3), Duration::from_millis(100)).unwrap();
//!     // s2 has to wait for s1 and gives up after 50ms
//!     assert!(s2.lock(LockId(3), Duration::from_millis(50)).is_err());
//!
//!     s1.unlock(LockId(3)).unwrap();
//!     s2.lock(LockId(3), Duration::from_millis(1000)).unwrap();
//!
//!     // s2 disconnects without unlocking, the lock gets forcefully released
//!     drop(s2);
//!     let s3 = Session::open(&arbiter);
//!     s3.lock(LockId(3), Duration::ZERO).unwrap();
//! }
//! ```

pub mod arbiter;
pub mod bank;
pub mod command;
pub mod config;
pub mod error;
pub mod primitive;
pub mod registry;
pub mod session;
pub mod sync;

#[cfg(feature = "async_locks")]
pub mod r#async;

pub use arbiter::Arbiter;
pub use bank::{BankAgent, BankLock, SpinlockBank};
pub use command::{Request, Status, HWLOCK_CMD_LOCK, HWLOCK_CMD_UNLOCK};
pub use config::{ArbiterConfig, ReleasePolicy};
pub use error::{AcquireError, CommandError, ConfigError, PoolError, PrimitiveError, ReleaseError};
pub use primitive::{HwLockPool, HwSpinlock, LockId, WaitOutcome};
pub use registry::{LockEntry, Registry};
pub use session::{Session, SessionId};
