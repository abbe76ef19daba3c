/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Errors
//!
//! Only a [ConfigError] is fatal, it aborts building the registry. All other errors are local to the single call
//! that raised it and leave the ownership state as it was.

use crate::primitive::LockId;
use crate::session::SessionId;
use thiserror::Error;

/// Reserving a lock from the platform pool failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
  #[error("hardware lock {0} is unknown to the platform")]
  Unknown(LockId),

  #[error("hardware lock {0} is already reserved")]
  Busy(LockId),
}

/// Building the registry failed. Any lock reserved before the failure has been given back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("failed to request hardware lock {0}: unknown to the platform")]
  Unknown(LockId),

  #[error("failed to request hardware lock {0}: already reserved")]
  Busy(LockId),
}

impl From<PoolError> for ConfigError {
  fn from(err: PoolError) -> Self {
    match err {
      PoolError::Unknown(id) => ConfigError::Unknown(id),
      PoolError::Busy(id) => ConfigError::Busy(id),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
  #[error("hardware lock {0} is not reserved")]
  InvalidLockId(LockId),

  #[error("timed out waiting for hardware lock {0}")]
  TimedOut(LockId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReleaseError {
  #[error("hardware lock {0} is not reserved")]
  InvalidLockId(LockId),

  #[error("hardware lock {0} is not locked")]
  NotLocked(LockId),

  #[error("hardware lock {id} is owned by session {owner}")]
  NotOwner { id: LockId, owner: SessionId },
}

/// A request could not be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
  #[error("unknown command {0:#x}")]
  UnknownCommand(u32),

  #[error("command {command:#x} expects {expected} payload bytes, got {actual}")]
  TransferFault {
    command: u32,
    expected: usize,
    actual: usize,
  },
}

/// The device refused a release request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PrimitiveError {
  #[error("hardware lock {0} was not locked")]
  NotLocked(LockId),

  #[error("device failed to release hardware lock {0}")]
  Device(LockId),
}
