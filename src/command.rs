/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Command Binding
//!
//! Maps the two client commands onto the [Arbiter]. A request is a command code together with a fixed size little
//! endian payload:
//!
//! Command | Code | Payload
//! --------|------|--------
//! LOCK    | `0x01` | lock id (`u32`), timeout in milliseconds (`u32`)
//! UNLOCK  | `0x02` | lock id (`u32`)
//!
//! Every request is answered with a [Status] that carries an errno style code.

use crate::arbiter::Arbiter;
use crate::error::{AcquireError, CommandError, ReleaseError};
use crate::primitive::{HwLockPool, LockId};
use crate::session::SessionId;
use std::time::Duration;

pub const HWLOCK_CMD_LOCK: u32 = 0x01;
pub const HWLOCK_CMD_UNLOCK: u32 = 0x02;

const LOCK_PAYLOAD_SIZE: usize = 8;
const UNLOCK_PAYLOAD_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
  Lock { id: LockId, timeout: Duration },
  Unlock { id: LockId },
}

impl Request {
  /// Decode a raw request. Unknown commands are rejected before the payload is looked at.
  pub fn decode(command: u32, payload: &[u8]) -> Result<Self, CommandError> {
    let expected = match command {
      HWLOCK_CMD_LOCK => LOCK_PAYLOAD_SIZE,
      HWLOCK_CMD_UNLOCK => UNLOCK_PAYLOAD_SIZE,
      _ => return Err(CommandError::UnknownCommand(command)),
    };
    if payload.len() != expected {
      return Err(CommandError::TransferFault {
        command,
        expected,
        actual: payload.len(),
      });
    }

    let id = LockId(read_u32(payload, 0));
    if command == HWLOCK_CMD_LOCK {
      let timeout = Duration::from_millis(u64::from(read_u32(payload, 4)));
      Ok(Request::Lock { id, timeout })
    } else {
      Ok(Request::Unlock { id })
    }
  }

  /// The raw command code and payload of this request. Timeouts beyond `u32::MAX` milliseconds are capped.
  pub fn encode(&self) -> (u32, Vec<u8>) {
    match *self {
      Request::Lock { id, timeout } => {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        let mut payload = Vec::with_capacity(LOCK_PAYLOAD_SIZE);
        payload.extend_from_slice(&id.value().to_le_bytes());
        payload.extend_from_slice(&millis.to_le_bytes());
        (HWLOCK_CMD_LOCK, payload)
      }
      Request::Unlock { id } => (HWLOCK_CMD_UNLOCK, id.value().to_le_bytes().to_vec()),
    }
  }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
  let mut raw = [0_u8; 4];
  raw.copy_from_slice(&bytes[offset..offset + 4]);
  u32::from_le_bytes(raw)
}

/// The answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Status {
  Ok = 0,
  /// The lock id is not part of the registry
  InvalidArgument = -22,
  /// The lock stayed contended for the whole timeout
  TimedOut = -110,
  /// The lock is not held, or held by another session
  InvalidState = -1,
  /// The request payload could not be transferred
  TransferFault = -14,
  UnknownCommand = -25,
}

impl Status {
  pub fn code(self) -> i32 {
    self as i32
  }

  pub fn is_ok(self) -> bool {
    self == Status::Ok
  }
}

impl From<AcquireError> for Status {
  fn from(err: AcquireError) -> Self {
    match err {
      AcquireError::InvalidLockId(_) => Status::InvalidArgument,
      AcquireError::TimedOut(_) => Status::TimedOut,
    }
  }
}

impl From<ReleaseError> for Status {
  fn from(err: ReleaseError) -> Self {
    match err {
      ReleaseError::InvalidLockId(_) => Status::InvalidArgument,
      ReleaseError::NotLocked(_) | ReleaseError::NotOwner { .. } => Status::InvalidState,
    }
  }
}

impl From<CommandError> for Status {
  fn from(err: CommandError) -> Self {
    match err {
      CommandError::UnknownCommand(_) => Status::UnknownCommand,
      CommandError::TransferFault { .. } => Status::TransferFault,
    }
  }
}

fn status_of<E: Into<Status>>(result: Result<(), E>) -> Status {
  match result {
    Ok(()) => Status::Ok,
    Err(err) => err.into(),
  }
}

/// Decode and run one raw request on behalf of `session`
pub fn dispatch<P: HwLockPool>(
  arbiter: &Arbiter<P>,
  session: SessionId,
  command: u32,
  payload: &[u8],
) -> Status {
  let request = match Request::decode(command, payload) {
    Ok(request) => request,
    Err(err) => {
      log::debug!("session {}: {}", session, err);
      return err.into();
    }
  };

  match request {
    Request::Lock { id, timeout } => status_of(arbiter.acquire(session, id, timeout)),
    Request::Unlock { id } => status_of(arbiter.release(session, id)),
  }
}
