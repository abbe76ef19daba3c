/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Arbiter Configuration
//!
//! Runtime knobs of the [Arbiter](crate::Arbiter). Which locks are arbitrated is not part of the configuration, the
//! platform hands the ids over when building the [Registry](crate::Registry).

use std::time::Duration;

/// Pause between two attempts of a contended wait if nothing else is configured
pub const DEFAULT_RELAX: Duration = Duration::from_millis(1);

/// Who may release a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleasePolicy {
  /// Only the session owning the lock may release it
  #[default]
  OwnerOnly,
  /// Any session may release a lock held by any session. Meant for recovery tooling that has to free locks of a
  /// client that hangs.
  Permissive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterConfig {
  pub release_policy: ReleasePolicy,
  /// How long a contended wait parks between two attempts on the hardware lock
  pub relax: Duration,
}

impl ArbiterConfig {
  pub const fn new() -> Self {
    ArbiterConfig {
      release_policy: ReleasePolicy::OwnerOnly,
      relax: DEFAULT_RELAX,
    }
  }

  pub const fn with_release_policy(mut self, release_policy: ReleasePolicy) -> Self {
    self.release_policy = release_policy;
    self
  }

  pub const fn with_relax(mut self, relax: Duration) -> Self {
    self.relax = relax;
    self
  }
}

impl Default for ArbiterConfig {
  fn default() -> Self {
    ArbiterConfig::new()
  }
}
