/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Async Locking
//!
//! Adds [Arbiter::acquire_async](crate::Arbiter::acquire_async) and
//! [Session::lock_async](crate::Session::lock_async).

mod acquire;
