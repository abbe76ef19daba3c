/***********************************************************************************************************************
 * Copyright (c) 2020 by the authors
 *
 * Author: André Borrmann <pspwizard@gmx.de>
 * License: Apache License 2.0 / MIT
 **********************************************************************************************************************/

//! # Sync Locking
//!
//! In-process locking used for the arbiter bookkeeping.

mod mutex;
#[doc(inline)]
pub use mutex::*;
