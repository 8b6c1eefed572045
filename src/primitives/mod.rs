// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

mod bignum;
mod common;
mod hash;
mod key;
mod secure;

pub use crate::primitives::bignum::*;
pub use crate::primitives::common::*;
pub use crate::primitives::hash::*;
pub use crate::primitives::key::*;
pub use crate::primitives::secure::*;
