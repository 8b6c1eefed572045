// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

pub mod backend;
pub mod block_index;
pub mod chain_config;
pub mod checkpoints;
pub mod sync_checkpoint;

pub use backend::*;
pub use block_index::*;
pub use chain_config::*;
pub use checkpoints::*;
pub use sync_checkpoint::*;
