// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

//! Hardened checkpoints compiled into the node.

use crate::chain::{BlockIndex, BlockIndexEntry, ChainConfig};
use crate::primitives::Hash256;

/// Returns false only if a hardened checkpoint exists at `height` and its
/// hash differs from `hash`.
#[must_use]
pub fn check_hardened(config: &ChainConfig, height: u64, hash: &Hash256) -> bool {
    config
        .checkpoints()
        .get(&height)
        .map_or(true, |expected| expected == hash)
}

/// Height of the last hardened checkpoint
#[must_use]
pub fn total_blocks_estimate(config: &ChainConfig) -> u64 {
    config
        .checkpoints()
        .keys()
        .next_back()
        .copied()
        .unwrap_or(0)
}

/// Latest hardened checkpoint present in the block index
#[must_use]
pub fn last_checkpoint<'a>(
    config: &ChainConfig,
    index: &'a BlockIndex,
) -> Option<&'a BlockIndexEntry> {
    config
        .checkpoints()
        .values()
        .rev()
        .find_map(|hash| index.get(hash))
}
