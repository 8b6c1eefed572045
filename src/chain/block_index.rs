// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::checkpoints::total_blocks_estimate;
use crate::chain::ChainConfig;
use crate::consensus::MAX_TIP_AGE;
use crate::primitives::Hash256;
use log::*;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIndexErr {
    /// A `prev` link points to a block that is not indexed
    CorruptIndex,

    /// The requested block is not indexed
    UnknownBlock,

    /// The block is already indexed
    DuplicateBlock,

    /// The requested height is above the block
    InvalidHeight,
}

/// Block metadata. Links to other blocks are hashes into the owning
/// [`BlockIndex`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockIndexEntry {
    pub hash: Hash256,
    pub height: u64,
    pub time: i64,
    pub prev: Option<Hash256>,

    /// Successor on the main chain, `None` off the main chain and at the tip
    pub next: Option<Hash256>,
}

/// Hash keyed arena of every known block plus the orphan map.
#[derive(Debug, Clone)]
pub struct BlockIndex {
    entries: HashMap<Hash256, BlockIndexEntry>,
    orphans: HashMap<Hash256, Hash256>,
    genesis: Hash256,
    best: Hash256,
}

impl BlockIndex {
    #[must_use]
    pub fn with_genesis(hash: Hash256, time: i64) -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            hash,
            BlockIndexEntry {
                hash,
                height: 0,
                time,
                prev: None,
                next: None,
            },
        );

        Self {
            entries,
            orphans: HashMap::new(),
            genesis: hash,
            best: hash,
        }
    }

    #[must_use]
    pub fn from_config(config: &ChainConfig) -> Self {
        Self::with_genesis(config.genesis_hash(), config.genesis_time())
    }

    /// Indexes a block whose parent is known. The best chain is not changed.
    pub fn insert(
        &mut self,
        hash: Hash256,
        prev: Hash256,
        time: i64,
    ) -> Result<&BlockIndexEntry, BlockIndexErr> {
        if self.entries.contains_key(&hash) {
            return Err(BlockIndexErr::DuplicateBlock);
        }

        let height = self.get(&prev).ok_or(BlockIndexErr::UnknownBlock)?.height + 1;
        self.orphans.remove(&hash);

        Ok(self.entries.entry(hash).or_insert(BlockIndexEntry {
            hash,
            height,
            time,
            prev: Some(prev),
            next: None,
        }))
    }

    #[must_use]
    pub fn get(&self, hash: &Hash256) -> Option<&BlockIndexEntry> {
        self.entries.get(hash)
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash256) -> bool {
        self.entries.contains_key(hash)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn genesis(&self) -> &BlockIndexEntry {
        &self.entries[&self.genesis]
    }

    #[must_use]
    pub fn best(&self) -> &BlockIndexEntry {
        &self.entries[&self.best]
    }

    #[must_use]
    pub fn best_height(&self) -> u64 {
        self.best().height
    }

    /// Parent of `entry`. Fails with `CorruptIndex` if the link is broken or
    /// `entry` is the genesis block.
    pub fn prev_of(&self, entry: &BlockIndexEntry) -> Result<&BlockIndexEntry, BlockIndexErr> {
        entry
            .prev
            .and_then(|prev| self.entries.get(&prev))
            .ok_or(BlockIndexErr::CorruptIndex)
    }

    /// Walks `prev` links from `hash` down to `height`.
    pub fn ancestor_at_height(
        &self,
        hash: &Hash256,
        height: u64,
    ) -> Result<&BlockIndexEntry, BlockIndexErr> {
        let mut entry = self.get(hash).ok_or(BlockIndexErr::UnknownBlock)?;

        if height > entry.height {
            return Err(BlockIndexErr::InvalidHeight);
        }

        while entry.height > height {
            entry = self.prev_of(entry)?;
        }

        Ok(entry)
    }

    #[must_use]
    pub fn is_in_main_chain(&self, hash: &Hash256) -> bool {
        self.get(hash)
            .map_or(false, |entry| entry.next.is_some() || entry.hash == self.best)
    }

    /// Makes `hash` the tip, relinking `next` pointers from the fork point.
    pub fn set_best_chain(&mut self, hash: &Hash256) -> Result<(), BlockIndexErr> {
        if !self.contains(hash) {
            return Err(BlockIndexErr::UnknownBlock);
        }

        let mut path = vec![];
        let mut cursor = *hash;

        while !self.is_in_main_chain(&cursor) {
            path.push(cursor);
            cursor = self
                .get(&cursor)
                .and_then(|entry| entry.prev)
                .ok_or(BlockIndexErr::CorruptIndex)?;
        }

        let fork = cursor;
        let mut old = self.best;

        while old != fork {
            let entry = self
                .entries
                .get_mut(&old)
                .ok_or(BlockIndexErr::CorruptIndex)?;
            entry.next = None;
            old = entry.prev.ok_or(BlockIndexErr::CorruptIndex)?;
        }

        let mut parent = fork;
        self.entries
            .get_mut(&parent)
            .ok_or(BlockIndexErr::CorruptIndex)?
            .next = None;

        for child in path.iter().rev() {
            self.entries
                .get_mut(&parent)
                .ok_or(BlockIndexErr::CorruptIndex)?
                .next = Some(*child);
            parent = *child;
        }

        if !path.is_empty() {
            debug!(
                "Reorganized {} blocks, new best block {} at height {}",
                path.len(),
                hash,
                self.entries[hash].height
            );
        }

        self.best = *hash;
        Ok(())
    }

    /// Records a block whose parent is not yet known.
    pub fn add_orphan(&mut self, hash: Hash256, prev: Hash256) {
        if !self.entries.contains_key(&hash) {
            self.orphans.insert(hash, prev);
        }
    }

    #[must_use]
    pub fn is_orphan(&self, hash: &Hash256) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Oldest orphan in the chain of orphans ending at `hash`. Returns `hash`
    /// itself when it is not an orphan.
    #[must_use]
    pub fn orphan_root(&self, hash: &Hash256) -> Hash256 {
        let mut root = *hash;

        while let Some(prev) = self.orphans.get(&root) {
            if !self.orphans.contains_key(prev) {
                break;
            }

            root = *prev;
        }

        root
    }

    /// Missing parent the orphan chain ending at `hash` is waiting for
    #[must_use]
    pub fn wanted_by_orphan(&self, hash: &Hash256) -> Option<Hash256> {
        self.orphans.get(&self.orphan_root(hash)).copied()
    }

    /// True while the tip is below the last hardened checkpoint or older
    /// than `MAX_TIP_AGE`.
    #[must_use]
    pub fn is_initial_block_download(&self, config: &ChainConfig, now: i64) -> bool {
        let best = self.best();
        best.height < total_blocks_estimate(config) || best.time < now - MAX_TIP_AGE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStateErr {
    /// Block index error
    BlockIndex(BlockIndexErr),

    /// The chain rejected the new tip
    Rejected(&'static str),
}

impl From<BlockIndexErr> for ChainStateErr {
    fn from(other: BlockIndexErr) -> Self {
        Self::BlockIndex(other)
    }
}

/// Chain the checkpoint manager reads and reorganizes. Callers hold their
/// chain lock for as long as they lend it out.
pub trait ChainState {
    fn block_index(&self) -> &BlockIndex;

    /// Makes `hash` the tip of the best chain
    fn set_best_chain(&mut self, hash: &Hash256) -> Result<(), ChainStateErr>;
}

impl ChainState for BlockIndex {
    fn block_index(&self) -> &BlockIndex {
        self
    }

    fn set_best_chain(&mut self, hash: &Hash256) -> Result<(), ChainStateErr> {
        BlockIndex::set_best_chain(self, hash)?;
        Ok(())
    }
}
