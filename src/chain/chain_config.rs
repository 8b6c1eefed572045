// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::{decode_hex_array, Hash256, PubKey};
use std::collections::BTreeMap;

const MAINNET_GENESIS: Hash256 =
    Hash256::from_hex_const("000000003c38123a8a6b19df6742e0a529b9306e9233067dbcbc06d2d5cebf0d");
const MAINNET_GENESIS_TIME: i64 = 1_667_260_800;

const TESTNET_GENESIS: Hash256 =
    Hash256::from_hex_const("0000000017ce3fa68ee5b9c8467fdda8393c1d7539a0f7356d5a5a97c722acad");
const TESTNET_GENESIS_TIME: i64 = 1_667_347_200;

/// Hardened checkpoints. Blocks at these heights must have these hashes.
const MAINNET_CHECKPOINTS: &[(u64, Hash256)] = &[
    (0, MAINNET_GENESIS),
    (
        2000,
        Hash256::from_hex_const("00000000f2ba6758a5bc2e0a33de8e26ada2faf7b362ef26ec493c1fd55792a2"),
    ),
    (
        10000,
        Hash256::from_hex_const("000000005f1d72a09ac115c6e63e8874d5e5b746501adb1f87be4153dff35160"),
    ),
    (
        25000,
        Hash256::from_hex_const("0000000061bf2e62e075a762b644a16b87bf90c9136452b541aa8e2074f360cf"),
    ),
    (
        42000,
        Hash256::from_hex_const("000000009b2d2e96b8793b91bee0d6d9742f0987d9811dd5ce4b2ddde051d858"),
    ),
];

const TESTNET_CHECKPOINTS: &[(u64, Hash256)] = &[
    (0, TESTNET_GENESIS),
    (
        500,
        Hash256::from_hex_const("0000000044e7c288f5a44e638bc8f1b4c906cfa5aacf7d056248967426ce9afe"),
    ),
    (
        2500,
        Hash256::from_hex_const("00000000c2c4694884fa16b7c3d3ea1e876892608731bed6a58a2c7f403a12aa"),
    ),
];

/// Public key that signs synchronized checkpoints on mainnet
const MAINNET_MASTER_PUBKEY: [u8; 65] = decode_hex_array(
    "04fc9702847840aaf195de8442ebecedf5b095cdbb9bc716bda9110971b28a49e0ead8564ff0db22209e0374782c093bb899692d524e9d6a6956e7c5ecbcd68284",
);

/// Public key that signs synchronized checkpoints on testnet
const TESTNET_MASTER_PUBKEY: [u8; 65] = decode_hex_array(
    "04302390343f91cc401d56d68b123028bf52e5fca1939df127f63c6467cdf9c8e2c14b61104cf817d0b780da337893ecc4aaff1309e536162dabbdb45200ca2b0a",
);

/// Network wide parameters of the checkpoint subsystem
#[derive(Debug, Clone)]
pub struct ChainConfig {
    network_name: &'static str,
    genesis_hash: Hash256,
    genesis_time: i64,
    checkpoints: BTreeMap<u64, Hash256>,
    master_pubkey: PubKey,
    enforce_sync_checkpoints: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self::new("testnet")
    }
}

impl ChainConfig {
    /// `"mainnet"` selects mainnet parameters, every other name selects
    /// testnet parameters under that name.
    #[must_use]
    pub fn new(network_name: &'static str) -> Self {
        let is_mainnet = network_name == "mainnet";
        let (genesis_hash, genesis_time, checkpoints, master_pubkey) = if is_mainnet {
            (
                MAINNET_GENESIS,
                MAINNET_GENESIS_TIME,
                MAINNET_CHECKPOINTS,
                &MAINNET_MASTER_PUBKEY,
            )
        } else {
            (
                TESTNET_GENESIS,
                TESTNET_GENESIS_TIME,
                TESTNET_CHECKPOINTS,
                &TESTNET_MASTER_PUBKEY,
            )
        };

        Self {
            network_name,
            genesis_hash,
            genesis_time,
            checkpoints: checkpoints.iter().copied().collect(),
            master_pubkey: PubKey::from_slice(master_pubkey),
            enforce_sync_checkpoints: is_mainnet,
        }
    }

    /// Replaces the genesis block
    #[must_use]
    pub fn with_genesis(mut self, hash: Hash256, time: i64) -> Self {
        self.genesis_hash = hash;
        self.genesis_time = time;
        self
    }

    /// Replaces the hardened checkpoint table
    #[must_use]
    pub fn with_checkpoints<I>(mut self, checkpoints: I) -> Self
    where
        I: IntoIterator<Item = (u64, Hash256)>,
    {
        self.checkpoints = checkpoints.into_iter().collect();
        self
    }

    /// Replaces the key synchronized checkpoints are verified against
    #[must_use]
    pub fn with_master_pubkey(mut self, pubkey: PubKey) -> Self {
        self.master_pubkey = pubkey;
        self
    }

    #[must_use]
    pub fn with_sync_checkpoint_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_sync_checkpoints = enforce;
        self
    }

    #[must_use]
    pub fn network_name(&self) -> &'static str {
        self.network_name
    }

    #[must_use]
    pub fn is_testnet(&self) -> bool {
        self.network_name != "mainnet"
    }

    #[must_use]
    pub fn genesis_hash(&self) -> Hash256 {
        self.genesis_hash
    }

    #[must_use]
    pub fn genesis_time(&self) -> i64 {
        self.genesis_time
    }

    #[must_use]
    pub fn checkpoints(&self) -> &BTreeMap<u64, Hash256> {
        &self.checkpoints
    }

    #[must_use]
    pub fn master_pubkey(&self) -> &PubKey {
        &self.master_pubkey
    }

    /// Whether blocks conflicting with the synchronized checkpoint are
    /// rejected. Disabled on test networks.
    #[must_use]
    pub fn enforce_sync_checkpoints(&self) -> bool {
        self.enforce_sync_checkpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_selects_network_parameters() {
        let mainnet = ChainConfig::new("mainnet");
        assert!(!mainnet.is_testnet());
        assert!(mainnet.enforce_sync_checkpoints());
        assert_eq!(mainnet.checkpoints().get(&0), Some(&mainnet.genesis_hash()));
        assert!(mainnet.master_pubkey().is_valid());
        assert!(!mainnet.master_pubkey().is_compressed());

        let testnet = ChainConfig::new("testnet");
        assert!(testnet.is_testnet());
        assert!(!testnet.enforce_sync_checkpoints());
        assert_ne!(testnet.genesis_hash(), mainnet.genesis_hash());

        let devnet = ChainConfig::new("devnet");
        assert_eq!(devnet.network_name(), "devnet");
        assert_eq!(devnet.genesis_hash(), testnet.genesis_hash());
    }

    #[test]
    fn builders_replace_parameters() {
        let hash = Hash256::hash_from_slice(b"block");
        let config = ChainConfig::new("mainnet")
            .with_genesis(hash, 42)
            .with_checkpoints([(0, hash)])
            .with_sync_checkpoint_enforcement(false);

        assert_eq!(config.genesis_hash(), hash);
        assert_eq!(config.genesis_time(), 42);
        assert_eq!(config.checkpoints().len(), 1);
        assert!(!config.enforce_sync_checkpoints());
    }
}
