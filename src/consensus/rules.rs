// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use static_assertions::*;

/// Target time between blocks, in seconds
pub const TARGET_SPACING: i64 = 30;

/// Coinbase and coinstake outputs can only be spent after `n` confirmations
pub const COINBASE_MATURITY: u64 = 100;

/// Minimum age of a coin before it can stake, in seconds
pub const STAKE_MIN_AGE: i64 = 60 * 60 * 8;

/// Auto-selected checkpoints lag the tip by at least `n` blocks. Twice the
/// coinbase maturity so that a checkpointed block is always mature.
pub const CHECKPOINT_SPAN: u64 = COINBASE_MATURITY * 2;

/// Auto-selected checkpoints lag the tip by at least `n` seconds
pub const CHECKPOINT_MAX_SPAN: i64 = CHECKPOINT_SPAN as i64 * TARGET_SPACING;

/// A synchronized checkpoint older than `n` seconds raises a warning
pub const CHECKPOINT_TOO_OLD_SECS: i64 = 60 * 60 * 24 * 10;

/// Version written into new synchronized checkpoint messages
pub const SYNC_CHECKPOINT_VERSION: i32 = 1;

/// The node is considered to be in initial block download while its tip is
/// older than `n` seconds
pub const MAX_TIP_AGE: i64 = 60 * 60 * 24;

const_assert!(TARGET_SPACING > 0);
const_assert!(COINBASE_MATURITY >= 20);
const_assert!(STAKE_MIN_AGE > 0);
const_assert_eq!(CHECKPOINT_SPAN, COINBASE_MATURITY * 2);
const_assert!(CHECKPOINT_MAX_SPAN > 0);
const_assert!(CHECKPOINT_TOO_OLD_SECS > MAX_TIP_AGE);
const_assert!(SYNC_CHECKPOINT_VERSION >= 1);
