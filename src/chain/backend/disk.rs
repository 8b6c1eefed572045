// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::chain::{BackendErr, CheckpointBackend};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamilyDescriptor, LogLevel, MultiThreaded, Options, TransactionDB,
    TransactionDBOptions, WriteBatchWithTransaction,
};
use std::path::PathBuf;
use std::sync::Arc;

pub type DB = TransactionDB<MultiThreaded>;
pub type WriteBatch = WriteBatchWithTransaction<true>;

pub const CHECKPOINTS_CF: &str = "checkpoints";

/// RocksDB checkpoint store. Staged writes go into a single write batch that
/// is applied atomically on commit.
pub struct DiskBackend {
    db: Arc<DB>,
    batch: Mutex<Option<WriteBatch>>,
}

impl DiskBackend {
    #[must_use]
    pub fn new(db: Arc<DB>) -> Self {
        Self {
            db,
            batch: Mutex::new(None),
        }
    }
}

impl CheckpointBackend for DiskBackend {
    fn txn_begin(&self) -> Result<(), BackendErr> {
        let mut batch = self.batch.lock();

        if batch.is_some() {
            return Err(BackendErr::TransactionInProgress);
        }

        *batch = Some(WriteBatch::default());
        Ok(())
    }

    fn txn_commit(&self) -> Result<(), BackendErr> {
        let batch = self.batch.lock().take().ok_or(BackendErr::NoTransaction)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn txn_abort(&self) -> Result<(), BackendErr> {
        self.batch
            .lock()
            .take()
            .map(|_| ())
            .ok_or(BackendErr::NoTransaction)
    }

    fn write_key_val(&self, key: &[u8], val: Vec<u8>) -> Result<(), BackendErr> {
        let cf = self
            .db
            .cf_handle(CHECKPOINTS_CF)
            .ok_or(BackendErr::CorruptData)?;
        let mut batch = self.batch.lock();
        let batch = batch.as_mut().ok_or(BackendErr::NoTransaction)?;
        batch.put_cf(&cf, key, val);
        Ok(())
    }

    fn get_val(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendErr> {
        let cf = self
            .db
            .cf_handle(CHECKPOINTS_CF)
            .ok_or(BackendErr::CorruptData)?;
        Ok(self.db.get_cf(&cf, key)?)
    }
}

/// Opens the checkpoint database under `<data_dir>/<network_name>/data`
pub fn create_rocksdb_backend(data_dir: &str, network_name: &str) -> Result<Arc<DB>, BackendErr> {
    #[cfg(not(test))]
    let mut path = PathBuf::from(data_dir);

    #[cfg(test)]
    let mut path = {
        use rand::Rng;
        let mut path = std::env::temp_dir();
        path.push(hex::encode(rand::thread_rng().gen::<[u8; 32]>()));
        path.push("Stakecoin");
        path
    };

    path.push(network_name);
    path.push("data");

    let mut cf_opts = Options::default();
    cf_opts.set_max_write_buffer_number(3);
    let cfs = vec![ColumnFamilyDescriptor::new(CHECKPOINTS_CF, cf_opts)];

    let mut db_opts = Options::default();
    db_opts.create_missing_column_families(true);
    db_opts.create_if_missing(true);
    db_opts.set_log_level(LogLevel::Warn);
    db_opts.set_keep_log_file_num(1);
    let db = DB::open_cf_descriptors(&db_opts, &TransactionDBOptions::default(), path, cfs)?;
    Ok(Arc::new(db))
}
