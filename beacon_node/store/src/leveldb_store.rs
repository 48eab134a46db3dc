use crate::{
    ColumnIter, ColumnKeyIter, DBColumn, Error, KeyValueStore, KeyValueStoreOp, get_key_for_col,
    metrics,
};
use leveldb::{
    compaction::Compaction,
    database::{
        Database,
        batch::{Batch, Writebatch},
        kv::KV,
    },
    iterator::{Iterable, LevelDBIterator},
    options::{Options, ReadOptions, WriteOptions},
};
use std::marker::PhantomData;
use std::path::Path;

/// A LevelDB-backed key-value store.
pub struct LevelDB {
    db: Database<BytesKey>,
    /// A mutex to synchronise sensitive read-write transactions.
    transaction_mutex: parking_lot::Mutex<()>,
    _phantom: PhantomData<()>,
}

impl LevelDB {
    /// Open a database at `path`, creating it if it does not exist.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut options = Options::new();
        options.create_if_missing = true;

        let db = Database::open(path, options).map_err(|e| Error::DBError {
            message: format!("{:?}", e),
        })?;

        Ok(Self {
            db,
            transaction_mutex: parking_lot::Mutex::new(()),
            _phantom: PhantomData,
        })
    }

    fn read_options(&self) -> ReadOptions<'_, BytesKey> {
        ReadOptions::new()
    }

    fn write_options(&self) -> WriteOptions {
        WriteOptions::new()
    }

    fn write_options_sync(&self) -> WriteOptions {
        let mut opts = WriteOptions::new();
        opts.sync = true;
        opts
    }

    fn put_bytes_with_options(
        &self,
        column: DBColumn,
        key: &[u8],
        value: &[u8],
        opts: WriteOptions,
    ) -> Result<(), Error> {
        let column_key = get_key_for_col(column, key);

        metrics::inc_counter_vec(&metrics::DISK_DB_WRITE_COUNT, &[column.as_str()]);
        metrics::inc_counter_vec_by(
            &metrics::DISK_DB_WRITE_BYTES,
            &[column.as_str()],
            value.len() as u64,
        );
        let timer = metrics::start_timer(&metrics::DISK_DB_WRITE_TIMES);

        self.db
            .put(opts, BytesKey::from_vec(column_key), value)
            .map_err(|e| Error::DBError {
                message: format!("{:?}", e),
            })?;

        drop(timer);
        Ok(())
    }
}

impl KeyValueStore for LevelDB {
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let column_key = get_key_for_col(column, key);

        metrics::inc_counter_vec(&metrics::DISK_DB_READ_COUNT, &[column.as_str()]);
        let timer = metrics::start_timer(&metrics::DISK_DB_READ_TIMES);

        let result = self
            .db
            .get(self.read_options(), BytesKey::from_vec(column_key))
            .map_err(|e| Error::DBError {
                message: format!("{:?}", e),
            })?;

        drop(timer);
        if let Some(bytes) = &result {
            metrics::inc_counter_vec_by(
                &metrics::DISK_DB_READ_BYTES,
                &[column.as_str()],
                bytes.len() as u64,
            );
        }
        Ok(result)
    }

    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.put_bytes_with_options(column, key, value, self.write_options())
    }

    fn put_bytes_sync(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.put_bytes_with_options(column, key, value, self.write_options_sync())
    }

    fn sync(&self) -> Result<(), Error> {
        // Writing a dummy key with sync-options forces previous writes to disk.
        self.put_bytes_sync(DBColumn::BeaconMeta, b"sync", b"sync")
    }

    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error> {
        self.get_bytes(column, key).map(|opt| opt.is_some())
    }

    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error> {
        let column_key = get_key_for_col(column, key);
        metrics::inc_counter_vec(&metrics::DISK_DB_DELETE_COUNT, &[column.as_str()]);
        self.db
            .delete(self.write_options(), BytesKey::from_vec(column_key))
            .map_err(|e| Error::DBError {
                message: format!("{:?}", e),
            })
    }

    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        let _guard = self.transaction_mutex.lock();
        let mut leveldb_batch = Writebatch::new();
        for op in batch {
            match op {
                KeyValueStoreOp::PutKeyValue(column, key, value) => {
                    let column_key = get_key_for_col(column, &key);
                    metrics::inc_counter_vec(&metrics::DISK_DB_WRITE_COUNT, &[column.as_str()]);
                    leveldb_batch.put(BytesKey::from_vec(column_key), &value);
                }
                KeyValueStoreOp::DeleteKey(column, key) => {
                    let column_key = get_key_for_col(column, &key);
                    metrics::inc_counter_vec(&metrics::DISK_DB_DELETE_COUNT, &[column.as_str()]);
                    leveldb_batch.delete(BytesKey::from_vec(column_key));
                }
            }
        }
        self.db
            .write(self.write_options(), &leveldb_batch)
            .map_err(|e| Error::DBError {
                message: format!("{:?}", e),
            })
    }

    fn iter_column_from(&self, column: DBColumn, from: &[u8], prefix: &[u8]) -> ColumnIter<'_, Vec<u8>> {
        let start_key = BytesKey::from_vec(get_key_for_col(column, from));
        let column_prefix = get_key_for_col(column, prefix);

        let iter = self.db.iter(self.read_options());
        iter.seek(&start_key);

        Box::new(
            iter.take_while(move |(key, _)| key.key.starts_with(&column_prefix))
                .map(move |(key, value)| {
                    let subkey = key
                        .key
                        .get(column.as_bytes().len()..)
                        .ok_or(Error::InvalidKey)?;
                    Ok((subkey.to_vec(), value))
                }),
        )
    }

    fn iter_column_keys(&self, column: DBColumn) -> ColumnKeyIter<'_, Vec<u8>> {
        let start_key = BytesKey::from_vec(get_key_for_col(column, &[]));
        let column_prefix = get_key_for_col(column, &[]);

        let iter = self.db.keys_iter(self.read_options());
        iter.seek(&start_key);

        Box::new(
            iter.take_while(move |key| key.key.starts_with(&column_prefix))
                .map(move |key| {
                    let subkey = key
                        .key
                        .get(column.as_bytes().len()..)
                        .ok_or(Error::InvalidKey)?;
                    Ok(subkey.to_vec())
                }),
        )
    }

    fn compact_column(&self, column: DBColumn) -> Result<(), Error> {
        // Use key-size-agnostic keys [col, 0...] and [col, 255..] applied to all column names.
        let start_key = BytesKey::from_vec(get_key_for_col(column, &[0; 32]));
        let end_key = BytesKey::from_vec(get_key_for_col(column, &[255; 48]));
        self.db.compact(&start_key, &end_key);
        Ok(())
    }
}

/// Used for keying leveldb.
#[derive(Debug, PartialEq)]
pub struct BytesKey {
    key: Vec<u8>,
}

impl db_key::Key for BytesKey {
    fn from_u8(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    fn as_slice<T, F: Fn(&[u8]) -> T>(&self, f: F) -> T {
        f(self.key.as_slice())
    }
}

impl BytesKey {
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.key.starts_with(&prefix.key)
    }

    pub fn from_vec(key: Vec<u8>) -> Self {
        Self { key }
    }
}
