use crate::{ColumnIter, ColumnKeyIter, DBColumn, Error, KeyValueStore, KeyValueStoreOp, get_key_for_col};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

type DBMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// A thread-safe `BTreeMap` wrapper, used by tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    db: RwLock<DBMap>,
    transaction_mutex: Mutex<()>,
}

impl MemoryStore {
    /// Create a new, empty database.
    pub fn open() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        let column_key = get_key_for_col(column, key);
        Ok(self.db.read().get(&column_key).cloned())
    }

    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        let column_key = get_key_for_col(column, key);
        self.db.write().insert(column_key, value.to_vec());
        Ok(())
    }

    fn put_bytes_sync(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.put_bytes(column, key, value)
    }

    fn sync(&self) -> Result<(), Error> {
        // Our in-memory database is always synced.
        Ok(())
    }

    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error> {
        let column_key = get_key_for_col(column, key);
        Ok(self.db.read().contains_key(&column_key))
    }

    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error> {
        let column_key = get_key_for_col(column, key);
        self.db.write().remove(&column_key);
        Ok(())
    }

    fn do_atomically(&self, batch: Vec<KeyValueStoreOp>) -> Result<(), Error> {
        let _guard = self.transaction_mutex.lock();
        let mut db = self.db.write();
        for op in batch {
            match op {
                KeyValueStoreOp::PutKeyValue(column, key, value) => {
                    db.insert(get_key_for_col(column, &key), value);
                }
                KeyValueStoreOp::DeleteKey(column, key) => {
                    db.remove(&get_key_for_col(column, &key));
                }
            }
        }
        Ok(())
    }

    fn iter_column_from(&self, column: DBColumn, from: &[u8], prefix: &[u8]) -> ColumnIter<'_, Vec<u8>> {
        let start_key = get_key_for_col(column, from);
        let column_prefix = get_key_for_col(column, prefix);
        let pairs = self
            .db
            .read()
            .range(start_key..)
            .take_while(|(key, _)| key.starts_with(&column_prefix))
            .map(|(key, value)| Ok((key[column.as_bytes().len()..].to_vec(), value.clone())))
            .collect::<Vec<_>>();
        Box::new(pairs.into_iter())
    }

    fn iter_column_keys(&self, column: DBColumn) -> ColumnKeyIter<'_, Vec<u8>> {
        Box::new(
            self.iter_column(column)
                .map(|result| result.map(|(key, _)| key)),
        )
    }

    fn compact_column(&self, _column: DBColumn) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryStore::open();
        store
            .put_bytes(DBColumn::BeaconBlock, &[1], &[10, 20])
            .unwrap();
        assert_eq!(
            store.get_bytes(DBColumn::BeaconBlock, &[1]).unwrap(),
            Some(vec![10, 20])
        );
        // A different column does not see the key.
        assert_eq!(store.get_bytes(DBColumn::BeaconState, &[1]).unwrap(), None);

        store.key_delete(DBColumn::BeaconBlock, &[1]).unwrap();
        assert_eq!(store.get_bytes(DBColumn::BeaconBlock, &[1]).unwrap(), None);
    }

    #[test]
    fn prefix_iteration_is_inclusive_of_bounds() {
        let store = MemoryStore::open();
        // Composite keys: prefix `[7]` with subkeys 0, 1, 255.
        for index in [0u8, 1, 255] {
            store
                .put_bytes(DBColumn::BeaconDataColumn, &[7, index], &[index])
                .unwrap();
        }
        // Another prefix that must not be visited.
        store
            .put_bytes(DBColumn::BeaconDataColumn, &[8, 0], &[9])
            .unwrap();

        let collected: Vec<_> = store
            .iter_column_from(DBColumn::BeaconDataColumn, &[7, 0], &[7])
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            collected,
            vec![
                (vec![7, 0], vec![0]),
                (vec![7, 1], vec![1]),
                (vec![7, 255], vec![255]),
            ]
        );
    }

    #[test]
    fn atomic_batch_applies_all_ops() {
        let store = MemoryStore::open();
        store.put_bytes(DBColumn::BeaconBlock, &[1], &[1]).unwrap();
        store
            .do_atomically(vec![
                KeyValueStoreOp::PutKeyValue(DBColumn::BeaconBlock, vec![2], vec![2]),
                KeyValueStoreOp::DeleteKey(DBColumn::BeaconBlock, vec![1]),
            ])
            .unwrap();
        assert_eq!(store.get_bytes(DBColumn::BeaconBlock, &[1]).unwrap(), None);
        assert_eq!(
            store.get_bytes(DBColumn::BeaconBlock, &[2]).unwrap(),
            Some(vec![2])
        );
    }
}
