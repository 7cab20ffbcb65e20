//! File-backed address pool
//!
//! `emails.json` holds a flat list of `{address, status}` records (older
//! `{address, is_used}` files are read too). Every mutation rewrites the
//! whole file atomically.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;

use crate::models::{AddressRecord, AddressStatus, normalize_address};

/// Address pool failures
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no available addresses left in the pool")]
    Exhausted,
    #[error("address not in pool: {0}")]
    NotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Pool of pre-provisioned addresses persisted to a JSON file
///
/// The mutex serializes read-modify-write cycles within this process.
pub struct FileAddressPool {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileAddressPool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records; a missing file reads as an empty pool
    pub fn list(&self) -> Result<Vec<AddressRecord>, PoolError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_records()
    }

    /// Addresses currently handed out
    pub fn assigned(&self) -> Result<Vec<String>, PoolError> {
        Ok(self
            .list()?
            .into_iter()
            .filter(AddressRecord::is_active)
            .map(|record| record.address)
            .collect())
    }

    /// Hand out the first available address and persist it as assigned
    pub fn assign_next(&self) -> Result<String, PoolError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.read_records()?;

        let record = records
            .iter_mut()
            .find(|r| r.status == AddressStatus::Available)
            .ok_or(PoolError::Exhausted)?;
        record.status = AddressStatus::Assigned;
        let address = record.address.clone();

        self.write_records(&records)?;
        log::info!("Assigned address {}", address);
        Ok(address)
    }

    /// Mark an address retired
    ///
    /// Returns `false` when it was already retired (nothing written).
    pub fn retire(&self, address: &str) -> Result<bool, PoolError> {
        let key = normalize_address(address);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.read_records()?;

        let record = records
            .iter_mut()
            .find(|r| normalize_address(&r.address) == key)
            .ok_or_else(|| PoolError::NotFound(key.clone()))?;

        if record.status == AddressStatus::Retired {
            return Ok(false);
        }
        record.status = AddressStatus::Retired;

        self.write_records(&records)?;
        log::info!("Retired address {}", key);
        Ok(true)
    }

    /// Append `count` fresh addresses `<prefix><n>@<domain>`
    ///
    /// Numbering continues after the highest existing suffix for the same
    /// prefix and domain, so seeding twice never produces duplicates.
    pub fn seed(&self, prefix: &str, domain: &str, count: usize) -> Result<Vec<String>, PoolError> {
        let prefix = prefix.trim().to_ascii_lowercase();
        let domain = domain.trim().trim_start_matches('@').to_ascii_lowercase();
        if prefix.is_empty() || domain.is_empty() {
            return Err(PoolError::Storage(anyhow::anyhow!(
                "prefix and domain must not be empty"
            )));
        }

        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.read_records()?;

        let suffix = format!("@{}", domain);
        let start = records
            .iter()
            .filter_map(|r| {
                r.address
                    .strip_suffix(&suffix)?
                    .strip_prefix(&prefix)?
                    .parse::<usize>()
                    .ok()
            })
            .max()
            .map_or(1, |n| n + 1);

        let added: Vec<String> = (start..start + count)
            .map(|n| format!("{}{}{}", prefix, n, suffix))
            .collect();
        records.extend(added.iter().map(|a| AddressRecord::available(a)));

        self.write_records(&records)?;
        log::info!("Seeded {} addresses into {}", added.len(), self.path.display());
        Ok(added)
    }

    fn read_records(&self) -> Result<Vec<AddressRecord>, PoolError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let records = config::load_json_file(&self.path)
            .with_context(|| format!("Failed to read address pool {}", self.path.display()))?;
        Ok(records)
    }

    fn write_records(&self, records: &[AddressRecord]) -> Result<(), PoolError> {
        config::save_json_file(&self.path, &records)
            .with_context(|| format!("Failed to write address pool {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with(json: &str) -> (tempfile::TempDir, FileAddressPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emails.json");
        std::fs::write(&path, json).unwrap();
        (dir, FileAddressPool::new(path))
    }

    #[test]
    fn test_missing_file_is_empty_pool() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FileAddressPool::new(dir.path().join("emails.json"));

        assert!(pool.list().unwrap().is_empty());
        assert!(matches!(pool.assign_next(), Err(PoolError::Exhausted)));
    }

    #[test]
    fn test_assign_next_in_order() {
        let (_dir, pool) = pool_with(
            r#"[
                {"address": "a@test.com", "status": "retired"},
                {"address": "b@test.com", "status": "available"},
                {"address": "c@test.com", "status": "available"}
            ]"#,
        );

        assert_eq!(pool.assign_next().unwrap(), "b@test.com");
        assert_eq!(pool.assign_next().unwrap(), "c@test.com");
        assert!(matches!(pool.assign_next(), Err(PoolError::Exhausted)));
        assert_eq!(pool.assigned().unwrap(), vec!["b@test.com", "c@test.com"]);
    }

    #[test]
    fn test_assignment_is_persisted() {
        let (dir, pool) = pool_with(r#"[{"address": "a@test.com", "status": "available"}]"#);
        pool.assign_next().unwrap();

        let reopened = FileAddressPool::new(dir.path().join("emails.json"));
        let records = reopened.list().unwrap();
        assert_eq!(records[0].status, AddressStatus::Assigned);
    }

    #[test]
    fn test_retire() {
        let (_dir, pool) = pool_with(r#"[{"address": "a@test.com", "status": "assigned"}]"#);

        assert!(pool.retire("A@Test.com").unwrap());
        assert!(!pool.retire("a@test.com").unwrap());
        assert!(pool.assigned().unwrap().is_empty());
        assert!(matches!(
            pool.retire("missing@test.com"),
            Err(PoolError::NotFound(_))
        ));
    }

    #[test]
    fn test_retired_is_never_reassigned() {
        let (_dir, pool) = pool_with(r#"[{"address": "a@test.com", "status": "available"}]"#);
        pool.retire("a@test.com").unwrap();
        assert!(matches!(pool.assign_next(), Err(PoolError::Exhausted)));
    }

    #[test]
    fn test_seed_continues_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FileAddressPool::new(dir.path().join("emails.json"));

        let first = pool.seed("Box", "@Test.com", 2).unwrap();
        assert_eq!(first, vec!["box1@test.com", "box2@test.com"]);

        let second = pool.seed("box", "test.com", 1).unwrap();
        assert_eq!(second, vec!["box3@test.com"]);

        assert_eq!(pool.list().unwrap().len(), 3);
        assert!(pool.seed("", "test.com", 1).is_err());
    }

    #[test]
    fn test_legacy_pool_file() {
        let (dir, pool) = pool_with(
            r#"[
                {"address": "old1@test.com", "is_used": true},
                {"address": "old2@test.com", "is_used": false},
                {"address": "old3@test.com", "is_used": true}
            ]"#,
        );

        assert_eq!(pool.list().unwrap().len(), 3);
        assert_eq!(
            pool.assigned().unwrap(),
            vec!["old1@test.com", "old3@test.com"]
        );

        let inboxes = crate::storage::InboxStore::new();
        let assigned = pool.assigned().unwrap();
        assert_eq!(inboxes.activate_all(assigned.iter().map(String::as_str)), 2);
        assert!(inboxes.is_active("old1@test.com"));
        assert!(!inboxes.is_active("old2@test.com"));

        // the next write upgrades the file to the current shape
        assert_eq!(pool.assign_next().unwrap(), "old2@test.com");
        let raw = std::fs::read_to_string(dir.path().join("emails.json")).unwrap();
        assert!(raw.contains("\"status\""));
        assert!(!raw.contains("is_used"));
    }

    #[test]
    fn test_corrupt_pool_is_storage_error() {
        let (_dir, pool) = pool_with("{oops");
        assert!(matches!(pool.list(), Err(PoolError::Storage(_))));
    }
}
