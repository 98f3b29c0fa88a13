//! SQLite key-value snapshot store
//!
//! One row per account: `record_key = "{topLevelKey}:{account-path}"`,
//! value the full account record as JSON. A save replaces the whole
//! namespace inside a single transaction, which is this backend's
//! equivalent of the staging-namespace-plus-pointer-flip scheme.

use adbank_core::AccountKey;
use adbank_ledger::{Account, Accounts};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{PersistenceError, PersistenceResult};
use crate::BankerPersistence;

/// Snapshot store backed by a SQLite database
pub struct SqliteBankerPersistence {
    pool: SqlitePool,
}

impl SqliteBankerPersistence {
    /// Connect and initialize the schema.
    ///
    /// Snapshots are single-writer, so the pool holds one connection;
    /// this also keeps `sqlite::memory:` databases coherent.
    pub async fn connect(url: &str) -> PersistenceResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS banker_accounts (
                record_key TEXT PRIMARY KEY,
                account TEXT NOT NULL,
                saved_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        info!(url, "banker persistence connected");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn record_key(top_level_key: &str, key: &AccountKey) -> String {
        format!("{top_level_key}:{key}")
    }
}

#[async_trait]
impl BankerPersistence for SqliteBankerPersistence {
    async fn load_all(&self, top_level_key: &str) -> PersistenceResult<Accounts> {
        let prefix = format!("{top_level_key}:");
        let rows = sqlx::query(
            "SELECT record_key, account FROM banker_accounts WHERE record_key LIKE ?",
        )
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;

        let mut tree = BTreeMap::new();
        let mut offending = Vec::new();

        for row in rows {
            let record_key: String = row.get("record_key");
            let payload: String = row.get("account");

            let Some(path) = record_key.strip_prefix(&prefix) else {
                offending.push(record_key);
                continue;
            };
            let key: AccountKey = match path.parse() {
                Ok(key) => key,
                Err(_) => {
                    offending.push(record_key);
                    continue;
                }
            };
            let account: Account = match serde_json::from_str(&payload) {
                Ok(account) => account,
                Err(_) => {
                    offending.push(record_key);
                    continue;
                }
            };
            tree.insert(key, account);
        }

        if !offending.is_empty() {
            return Err(PersistenceError::DataInconsistency(offending));
        }

        let accounts = Accounts::from(tree);
        let violations = accounts.check_invariants();
        if !violations.is_empty() {
            return Err(PersistenceError::DataInconsistency(
                violations.iter().map(|k| k.to_string()).collect(),
            ));
        }

        debug!(
            namespace = top_level_key,
            accounts = accounts.len(),
            "registry loaded"
        );
        Ok(accounts)
    }

    async fn save_all(&self, top_level_key: &str, accounts: &Accounts) -> PersistenceResult<()> {
        // Atomic copy first; serialization and I/O happen off-lock.
        let snapshot = accounts.snapshot();

        let mut serialized = Vec::with_capacity(snapshot.len());
        for (key, account) in &snapshot {
            let payload = serde_json::to_string(account)
                .map_err(|e| PersistenceError::Backend(e.to_string()))?;
            serialized.push((Self::record_key(top_level_key, key), payload));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM banker_accounts WHERE record_key LIKE ?")
            .bind(format!("{top_level_key}:%"))
            .execute(&mut *tx)
            .await?;
        for (record_key, payload) in &serialized {
            sqlx::query(
                "INSERT INTO banker_accounts (record_key, account, saved_at) \
                 VALUES (?, ?, datetime('now'))",
            )
            .bind(record_key)
            .bind(payload)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(
            namespace = top_level_key,
            accounts = serialized.len(),
            "registry snapshot saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbank_core::Amount;
    use adbank_ledger::AccountType;

    fn key(s: &str) -> AccountKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_empty_namespace_loads_empty_registry() {
        let backend = SqliteBankerPersistence::connect("sqlite::memory:")
            .await
            .unwrap();
        let accounts = backend.load_all("banker").await.unwrap();
        assert!(accounts.is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let backend = SqliteBankerPersistence::connect("sqlite::memory:")
            .await
            .unwrap();

        let accounts = Accounts::new();
        accounts
            .create_account(&key("camp"), AccountType::Budget)
            .unwrap();
        accounts
            .set_budget(&key("camp"), &Amount::usd(5))
            .unwrap();
        backend.save_all("prod", &accounts).await.unwrap();

        assert!(backend.load_all("staging").await.unwrap().is_empty());
        assert_eq!(backend.load_all("prod").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_data_inconsistency() {
        let backend = SqliteBankerPersistence::connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO banker_accounts (record_key, account, saved_at) \
             VALUES ('banker:camp', 'not json', datetime('now'))",
        )
        .execute(backend.pool())
        .await
        .unwrap();

        let err = backend.load_all("banker").await.unwrap_err();
        assert!(matches!(err, PersistenceError::DataInconsistency(keys) if keys == vec!["banker:camp".to_string()]));
    }

    #[tokio::test]
    async fn test_invariant_violation_is_data_inconsistency() {
        let backend = SqliteBankerPersistence::connect("sqlite::memory:")
            .await
            .unwrap();
        // An account that has spent money it never had
        let orphan = r#"{"type":"spend","status":"active","spent":[{"currency":"USD","microUnits":100}]}"#;
        sqlx::query(
            "INSERT INTO banker_accounts (record_key, account, saved_at) \
             VALUES ('banker:camp', ?, datetime('now'))",
        )
        .bind(orphan)
        .execute(backend.pool())
        .await
        .unwrap();

        let err = backend.load_all("banker").await.unwrap_err();
        assert!(matches!(err, PersistenceError::DataInconsistency(keys) if keys == vec!["camp".to_string()]));
    }
}
