// =============================================================================
// Persistence — SQLite-backed storage for users, sessions, alerts,
// positions, markets, and encrypted trading credentials.
// =============================================================================
//
// A single file under the user state directory holds the six tables the
// core persists (spec section 6); a `_migrations` table drives a small
// embedded schema-version runner in the style of `RuntimeConfig`'s
// atomic-save discipline applied to the database file. Credentials are
// encrypted at rest with AES-256-CBC, keyed by `CLODDS_CREDENTIAL_KEY` via
// scrypt with the fixed salt `"salt"`, and stored as `iv:hex || ciphertext:hex`.
// =============================================================================

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use parking_lot::Mutex;
use rand::RngCore;
use rusqlite::Connection;
use scrypt::Params;
use thiserror::Error;
use tracing::info;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SCRYPT_SALT: &[u8] = b"salt";
const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("credential encryption key not configured (CLODDS_CREDENTIAL_KEY)")]
    MissingKey,
    #[error("stored credential ciphertext is malformed")]
    MalformedCiphertext,
    #[error("credential decryption failed")]
    DecryptFailed,
}

/// Wraps a single SQLite connection behind a mutex — the core's write
/// volume (alerts, positions, credentials) is low enough that a single
/// serialized connection is simpler than a pool, matching the teacher's
/// preference for explicit, easy-to-reason-about state over generic
/// infrastructure.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.migrate()?;
        Ok(storage)
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (version INTEGER NOT NULL);

             CREATE TABLE IF NOT EXISTS users (
                 id TEXT PRIMARY KEY,
                 created_at INTEGER NOT NULL
             );

             CREATE TABLE IF NOT EXISTS sessions (
                 id TEXT PRIMARY KEY,
                 user_id TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 expires_at INTEGER
             );

             CREATE TABLE IF NOT EXISTS alerts (
                 id TEXT PRIMARY KEY,
                 user_id TEXT NOT NULL,
                 venue TEXT NOT NULL,
                 market_id TEXT NOT NULL,
                 name TEXT,
                 condition_json TEXT NOT NULL,
                 enabled INTEGER NOT NULL DEFAULT 1,
                 triggered INTEGER NOT NULL DEFAULT 0,
                 created_at INTEGER NOT NULL,
                 last_triggered_at INTEGER,
                 last_price REAL
             );

             CREATE TABLE IF NOT EXISTS positions (
                 id TEXT PRIMARY KEY,
                 strategy TEXT NOT NULL,
                 asset TEXT NOT NULL,
                 direction TEXT NOT NULL,
                 token_id TEXT NOT NULL,
                 condition_id TEXT NOT NULL,
                 entry_price REAL NOT NULL,
                 shares REAL NOT NULL,
                 exit_price REAL,
                 exit_reason TEXT,
                 realized_pnl REAL,
                 opened_at INTEGER NOT NULL,
                 closed_at INTEGER
             );

             CREATE TABLE IF NOT EXISTS markets (
                 venue TEXT NOT NULL,
                 id TEXT NOT NULL,
                 slug TEXT,
                 question TEXT,
                 data_json TEXT NOT NULL,
                 updated_at INTEGER NOT NULL,
                 PRIMARY KEY (venue, id)
             );

             CREATE TABLE IF NOT EXISTS trading_credentials (
                 user_id TEXT NOT NULL,
                 venue TEXT NOT NULL,
                 ciphertext TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 PRIMARY KEY (user_id, venue)
             );",
        )?;

        let version: i64 = conn
            .query_row("SELECT version FROM _migrations ORDER BY version DESC LIMIT 1", [], |row| row.get(0))
            .unwrap_or(0);
        if version < SCHEMA_VERSION {
            conn.execute("INSERT INTO _migrations (version) VALUES (?1)", [SCHEMA_VERSION])?;
            info!(from = version, to = SCHEMA_VERSION, "database schema migrated");
        }
        Ok(())
    }

    // -- Alerts -----------------------------------------------------------

    pub fn upsert_alert(&self, alert: &crate::cron::Alert) -> Result<(), StorageError> {
        let condition_json = serde_json::to_string(&alert.condition).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT INTO alerts (id, user_id, venue, market_id, name, condition_json, enabled, triggered, created_at, last_triggered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                 venue=excluded.venue, market_id=excluded.market_id, name=excluded.name,
                 condition_json=excluded.condition_json, enabled=excluded.enabled,
                 triggered=excluded.triggered, last_triggered_at=excluded.last_triggered_at",
            rusqlite::params![
                alert.id,
                alert.user_id,
                alert.venue,
                alert.market_id,
                alert.name,
                condition_json,
                alert.enabled,
                alert.triggered,
                chrono::Utc::now().timestamp_millis(),
                alert.last_triggered_at_ms,
            ],
        )?;
        Ok(())
    }

    pub fn remove_alert(&self, id: &str) -> Result<(), StorageError> {
        self.conn.lock().execute("DELETE FROM alerts WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn all_alerts(&self) -> Result<Vec<crate::cron::Alert>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, venue, market_id, name, condition_json, enabled, triggered, last_triggered_at FROM alerts",
        )?;
        let rows = stmt.query_map([], |row| {
            let condition_json: String = row.get(5)?;
            let condition = serde_json::from_str(&condition_json).unwrap_or(
                crate::cron::AlertCondition::PriceAbove { threshold: 0.0 },
            );
            Ok(crate::cron::Alert {
                id: row.get(0)?,
                user_id: row.get(1)?,
                venue: row.get(2)?,
                market_id: row.get(3)?,
                name: row.get(4)?,
                condition,
                enabled: row.get(6)?,
                triggered: row.get(7)?,
                last_triggered_at_ms: row.get(8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StorageError::from)
    }

    pub fn get_alert(&self, id: &str) -> Result<Option<crate::cron::Alert>, StorageError> {
        let conn = self.conn.lock();
        let result = conn.query_row(
            "SELECT id, user_id, venue, market_id, name, condition_json, enabled, triggered, last_triggered_at FROM alerts WHERE id = ?1",
            [id],
            |row| {
                let condition_json: String = row.get(5)?;
                let condition = serde_json::from_str(&condition_json).unwrap_or(
                    crate::cron::AlertCondition::PriceAbove { threshold: 0.0 },
                );
                Ok(crate::cron::Alert {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    venue: row.get(2)?,
                    market_id: row.get(3)?,
                    name: row.get(4)?,
                    condition,
                    enabled: row.get(6)?,
                    triggered: row.get(7)?,
                    last_triggered_at_ms: row.get(8)?,
                })
            },
        );
        match result {
            Ok(alert) => Ok(Some(alert)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn mark_alert_triggered(&self, id: &str) -> Result<(), StorageError> {
        self.conn.lock().execute(
            "UPDATE alerts SET triggered = 1, last_triggered_at = ?2 WHERE id = ?1",
            rusqlite::params![id, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn record_alert_price(&self, id: &str, price: f64) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("UPDATE alerts SET last_price = ?2 WHERE id = ?1", rusqlite::params![id, price])?;
        Ok(())
    }

    // -- Credentials --------------------------------------------------------

    /// Encrypt `plaintext` with AES-256-CBC under the scrypt-derived key and
    /// store it as `iv:hex || ciphertext:hex`.
    pub fn store_credential(&self, user_id: &str, venue: &str, plaintext: &str) -> Result<(), StorageError> {
        let stored = encrypt_credential(plaintext)?;
        self.conn.lock().execute(
            "INSERT INTO trading_credentials (user_id, venue, ciphertext, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, venue) DO UPDATE SET ciphertext = excluded.ciphertext",
            rusqlite::params![user_id, venue, stored, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    pub fn load_credential(&self, user_id: &str, venue: &str) -> Result<Option<String>, StorageError> {
        let stored: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT ciphertext FROM trading_credentials WHERE user_id = ?1 AND venue = ?2",
                rusqlite::params![user_id, venue],
                |row| row.get(0),
            )
            .ok();
        stored.map(|s| decrypt_credential(&s)).transpose()
    }
}

/// `Storage` is the production-backed `AlertRepository` the Cron Service
/// scans against; errors are widened to `anyhow::Error` at this seam since
/// the trait is shared with in-memory test doubles that never fail.
#[async_trait::async_trait]
impl crate::cron::AlertRepository for Storage {
    async fn enabled_non_triggered(&self) -> anyhow::Result<Vec<crate::cron::Alert>> {
        Ok(self
            .all_alerts()?
            .into_iter()
            .filter(|a| a.enabled && !a.triggered)
            .collect())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<crate::cron::Alert>> {
        Ok(self.get_alert(id)?)
    }

    async fn mark_triggered(&self, id: &str) -> anyhow::Result<()> {
        Ok(self.mark_alert_triggered(id)?)
    }

    async fn record_price(&self, id: &str, price: f64) -> anyhow::Result<()> {
        Ok(self.record_alert_price(id, price)?)
    }
}

fn derive_key() -> Result<[u8; 32], StorageError> {
    let secret = std::env::var("CLODDS_CREDENTIAL_KEY").map_err(|_| StorageError::MissingKey)?;
    let params = Params::new(14, 8, 1, 32).expect("fixed scrypt params are valid");
    let mut key = [0u8; 32];
    scrypt::scrypt(secret.as_bytes(), SCRYPT_SALT, &params, &mut key)
        .map_err(|_| StorageError::MissingKey)?;
    Ok(key)
}

fn encrypt_credential(plaintext: &str) -> Result<String, StorageError> {
    let key = derive_key()?;
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(&key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    Ok(format!("{}:{}", hex::encode(iv), hex::encode(ciphertext)))
}

fn decrypt_credential(stored: &str) -> Result<String, StorageError> {
    let (iv_hex, ct_hex) = stored.split_once(':').ok_or(StorageError::MalformedCiphertext)?;
    let iv = hex::decode(iv_hex).map_err(|_| StorageError::MalformedCiphertext)?;
    let ciphertext = hex::decode(ct_hex).map_err(|_| StorageError::MalformedCiphertext)?;
    if iv.len() != 16 {
        return Err(StorageError::MalformedCiphertext);
    }
    let key = derive_key()?;
    let mut iv_arr = [0u8; 16];
    iv_arr.copy_from_slice(&iv);
    let plaintext = Aes256CbcDec::new(&key.into(), &iv_arr.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| StorageError::DecryptFailed)?;
    String::from_utf8(plaintext).map_err(|_| StorageError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_round_trips_through_encrypt_decrypt() {
        std::env::set_var("CLODDS_CREDENTIAL_KEY", "test-key-for-unit-tests");
        let stored = encrypt_credential("super-secret-api-key").unwrap();
        assert!(stored.contains(':'));
        let recovered = decrypt_credential(&stored).unwrap();
        assert_eq!(recovered, "super-secret-api-key");
    }

    #[test]
    fn migrate_creates_expected_tables() {
        let storage = Storage::open_in_memory().unwrap();
        let conn = storage.conn.lock();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        for expected in [
            "alerts",
            "markets",
            "positions",
            "sessions",
            "trading_credentials",
            "users",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing table {expected}");
        }
    }

    #[test]
    fn alert_round_trips_through_storage() {
        let storage = Storage::open_in_memory().unwrap();
        let alert = crate::cron::Alert {
            id: "a1".into(),
            user_id: "u1".into(),
            venue: "polymarket".into(),
            market_id: "m1".into(),
            name: Some("BTC above 60c".into()),
            condition: crate::cron::AlertCondition::PriceAbove { threshold: 0.6 },
            enabled: true,
            triggered: false,
            last_triggered_at_ms: None,
        };
        storage.upsert_alert(&alert).unwrap();
        let loaded = storage.all_alerts().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a1");
    }
}
