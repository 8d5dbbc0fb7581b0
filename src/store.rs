//! C2 — state-store gateway.
//!
//! The spec treats the backing store as an abstract document database with
//! two collections (`lock`, `scooterstatus`) keyed by device id (spec.md
//! §3, §4.2, §6). This implementation expresses that contract over a
//! Postgres connection pool with one `JSONB` column per table — see
//! DESIGN.md for why this was chosen over pulling in an unseen-in-corpus
//! Mongo driver. `PatchLock`'s shallow `$set` semantics are exactly JSONB
//! concatenation (`doc || $1`): keys present in the patch overwrite, every
//! other key is untouched, which is what gives Invariant 3 (telemetry
//! monotonicity) for free at the storage layer.
//!
//! Grounded on the teacher's `persistence.rs` (tolerant load/save pair) and
//! `audit.rs` (plain `Clone` struct wrapping a pooled resource, no global
//! handle — spec.md §9's first Design Note).

use serde_json::{json, Map, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    Success,
    Exists,
}

/// The `lock` collection's full record shape (spec.md §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Lock {
    pub lockid: String,
    pub locked: String,
    pub reserved: String,
    pub occupied: String,
    pub instruction: String,
    #[serde(default)]
    pub power: Option<i64>,
    #[serde(default)]
    pub drivervolt: Option<String>,
    #[serde(default)]
    pub bat1volt: Option<String>,
    #[serde(default)]
    pub bat2volt: Option<String>,
    #[serde(default)]
    pub networksignal: Option<String>,
    #[serde(default)]
    pub chargingstatus: Option<String>,
    #[serde(default)]
    pub speedmode: Option<String>,
    #[serde(default)]
    pub curspeed: Option<String>,
    #[serde(default)]
    pub positioning: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

impl Lock {
    fn defaults(imei: &str) -> Self {
        Self {
            lockid: imei.to_string(),
            locked: "true".to_string(),
            reserved: "false".to_string(),
            occupied: "false".to_string(),
            instruction: String::new(),
            power: None,
            drivervolt: None,
            bat1volt: None,
            bat2volt: None,
            networksignal: None,
            chargingstatus: None,
            speedmode: None,
            curspeed: None,
            positioning: None,
            latitude: None,
            longitude: None,
        }
    }
}

#[derive(Clone)]
pub struct StateStore {
    pool: PgPool,
}

impl StateStore {
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new().max_connections(20).connect(database_url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lock (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scooterstatus (id TEXT PRIMARY KEY, doc JSONB NOT NULL)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// First-contact subflow (C6): upsert `scooterstatus`, then insert a
    /// default `lock` row if one doesn't exist yet. Idempotent — a reconnect
    /// simply returns `Exists` on every call after the first.
    pub async fn ensure_registered(&self, imei: &str) -> Result<RegisterOutcome, sqlx::Error> {
        sqlx::query(
            "INSERT INTO scooterstatus (id, doc) VALUES ($1, $2)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(imei)
        .bind(json!({ "id": imei }))
        .execute(&self.pool)
        .await?;

        let existing = self.load_lock(imei).await?;
        if existing.is_some() {
            return Ok(RegisterOutcome::Exists);
        }

        let defaults = Lock::defaults(imei);
        let inserted = sqlx::query(
            "INSERT INTO lock (id, doc) VALUES ($1, $2)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(imei)
        .bind(serde_json::to_value(&defaults).expect("Lock always serializes"))
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a race against a concurrent registration on another session.
            debug!(imei, "registration raced with a concurrent Q0, treating as Exists");
            return Ok(RegisterOutcome::Exists);
        }

        Ok(RegisterOutcome::Success)
    }

    pub async fn load_lock(&self, imei: &str) -> Result<Option<Lock>, sqlx::Error> {
        let row = sqlx::query("SELECT doc FROM lock WHERE id = $1")
            .bind(imei)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let doc: Value = row.try_get("doc")?;
                match serde_json::from_value(doc) {
                    Ok(lock) => Ok(Some(lock)),
                    Err(e) => {
                        warn!(imei, error = %e, "lock document failed to deserialize");
                        Ok(None)
                    }
                }
            }
            None => Ok(None),
        }
    }

    /// Shallow `$set`-style partial update. Absent fields are left
    /// untouched by JSONB concatenation — this is what Invariant 3 relies on.
    pub async fn patch_lock(&self, imei: &str, patch: Map<String, Value>) -> Result<(), sqlx::Error> {
        if patch.is_empty() {
            return Ok(());
        }
        let patch_value = Value::Object(patch);
        sqlx::query("UPDATE lock SET doc = doc || $2 WHERE id = $1")
            .bind(imei)
            .bind(patch_value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Small helper for building `$set` maps inline at dispatch call sites.
pub fn patch(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Map<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_defaults_match_spec_invariant() {
        let lock = Lock::defaults("862461040000001");
        assert_eq!(lock.lockid, "862461040000001");
        assert_eq!(lock.locked, "true");
        assert_eq!(lock.reserved, "false");
        assert_eq!(lock.occupied, "false");
        assert_eq!(lock.instruction, "");
        assert!(lock.power.is_none());
    }

    #[test]
    fn lock_round_trips_through_json() {
        let lock = Lock::defaults("X");
        let value = serde_json::to_value(&lock).unwrap();
        let back: Lock = serde_json::from_value(value).unwrap();
        assert_eq!(back.lockid, "X");
        assert_eq!(back.instruction, "");
    }

    #[test]
    fn patch_builds_a_flat_map() {
        let p = patch([("power", json!(42)), ("locked", json!("false"))]);
        assert_eq!(p.get("power"), Some(&json!(42)));
        assert_eq!(p.get("locked"), Some(&json!("false")));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn empty_patch_is_empty() {
        let p: Map<String, Value> = patch([]);
        assert!(p.is_empty());
    }
}
