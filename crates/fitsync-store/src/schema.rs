// ABOUTME: Static, versioned schema for the local store, applied as numbered migrations.
// ABOUTME: The applied version lives in PRAGMA user_version; migrations only ever create missing tables.

use fitsync_core::Collection;
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Latest schema version known to this build.
pub const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    apply: fn(&Transaction<'_>) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        apply: migrate_v2,
    },
];

/// v1: the sync queue and the entity collections.
fn migrate_v1(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    create_collections_since(tx, 1)
}

/// v2: lookup caches for offline food search.
fn migrate_v2(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    create_collections_since(tx, 2)
}

fn create_collections_since(tx: &Transaction<'_>, version: u32) -> rusqlite::Result<()> {
    for collection in Collection::ALL
        .into_iter()
        .filter(|c| c.since_version() == version)
    {
        let table = collection.name();
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                idx TEXT
            );
            CREATE INDEX IF NOT EXISTS {table}_idx ON {table}(idx);"
        ))?;
    }
    Ok(())
}

/// Read the applied schema version.
pub fn current_version(conn: &Connection) -> rusqlite::Result<u32> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

/// Bring the database up to `SCHEMA_VERSION`.
pub fn apply_migrations(conn: &mut Connection) -> rusqlite::Result<u32> {
    apply_migrations_up_to(conn, SCHEMA_VERSION)
}

/// Apply every migration newer than the stored version and no newer than
/// `target`. Runs inside an immediate transaction so concurrent openers
/// serialize on the write lock instead of racing through the upgrade.
pub fn apply_migrations_up_to(conn: &mut Connection, target: u32) -> rusqlite::Result<u32> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: u32 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    let mut applied = current;
    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > current && m.version <= target)
    {
        (migration.apply)(&tx)?;
        applied = migration.version;
        tracing::info!("applied local store migration v{}", migration.version);
    }

    if applied != current {
        tx.pragma_update(None, "user_version", applied)?;
    }
    tx.commit()?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn fresh_database_gets_every_collection() {
        let mut conn = Connection::open_in_memory().unwrap();
        let version = apply_migrations(&mut conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        let tables = table_names(&conn);
        for collection in Collection::ALL {
            assert!(
                tables.iter().any(|t| t == collection.name()),
                "missing table {}",
                collection
            );
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_migrations(&mut conn).unwrap();
        let again = apply_migrations(&mut conn).unwrap();
        assert_eq!(again, SCHEMA_VERSION);
        assert_eq!(current_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn upgrade_adds_missing_collections_and_keeps_rows() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_migrations_up_to(&mut conn, 1).unwrap(), 1);
        assert!(!table_names(&conn).iter().any(|t| t == "foods"));

        conn.execute(
            "INSERT INTO workouts (id, body, idx) VALUES ('w1', '{\"id\":\"w1\"}', NULL)",
            [],
        )
        .unwrap();

        assert_eq!(apply_migrations(&mut conn).unwrap(), 2);
        assert!(table_names(&conn).iter().any(|t| t == "foods"));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM workouts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1, "existing collections must not be touched");
    }
}
