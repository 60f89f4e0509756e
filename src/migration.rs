//! Tenant schema migrations, run once when a tenant store is first registered.
//! Applied files are recorded per tenant database, so reruns only apply what is new.

use crate::error::TenancyError;
use crate::router::{DbRouter, DbTarget};
use async_trait::async_trait;
use sqlx::{Executor, PgConnection, PgPool};
use std::path::{Path, PathBuf};

/// Bookkeeping table created in every migrated tenant database.
pub const MIGRATIONS_TABLE: &str = "_tenancy_migrations";

#[async_trait]
pub trait TenantMigrator: Send + Sync {
    /// Bring the tenant store behind `pool` up to date. Returns the number of migrations applied.
    async fn migrate(&self, target: &DbTarget, pool: &PgPool) -> Result<usize, TenancyError>;
}

/// Applies `*.sql` files from a directory, in file-name order, for one tenant app label.
pub struct SqlDirMigrator {
    dir: PathBuf,
    router: DbRouter,
    app_label: String,
}

impl SqlDirMigrator {
    pub fn new(dir: impl Into<PathBuf>, router: DbRouter) -> Self {
        SqlDirMigrator {
            dir: dir.into(),
            router,
            app_label: "api".into(),
        }
    }

    pub fn with_app_label(mut self, app_label: impl Into<String>) -> Self {
        self.app_label = app_label.into();
        self
    }
}

/// Read `(file name, sql)` pairs for every `*.sql` file in `dir`, sorted by name.
pub async fn load_migrations(dir: &Path) -> std::io::Result<Vec<(String, String)>> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("sql") && entry.file_type().await?.is_file() {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let sql = tokio::fs::read_to_string(dir.join(&name)).await?;
        out.push((name, sql));
    }
    Ok(out)
}

#[async_trait]
impl TenantMigrator for SqlDirMigrator {
    async fn migrate(&self, target: &DbTarget, pool: &PgPool) -> Result<usize, TenancyError> {
        if !self.router.allow_schema_change_for_app(target, &self.app_label) {
            return Err(TenancyError::SchemaChangeRejected {
                target: target.to_string(),
                class: self.app_label.clone(),
            });
        }
        let alias = target.alias().to_string();
        let fail = |reason: String| TenancyError::Migration {
            alias: alias.clone(),
            reason,
        };

        let migrations = load_migrations(&self.dir)
            .await
            .map_err(|e| fail(format!("reading {}: {}", self.dir.display(), e)))?;

        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())",
            MIGRATIONS_TABLE
        );
        sqlx::query(&ddl).execute(pool).await.map_err(|e| fail(e.to_string()))?;

        let mut applied = 0;
        for (name, sql) in migrations {
            let done: (bool,) = sqlx::query_as(&format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE name = $1)",
                MIGRATIONS_TABLE
            ))
            .bind(&name)
            .fetch_one(pool)
            .await
            .map_err(|e| fail(e.to_string()))?;
            if done.0 {
                continue;
            }

            let mut tx = pool.begin().await.map_err(|e| fail(e.to_string()))?;
            let conn: &mut PgConnection = &mut tx;
            (&mut *conn)
                .execute(sqlx::raw_sql(&sql))
                .await
                .map_err(|e| fail(format!("{}: {}", name, e)))?;
            sqlx::query(&format!("INSERT INTO {} (name) VALUES ($1)", MIGRATIONS_TABLE))
                .bind(&name)
                .execute(&mut *conn)
                .await
                .map_err(|e| fail(e.to_string()))?;
            tx.commit().await.map_err(|e| fail(e.to_string()))?;
            tracing::info!(alias = %alias, migration = %name, "applied tenant migration");
            applied += 1;
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

    #[tokio::test]
    async fn loads_sql_files_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("0002_answers.sql"), "CREATE TABLE b (id INT);").await.unwrap();
        tokio::fs::write(dir.path().join("0001_checklists.sql"), "CREATE TABLE a (id INT);").await.unwrap();
        tokio::fs::write(dir.path().join("README.md"), "ignored").await.unwrap();

        let loaded = load_migrations(dir.path()).await.unwrap();
        let names: Vec<&str> = loaded.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["0001_checklists.sql", "0002_answers.sql"]);
        assert!(loaded[0].1.contains("CREATE TABLE a"));
    }

    #[tokio::test]
    async fn refuses_to_touch_fixed_store() {
        let pool = PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new());
        let migrator = SqlDirMigrator::new("/nonexistent", DbRouter::default());
        let err = migrator.migrate(&DbTarget::Master, &pool).await.unwrap_err();
        assert!(matches!(err, TenancyError::SchemaChangeRejected { .. }));
    }

    #[tokio::test]
    async fn unknown_app_label_is_never_migrated() {
        let pool = PgPoolOptions::new().connect_lazy_with(PgConnectOptions::new());
        let migrator = SqlDirMigrator::new("/nonexistent", DbRouter::default()).with_app_label("reports");
        let err = migrator
            .migrate(&DbTarget::Tenant("client_1".into()), &pool)
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::SchemaChangeRejected { .. }));
    }

    /// Scratch Postgres for the transactional path; the test is skipped when unset.
    async fn scratch_pool() -> Option<PgPool> {
        let Ok(url) = std::env::var("TENANCY_TEST_DATABASE_URL") else {
            eprintln!("skipping: TENANCY_TEST_DATABASE_URL not set");
            return None;
        };
        Some(PgPoolOptions::new().max_connections(2).connect(&url).await.unwrap())
    }

    #[tokio::test]
    async fn applies_each_file_once_and_rolls_back_failures() {
        let Some(pool) = scratch_pool().await else {
            return;
        };
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let run = format!("{}_{}", std::process::id(), nanos);
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join(format!("0001_{run}.sql")),
            format!("CREATE TABLE mig_a_{run} (id INT);"),
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join(format!("0002_{run}.sql")),
            format!("CREATE TABLE mig_b_{run} (id INT); INSERT INTO mig_b_{run} VALUES (1);"),
        )
        .await
        .unwrap();

        let migrator = SqlDirMigrator::new(dir.path(), DbRouter::default());
        let target = DbTarget::Tenant("client_1".into());
        assert_eq!(migrator.migrate(&target, &pool).await.unwrap(), 2);
        assert_eq!(migrator.migrate(&target, &pool).await.unwrap(), 0);

        tokio::fs::write(
            dir.path().join(format!("0003_{run}.sql")),
            format!("CREATE TABLE mig_c_{run} (id INT); SELECT * FROM missing_{run};"),
        )
        .await
        .unwrap();
        let err = migrator.migrate(&target, &pool).await.unwrap_err();
        assert!(matches!(err, TenancyError::Migration { .. }));

        let (created,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
            .bind(format!("mig_c_{run}"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(!created);
        let (recorded,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {} WHERE name LIKE $1", MIGRATIONS_TABLE))
            .bind(format!("%{run}%"))
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(recorded, 2);

        sqlx::raw_sql(&format!("DROP TABLE mig_a_{run}; DROP TABLE mig_b_{run};"))
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(&format!("DELETE FROM {} WHERE name LIKE $1", MIGRATIONS_TABLE))
            .bind(format!("%{run}%"))
            .execute(&pool)
            .await
            .unwrap();
    }
}
