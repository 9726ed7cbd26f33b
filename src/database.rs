use chrono::{DateTime, Utc};
use mobc::{Manager, Pool};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use tracing::{debug, info};

use crate::models::{CrawlSummary, EmailCandidate, EmailRecord, Result};

pub struct SqliteManager {
    db_path: String,
}

impl SqliteManager {
    pub fn new(db_path: String) -> Self {
        debug!("Creating SqliteManager for path: {}", db_path);
        Self { db_path }
    }
}

#[async_trait::async_trait]
impl Manager for SqliteManager {
    type Connection = Connection;
    type Error = rusqlite::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let conn = Connection::open(&self.db_path)?;

        // Some PRAGMAs return a result row, so execute() would fail on them
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute("PRAGMA synchronous=NORMAL", [])?;
        conn.execute("PRAGMA temp_store=memory", [])?;

        init_database(&conn)?;
        Ok(conn)
    }

    async fn check(
        &self,
        conn: Self::Connection,
    ) -> std::result::Result<Self::Connection, Self::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(conn)
    }
}

fn init_database(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS emails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            organization_id TEXT NOT NULL,
            address TEXT NOT NULL,
            first_source_url TEXT NOT NULL,
            first_seen_at TEXT NOT NULL,
            confidence REAL NOT NULL,
            UNIQUE(organization_id, address)
        )
        "#,
        [],
    )?;

    conn.execute(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            status TEXT NOT NULL,
            pages_crawled INTEGER NOT NULL,
            emails_found INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            finished_at TEXT NOT NULL
        )
        "#,
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emails_org ON emails(organization_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_emails_first_seen ON emails(first_seen_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_crawl_runs_org ON crawl_runs(organization_id)",
        [],
    )?;

    Ok(())
}

pub type DbPool = Pool<SqliteManager>;

pub async fn create_db_pool(db_path: &str) -> Result<DbPool> {
    if let Some(parent) = Path::new(db_path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let manager = SqliteManager::new(db_path.to_string());
    let pool = Pool::builder().max_open(10).max_idle(5).build(manager);

    info!("✓ SQLite connection pool created: {}", db_path);
    Ok(pool)
}

/// Inserts a candidate if (organization_id, address) is absent.
///
/// First-seen-wins: a duplicate insert is a no-op, never an overwrite.
/// Returns whether a new row was created.
pub async fn insert_email(pool: &DbPool, candidate: &EmailCandidate) -> Result<bool> {
    let conn = pool.get().await?;
    let now = Utc::now().to_rfc3339();

    let inserted = conn.execute(
        r#"
        INSERT OR IGNORE INTO emails
            (organization_id, address, first_source_url, first_seen_at, confidence)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            candidate.organization_id,
            candidate.address,
            candidate.source_url,
            now,
            candidate.confidence,
        ],
    )?;

    if inserted > 0 {
        debug!(
            "New email for {}: {} (from {})",
            candidate.organization_id, candidate.address, candidate.source_url
        );
    }
    Ok(inserted > 0)
}

/// Exports records ordered by first_seen_at ascending, optionally
/// restricted to one organization. Read-only and restartable.
pub async fn export_emails(pool: &DbPool, organization_id: Option<&str>) -> Result<Vec<EmailRecord>> {
    let conn = pool.get().await?;

    let (sql, org_param): (&str, Option<&str>) = match organization_id {
        Some(org) => (
            r#"
            SELECT organization_id, address, first_source_url, first_seen_at, confidence
            FROM emails WHERE organization_id = ?1
            ORDER BY first_seen_at ASC, id ASC
            "#,
            Some(org),
        ),
        None => (
            r#"
            SELECT organization_id, address, first_source_url, first_seen_at, confidence
            FROM emails
            ORDER BY first_seen_at ASC, id ASC
            "#,
            None,
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let map_row = |row: &rusqlite::Row| -> SqliteResult<EmailRecord> {
        let first_seen: String = row.get(3)?;
        Ok(EmailRecord {
            organization_id: row.get(0)?,
            address: row.get(1)?,
            first_source_url: row.get(2)?,
            first_seen_at: first_seen
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
            confidence: row.get(4)?,
        })
    };

    let rows = match org_param {
        Some(org) => stmt.query_map(params![org], map_row)?,
        None => stmt.query_map([], map_row)?,
    };

    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

pub async fn first_seen_at(
    pool: &DbPool,
    organization_id: &str,
    address: &str,
) -> Result<Option<String>> {
    let conn = pool.get().await?;
    let value = conn
        .query_row(
            "SELECT first_seen_at FROM emails WHERE organization_id = ?1 AND address = ?2",
            params![organization_id, address],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub async fn record_crawl_run(pool: &DbPool, summary: &CrawlSummary) -> Result<()> {
    let conn = pool.get().await?;
    conn.execute(
        r#"
        INSERT INTO crawl_runs
            (run_id, organization_id, status, pages_crawled, emails_found, duration_ms, finished_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            summary.run_id,
            summary.organization_id,
            summary.status.as_str(),
            summary.pages_crawled,
            summary.emails_found,
            summary.duration_ms as i64,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[derive(Debug)]
pub struct CrawlStats {
    pub organizations: i64,
    pub total_emails: i64,
}

pub async fn get_crawl_stats(pool: &DbPool) -> Result<CrawlStats> {
    let conn = pool.get().await?;
    let organizations: i64 = conn.query_row(
        "SELECT COUNT(DISTINCT organization_id) FROM emails",
        [],
        |row| row.get(0),
    )?;
    let total_emails: i64 = conn.query_row("SELECT COUNT(*) FROM emails", [], |row| row.get(0))?;
    Ok(CrawlStats {
        organizations,
        total_emails,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(org: &str, address: &str, source: &str) -> EmailCandidate {
        EmailCandidate {
            organization_id: org.to_string(),
            address: address.to_string(),
            source_url: source.to_string(),
            confidence: 0.8,
        }
    }

    async fn test_pool() -> (tempfile::TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let pool = create_db_pool(path.to_str().unwrap()).await.unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn duplicate_insert_is_noop() {
        let (_dir, pool) = test_pool().await;

        let first = candidate("org-1", "hello@example-org.test", "https://example-org.test/contact");
        assert!(insert_email(&pool, &first).await.unwrap());

        let seen_before = first_seen_at(&pool, "org-1", "hello@example-org.test")
            .await
            .unwrap()
            .unwrap();

        let dup = candidate("org-1", "hello@example-org.test", "https://example-org.test/about");
        assert!(!insert_email(&pool, &dup).await.unwrap());

        let seen_after = first_seen_at(&pool, "org-1", "hello@example-org.test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen_before, seen_after);

        let records = export_emails(&pool, Some("org-1")).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].first_source_url,
            "https://example-org.test/contact"
        );
    }

    #[tokio::test]
    async fn same_address_different_orgs_are_distinct() {
        let (_dir, pool) = test_pool().await;

        assert!(insert_email(&pool, &candidate("org-1", "info@shared.test", "https://a.test"))
            .await
            .unwrap());
        assert!(insert_email(&pool, &candidate("org-2", "info@shared.test", "https://b.test"))
            .await
            .unwrap());

        let all = export_emails(&pool, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn export_is_ordered_and_filtered() {
        let (_dir, pool) = test_pool().await;

        for (org, addr) in [
            ("org-1", "a@one.test"),
            ("org-1", "b@one.test"),
            ("org-2", "c@two.test"),
        ] {
            insert_email(&pool, &candidate(org, addr, "https://one.test"))
                .await
                .unwrap();
        }

        let org1 = export_emails(&pool, Some("org-1")).await.unwrap();
        assert_eq!(org1.len(), 2);
        assert_eq!(org1[0].address, "a@one.test");
        assert_eq!(org1[1].address, "b@one.test");

        // Restartable: a second read sees the same thing
        let again = export_emails(&pool, Some("org-1")).await.unwrap();
        assert_eq!(again.len(), 2);
    }

    #[tokio::test]
    async fn crawl_run_summary_is_recorded() {
        let (_dir, pool) = test_pool().await;
        let summary = CrawlSummary {
            run_id: "run-1".to_string(),
            organization_id: "org-1".to_string(),
            status: crate::models::OrgStatus::Completed,
            pages_crawled: 4,
            emails_found: 2,
            duration_ms: 1234,
        };
        record_crawl_run(&pool, &summary).await.unwrap();

        let conn = pool.get().await.unwrap();
        let status: String = conn
            .query_row(
                "SELECT status FROM crawl_runs WHERE organization_id = 'org-1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "completed");
    }
}
