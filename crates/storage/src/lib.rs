use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
    types::Json,
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};
use uuid::Uuid;

use shared::domain::{PageId, WidgetId, WidgetType};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredPage {
    pub page_id: PageId,
    pub name: String,
    pub route: String,
    pub is_home: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredWidget {
    pub widget_id: WidgetId,
    pub page_id: PageId,
    pub widget_type: WidgetType,
    pub position: i64,
    pub config: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWidget {
    pub page_id: PageId,
    pub widget_type: WidgetType,
    pub position: i64,
    pub config: Value,
}

/// Column-wise page update; `None` keeps the stored value.
#[derive(Debug, Clone, Default)]
pub struct PageChanges {
    pub name: Option<String>,
    pub route: Option<String>,
    pub is_home: Option<bool>,
}

impl PageChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.route.is_none() && self.is_home.is_none()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WidgetChanges {
    pub widget_type: Option<WidgetType>,
    pub position: Option<i64>,
    pub config: Option<Value>,
}

impl WidgetChanges {
    pub fn is_empty(&self) -> bool {
        self.widget_type.is_none() && self.position.is_none() && self.config.is_none()
    }
}

/// Result of a reorder transaction. Anything other than `Applied` means the
/// transaction was rolled back and no position changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderOutcome {
    Applied,
    WidgetNotOnPage(WidgetId),
    CountChanged { expected: u64, actual: u64 },
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let mut connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        if sqlite_path(database_url).is_some() {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a page. When `is_home` is set, the previous home page loses its
    /// flag inside the same transaction.
    pub async fn create_page(&self, name: &str, route: &str, is_home: bool) -> Result<StoredPage> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if is_home {
            sqlx::query("UPDATE pages SET is_home = 0, updated_at = ? WHERE is_home = 1")
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("failed to clear current home page")?;
        }

        let row = sqlx::query(
            "INSERT INTO pages (id, name, route, is_home, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING id, name, route, is_home, created_at, updated_at",
        )
        .bind(PageId::generate().0)
        .bind(name)
        .bind(route)
        .bind(is_home)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert page")?;
        let page = page_from_row(&row)?;

        tx.commit().await?;
        Ok(page)
    }

    pub async fn get_page(&self, page_id: PageId) -> Result<Option<StoredPage>> {
        let row = sqlx::query(
            "SELECT id, name, route, is_home, created_at, updated_at FROM pages WHERE id = ?",
        )
        .bind(page_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(page_from_row).transpose()
    }

    pub async fn home_page(&self) -> Result<Option<StoredPage>> {
        let row = sqlx::query(
            "SELECT id, name, route, is_home, created_at, updated_at
             FROM pages
             WHERE is_home = 1
             LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(page_from_row).transpose()
    }

    /// Newest pages first.
    pub async fn list_pages(&self, limit: u32, offset: u64) -> Result<Vec<StoredPage>> {
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, name, route, is_home, created_at, updated_at
             FROM pages
             ORDER BY created_at DESC, rowid DESC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(page_from_row).collect()
    }

    pub async fn count_pages(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    pub async fn route_exists(&self, route: &str, excluding: Option<PageId>) -> Result<bool> {
        let exists: bool = match excluding {
            Some(page_id) => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pages WHERE route = ? AND id != ?)")
                    .bind(route)
                    .bind(page_id.0)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pages WHERE route = ?)")
                    .bind(route)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(exists)
    }

    /// Applies `changes` and returns the page as persisted, or `None` when the
    /// page does not exist. Promoting a page to home demotes the previous home
    /// page in the same transaction.
    pub async fn update_page(
        &self,
        page_id: PageId,
        changes: &PageChanges,
    ) -> Result<Option<StoredPage>> {
        if changes.is_empty() {
            return self.get_page(page_id).await;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if changes.is_home == Some(true) {
            sqlx::query("UPDATE pages SET is_home = 0, updated_at = ? WHERE is_home = 1 AND id != ?")
                .bind(now)
                .bind(page_id.0)
                .execute(&mut *tx)
                .await
                .context("failed to clear current home page")?;
        }

        let row = sqlx::query(
            "UPDATE pages
             SET name = COALESCE(?, name),
                 route = COALESCE(?, route),
                 is_home = COALESCE(?, is_home),
                 updated_at = ?
             WHERE id = ?
             RETURNING id, name, route, is_home, created_at, updated_at",
        )
        .bind(changes.name.as_deref())
        .bind(changes.route.as_deref())
        .bind(changes.is_home)
        .bind(now)
        .bind(page_id.0)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to update page")?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let page = page_from_row(&row)?;
        tx.commit().await?;
        Ok(Some(page))
    }

    /// Deletes a page that is not flagged as home. Its widgets go with it via
    /// `ON DELETE CASCADE`. Returns `false` when no row matched.
    pub async fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM pages WHERE id = ? AND is_home = 0")
            .bind(page_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    pub async fn insert_widget(&self, widget: &NewWidget) -> Result<StoredWidget> {
        let now = Utc::now();
        let row = sqlx::query(
            "INSERT INTO widgets (id, page_id, widget_type, position, config, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id, page_id, widget_type, position, config, created_at, updated_at",
        )
        .bind(WidgetId::generate().0)
        .bind(widget.page_id.0)
        .bind(widget.widget_type.as_str())
        .bind(widget.position)
        .bind(Json(&widget.config))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert widget")?;
        widget_from_row(&row)
    }

    pub async fn get_widget(&self, widget_id: WidgetId) -> Result<Option<StoredWidget>> {
        let row = sqlx::query(
            "SELECT id, page_id, widget_type, position, config, created_at, updated_at
             FROM widgets
             WHERE id = ?",
        )
        .bind(widget_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(widget_from_row).transpose()
    }

    /// Widgets of a page in position order. Ties fall back to insertion order.
    pub async fn list_widgets_for_page(
        &self,
        page_id: PageId,
        widget_type: Option<WidgetType>,
    ) -> Result<Vec<StoredWidget>> {
        let rows = if let Some(widget_type) = widget_type {
            sqlx::query(
                "SELECT id, page_id, widget_type, position, config, created_at, updated_at
                 FROM widgets
                 WHERE page_id = ? AND widget_type = ?
                 ORDER BY position ASC, created_at ASC, rowid ASC",
            )
            .bind(page_id.0)
            .bind(widget_type.as_str())
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT id, page_id, widget_type, position, config, created_at, updated_at
                 FROM widgets
                 WHERE page_id = ?
                 ORDER BY position ASC, created_at ASC, rowid ASC",
            )
            .bind(page_id.0)
            .fetch_all(&self.pool)
            .await?
        };
        rows.iter().map(widget_from_row).collect()
    }

    pub async fn count_widgets_for_page(&self, page_id: PageId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets WHERE page_id = ?")
            .bind(page_id.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Highest position on the page, 0 when the page has no widgets.
    pub async fn max_widget_position(&self, page_id: PageId) -> Result<i64> {
        let max: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) FROM widgets WHERE page_id = ?")
                .bind(page_id.0)
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    pub async fn update_widget(
        &self,
        widget_id: WidgetId,
        changes: &WidgetChanges,
    ) -> Result<Option<StoredWidget>> {
        if changes.is_empty() {
            return self.get_widget(widget_id).await;
        }

        let row = sqlx::query(
            "UPDATE widgets
             SET widget_type = COALESCE(?, widget_type),
                 position = COALESCE(?, position),
                 config = COALESCE(?, config),
                 updated_at = ?
             WHERE id = ?
             RETURNING id, page_id, widget_type, position, config, created_at, updated_at",
        )
        .bind(changes.widget_type.map(WidgetType::as_str))
        .bind(changes.position)
        .bind(changes.config.as_ref().map(Json))
        .bind(Utc::now())
        .bind(widget_id.0)
        .fetch_optional(&self.pool)
        .await
        .context("failed to update widget")?;
        row.as_ref().map(widget_from_row).transpose()
    }

    /// Deletes one widget. Sibling positions are left as they are.
    pub async fn delete_widget(&self, widget_id: WidgetId) -> Result<bool> {
        let deleted = sqlx::query("DELETE FROM widgets WHERE id = ?")
            .bind(widget_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted > 0)
    }

    /// Rewrites the positions of a page's widgets to `1..=N` following the
    /// order of `widget_ids`, all in one transaction.
    ///
    /// Every update is scoped to both the widget id and the page id. If one of
    /// them matches no row, or the page's widget count no longer equals the
    /// list length once all updates ran, the transaction is rolled back and the
    /// reason is returned instead of an error.
    pub async fn reorder_widgets(
        &self,
        page_id: PageId,
        widget_ids: &[WidgetId],
    ) -> Result<ReorderOutcome> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (index, widget_id) in widget_ids.iter().enumerate() {
            let position = i64::try_from(index + 1).context("widget position overflow")?;
            let updated = sqlx::query(
                "UPDATE widgets SET position = ?, updated_at = ? WHERE id = ? AND page_id = ?",
            )
            .bind(position)
            .bind(now)
            .bind(widget_id.0)
            .bind(page_id.0)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to move widget {widget_id} to position {position}"))?
            .rows_affected();

            if updated == 0 {
                tx.rollback().await?;
                return Ok(ReorderOutcome::WidgetNotOnPage(*widget_id));
            }
        }

        let actual: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM widgets WHERE page_id = ?")
            .bind(page_id.0)
            .fetch_one(&mut *tx)
            .await?;
        let actual = u64::try_from(actual).unwrap_or_default();
        let expected = widget_ids.len() as u64;
        if actual != expected {
            tx.rollback().await?;
            return Ok(ReorderOutcome::CountChanged { expected, actual });
        }

        tx.commit().await?;
        Ok(ReorderOutcome::Applied)
    }
}

/// True when `error` is the UNIQUE constraint on `pages.route` firing, which
/// happens when two writers claim the same route concurrently.
pub fn is_route_conflict(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<sqlx::Error>()
        .and_then(sqlx::Error::as_database_error)
        .is_some_and(|db_error| {
            db_error.is_unique_violation() && db_error.message().contains("pages.route")
        })
}

fn page_from_row(row: &SqliteRow) -> Result<StoredPage> {
    Ok(StoredPage {
        page_id: PageId(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        route: row.try_get("route")?,
        is_home: row.try_get("is_home")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn widget_from_row(row: &SqliteRow) -> Result<StoredWidget> {
    let raw_type: String = row.try_get("widget_type")?;
    let widget_type = raw_type
        .parse::<WidgetType>()
        .with_context(|| format!("stored widget has unsupported type '{raw_type}'"))?;
    Ok(StoredWidget {
        widget_id: WidgetId(row.try_get::<Uuid, _>("id")?),
        page_id: PageId(row.try_get::<Uuid, _>("page_id")?),
        widget_type,
        position: row.try_get("position")?,
        config: row.try_get::<Json<Value>, _>("config")?.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() || path == ":memory:" {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
