//! Fixed-size row pages over server-side cursors, and the continuation links
//! that resume them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::{Number, Value};
use uuid::Uuid;

use crate::db::cancel::Interruption;
use crate::db::driver::{CursorId, DriverHandle, RawRow};
use crate::error::{Error, Result};

use super::types::{Hyperlink, SqlResultSet, SqlResultSetMetadata, SqlResultSetRow, SqlScriptError};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkTarget {
    Cursor,
    Script,
}

impl LinkTarget {
    fn prefix(self) -> &'static str {
        match self {
            LinkTarget::Cursor => "cursor",
            LinkTarget::Script => "script",
        }
    }
}

pub(crate) fn next_link(target: LinkTarget, id: Uuid, offset: usize) -> Hyperlink {
    let title = match target {
        LinkTarget::Cursor => "Next page of rows",
        LinkTarget::Script => "Next page of statements",
    };
    Hyperlink::next(format!("{}/{id}?offset={offset}", target.prefix()), title)
}

/// Splits `cursor/{id}?offset=N` or `script/{id}?offset=N`.
pub(crate) fn parse_link(href: &str) -> Option<(LinkTarget, Uuid, usize)> {
    let (path, query) = href.trim().split_once('?')?;
    let (prefix, id) = path.trim_start_matches('/').split_once('/')?;
    let target = match prefix {
        "cursor" => LinkTarget::Cursor,
        "script" => LinkTarget::Script,
        _ => return None,
    };
    let id = Uuid::parse_str(id).ok()?;
    let offset = query
        .split('&')
        .find_map(|pair| pair.strip_prefix("offset="))?
        .parse()
        .ok()?;
    Some((target, id, offset))
}

pub(crate) fn expired_link(href: &str) -> Error {
    Error::CursorExpired(format!("`{href}` does not name a live cursor"))
}

/// Fills `json_column_name`: lower-cased column names, repeats suffixed `_1`, `_2`, ...
pub(crate) fn assign_json_names(metadata: &mut [SqlResultSetMetadata]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (idx, column) in metadata.iter_mut().enumerate() {
        let base = column
            .column_name
            .as_deref()
            .map(str::to_lowercase)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("column_{}", idx + 1));
        let repeats = seen.entry(base.clone()).or_insert(0);
        column.json_column_name = Some(if *repeats == 0 {
            base
        } else {
            format!("{base}_{repeats}")
        });
        *repeats += 1;
    }
}

pub(crate) fn json_row(metadata: &[SqlResultSetMetadata], row: RawRow) -> SqlResultSetRow {
    metadata
        .iter()
        .zip(row.into_iter().chain(std::iter::repeat(None)))
        .map(|(column, value)| {
            let key = column.json_column_name.clone().unwrap_or_default();
            (key, json_value(column.column_type_name.as_deref(), value))
        })
        .collect()
}

/// NUMBER values become JSON numbers when that loses nothing.
fn json_value(type_name: Option<&str>, value: Option<String>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };
    let numeric = type_name.is_some_and(|name| {
        let name = name.to_uppercase();
        name.starts_with("NUMBER")
            || name.starts_with("FLOAT")
            || name.starts_with("BINARY_")
            || name.starts_with("INTEGER")
    });
    if !numeric {
        return Value::String(value);
    }
    let trimmed = value.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::Number(int.into());
    }
    match trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(number) if number.to_string() == normalize_decimal(trimmed) => Value::Number(number),
        _ => Value::String(value),
    }
}

/// `.5` -> `0.5`, `-.5` -> `-0.5`; Oracle omits the leading zero.
fn normalize_decimal(text: &str) -> String {
    if let Some(rest) = text.strip_prefix("-.") {
        return format!("-0.{rest}");
    }
    if let Some(rest) = text.strip_prefix('.') {
        return format!("0.{rest}");
    }
    text.to_string()
}

fn fetch_error(err: SqlScriptError, interruption: &Interruption) -> Error {
    if interruption.is_triggered() {
        Error::Cancelled
    } else {
        Error::Statement(err)
    }
}

/// An open query read one page at a time.
///
/// Each page fetches one row past the page size; that row is held back as the
/// first row of the next page, so `has_more` is known without draining the
/// cursor. The server cursor is released as soon as the last row is handed out.
pub(crate) struct PageCursor {
    handle: DriverHandle,
    cursor: CursorId,
    metadata: Vec<SqlResultSetMetadata>,
    page_size: usize,
    offset: usize,
    lookahead: Option<RawRow>,
    drained: bool,
    released: bool,
    last_used: Instant,
}

impl PageCursor {
    pub(crate) fn new(
        handle: DriverHandle,
        cursor: CursorId,
        mut metadata: Vec<SqlResultSetMetadata>,
        page_size: usize,
    ) -> Self {
        assign_json_names(&mut metadata);
        Self {
            handle,
            cursor,
            metadata,
            page_size: page_size.max(1),
            offset: 0,
            lookahead: None,
            drained: false,
            released: false,
            last_used: Instant::now(),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        self.last_used.elapsed() > timeout
    }

    fn is_finished(&self) -> bool {
        self.drained && self.lookahead.is_none()
    }

    pub(crate) async fn next_page(&mut self, interruption: &Interruption) -> Result<SqlResultSet> {
        self.last_used = Instant::now();
        if self.released && self.lookahead.is_none() {
            return Err(Error::CursorExpired(format!(
                "cursor is exhausted after {} rows",
                self.offset
            )));
        }

        let rows = self.fetch_rows(self.page_size + 1, interruption).await?;
        let mut items: Vec<RawRow> = rows;
        let has_more = items.len() > self.page_size;
        if has_more {
            self.lookahead = items.pop();
        }

        let page = SqlResultSet {
            metadata: self.metadata.clone(),
            count: items.len(),
            items: items
                .into_iter()
                .map(|row| json_row(&self.metadata, row))
                .collect(),
            has_more,
            offset: self.offset,
            limit: Some(self.page_size),
            links: Vec::new(),
        };
        self.offset += page.count;
        if !has_more {
            self.release().await;
        }
        Ok(page)
    }

    /// Reads every remaining row into one page.
    pub(crate) async fn collect_all(
        mut self,
        batch_size: usize,
        interruption: &Interruption,
    ) -> Result<SqlResultSet> {
        let mut rows = Vec::new();
        while !self.is_finished() {
            let batch = self.fetch_rows(batch_size.max(1), interruption).await?;
            rows.extend(batch);
        }
        self.release().await;

        Ok(SqlResultSet {
            metadata: self.metadata.clone(),
            count: rows.len(),
            items: rows
                .into_iter()
                .map(|row| json_row(&self.metadata, row))
                .collect(),
            has_more: false,
            offset: 0,
            limit: None,
            links: Vec::new(),
        })
    }

    /// Up to `want` rows, held-back row first.
    async fn fetch_rows(&mut self, want: usize, interruption: &Interruption) -> Result<Vec<RawRow>> {
        let mut rows: Vec<RawRow> = self.lookahead.take().into_iter().collect();
        if self.drained || rows.len() >= want {
            return Ok(rows);
        }

        let missing = want - rows.len();
        let cursor = self.cursor;
        let fetched = match self
            .handle
            .call(interruption, move |driver| driver.fetch(cursor, missing))
            .await?
        {
            Ok(fetched) => fetched,
            Err(err) => {
                self.lookahead = rows.pop();
                return Err(fetch_error(err, interruption));
            }
        };
        if fetched.len() < missing {
            self.drained = true;
        }
        rows.extend(fetched);
        Ok(rows)
    }

    /// Closes the server cursor once; later calls do nothing.
    pub(crate) async fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let cursor = self.cursor;
        match self
            .handle
            .call(&Interruption::default(), move |driver| driver.close_cursor(cursor))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => eprintln!("Warning: failed to release cursor {cursor}: {err}"),
            Err(err) => eprintln!("Warning: failed to release cursor {cursor}: {err}"),
        }
    }
}

impl Drop for PageCursor {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.handle.release_detached(self.cursor);
        }
    }
}

type CursorEntry = Arc<tokio::sync::Mutex<PageCursor>>;

/// Page cursors a session keeps open for continuation links.
pub(crate) struct CursorRegistry {
    entries: Mutex<HashMap<Uuid, CursorEntry>>,
    idle_timeout: Duration,
}

impl CursorRegistry {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<Uuid, CursorEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                eprintln!("Warning: cursor registry lock was poisoned; recovering.");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) async fn register(&self, cursor: PageCursor) -> Uuid {
        self.sweep().await;
        let id = Uuid::new_v4();
        self.lock_entries()
            .insert(id, Arc::new(tokio::sync::Mutex::new(cursor)));
        id
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: Uuid) -> bool {
        self.lock_entries().contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock_entries().len()
    }

    /// The page starting at `offset`.
    ///
    /// Fails with `CursorExpired` when the cursor is gone, idle for too long or
    /// already past `offset`, and with `ConcurrentAccess` while another fetch on
    /// the same cursor is in flight.
    pub(crate) async fn fetch(
        &self,
        id: Uuid,
        offset: usize,
        interruption: &Interruption,
    ) -> Result<SqlResultSet> {
        let entry = self.lock_entries().get(&id).cloned().ok_or_else(|| {
            Error::CursorExpired(format!("cursor {id} is exhausted or closed"))
        })?;
        let Ok(mut cursor) = entry.try_lock() else {
            return Err(Error::ConcurrentAccess(format!(
                "cursor {id} is already fetching a page"
            )));
        };

        if cursor.is_idle(self.idle_timeout) {
            cursor.release().await;
            self.lock_entries().remove(&id);
            return Err(Error::CursorExpired(format!(
                "cursor {id} was idle for longer than {}s",
                self.idle_timeout.as_secs()
            )));
        }
        if cursor.offset() != offset {
            return Err(Error::CursorExpired(format!(
                "offset {offset} is stale; cursor {id} is at row {}",
                cursor.offset()
            )));
        }

        let mut page = match cursor.next_page(interruption).await {
            Ok(page) => page,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                cursor.release().await;
                self.lock_entries().remove(&id);
                return Err(err);
            }
        };
        if page.has_more {
            page.links.push(next_link(LinkTarget::Cursor, id, cursor.offset()));
        } else {
            self.lock_entries().remove(&id);
        }
        Ok(page)
    }

    /// Closes the cursor if it is still registered. Returns whether it was.
    pub(crate) async fn release(&self, id: Uuid) -> bool {
        let Some(entry) = self.lock_entries().remove(&id) else {
            return false;
        };
        entry.lock().await.release().await;
        true
    }

    /// Unregisters without waiting; the cursor is released in the background.
    pub(crate) fn forget(&self, id: Uuid) {
        self.lock_entries().remove(&id);
    }

    pub(crate) async fn release_all(&self) {
        let entries: Vec<CursorEntry> = self.lock_entries().drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            entry.lock().await.release().await;
        }
    }

    /// Drops cursors nobody has touched within the idle timeout.
    async fn sweep(&self) {
        let idle: Vec<(Uuid, CursorEntry)> = self
            .lock_entries()
            .iter()
            .filter(|(_, entry)| {
                entry
                    .try_lock()
                    .map(|cursor| cursor.is_idle(self.idle_timeout))
                    .unwrap_or(false)
            })
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();
        for (id, entry) in idle {
            self.lock_entries().remove(&id);
            entry.lock().await.release().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::DatabaseDriver;
    use crate::db::test_support::{mock_info, MockDriver, MockResponse};

    fn column(name: &str, type_name: &str) -> SqlResultSetMetadata {
        SqlResultSetMetadata {
            column_name: Some(name.to_string()),
            column_type_name: Some(type_name.to_string()),
            ..SqlResultSetMetadata::default()
        }
    }

    async fn open_cursor(driver: &MockDriver, page_size: usize) -> PageCursor {
        let session = driver.connect(&mock_info("paging")).expect("connect");
        let handle = DriverHandle::new(session);
        let (cursor, metadata) = handle
            .call(&Interruption::default(), |driver| {
                driver.open_cursor("SELECT n FROM numbers", &[])
            })
            .await
            .expect("call")
            .expect("open");
        PageCursor::new(handle, cursor, metadata, page_size)
    }

    #[test]
    fn json_names_are_lowercased_and_deduplicated() {
        let mut metadata = vec![
            column("ID", "NUMBER"),
            column("NAME", "VARCHAR2"),
            column("ID", "NUMBER"),
            column("id", "NUMBER"),
        ];
        assign_json_names(&mut metadata);
        let names: Vec<_> = metadata
            .iter()
            .map(|column| column.json_column_name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["id", "name", "id_1", "id_2"]);
    }

    #[test]
    fn numbers_become_json_numbers_when_exact() {
        let mut metadata = vec![column("N", "NUMBER"), column("S", "VARCHAR2")];
        assign_json_names(&mut metadata);
        let row = json_row(&metadata, vec![Some("42".into()), Some("42".into())]);
        assert_eq!(row["n"], serde_json::json!(42));
        assert_eq!(row["s"], serde_json::json!("42"));

        let row = json_row(&metadata, vec![Some(".5".into()), None]);
        assert_eq!(row["n"], serde_json::json!(0.5));
        assert_eq!(row["s"], Value::Null);

        let row = json_row(&metadata, vec![Some("123456789012345678901234567890".into()), None]);
        assert_eq!(row["n"], serde_json::json!("123456789012345678901234567890"));
    }

    #[test]
    fn links_parse_back() {
        let id = Uuid::new_v4();
        let link = next_link(LinkTarget::Cursor, id, 50);
        assert!(link.is_next());
        assert_eq!(parse_link(&link.href), Some((LinkTarget::Cursor, id, 50)));
        assert_eq!(parse_link("cursor/not-a-uuid?offset=1"), None);
        assert_eq!(parse_link("rows/x"), None);
    }

    #[tokio::test]
    async fn page_counts_sum_to_total_and_only_last_page_ends() {
        for (total, page_size) in [(0usize, 3usize), (7, 3), (9, 3), (1, 1), (10, 25)] {
            let driver = MockDriver::new();
            driver.on("NUMBERS", MockResponse::numbered(total));
            let mut cursor = open_cursor(&driver, page_size).await;

            let mut pages = Vec::new();
            loop {
                let page = cursor.next_page(&Interruption::default()).await.expect("page");
                let more = page.has_more;
                pages.push(page);
                if !more {
                    break;
                }
            }

            let sum: usize = pages.iter().map(|page| page.count).sum();
            assert_eq!(sum, total, "total {total}, page size {page_size}");
            let last = pages.len() - 1;
            for (idx, page) in pages.iter().enumerate() {
                assert_eq!(page.has_more, idx != last);
                assert_eq!(page.count, page.items.len());
            }
            let offsets: Vec<usize> = pages.iter().map(|page| page.offset).collect();
            let expected: Vec<usize> = (0..pages.len()).map(|idx| idx * page_size).collect();
            assert_eq!(offsets, expected);
            assert_eq!(driver.open_cursors(), 0);
        }
    }

    #[tokio::test]
    async fn exhausted_cursor_expires() {
        let driver = MockDriver::new();
        driver.on("NUMBERS", MockResponse::numbered(2));
        let mut cursor = open_cursor(&driver, 5).await;
        let page = cursor.next_page(&Interruption::default()).await.expect("page");
        assert!(!page.has_more);
        let err = cursor
            .next_page(&Interruption::default())
            .await
            .expect_err("exhausted");
        assert!(matches!(err, Error::CursorExpired(_)));
    }

    #[tokio::test]
    async fn registry_rejects_stale_offsets_and_missing_cursors() {
        let driver = MockDriver::new();
        driver.on("NUMBERS", MockResponse::numbered(10));
        let mut cursor = open_cursor(&driver, 4).await;
        cursor.next_page(&Interruption::default()).await.expect("first page");

        let registry = CursorRegistry::new(Duration::from_secs(60));
        let id = registry.register(cursor).await;

        let stale = registry.fetch(id, 0, &Interruption::default()).await;
        assert!(matches!(stale, Err(Error::CursorExpired(_))));

        let second = registry
            .fetch(id, 4, &Interruption::default())
            .await
            .expect("second page");
        assert_eq!(second.offset, 4);
        assert_eq!(
            second.next_link().map(|link| link.href.clone()),
            Some(format!("cursor/{id}?offset=8"))
        );

        let last = registry
            .fetch(id, 8, &Interruption::default())
            .await
            .expect("last page");
        assert!(!last.has_more);
        assert!(!registry.contains(id));

        let gone = registry.fetch(id, 10, &Interruption::default()).await;
        assert!(matches!(gone, Err(Error::CursorExpired(_))));
    }

    #[tokio::test]
    async fn idle_cursors_expire() {
        let driver = MockDriver::new();
        driver.on("NUMBERS", MockResponse::numbered(10));
        let mut cursor = open_cursor(&driver, 2).await;
        cursor.next_page(&Interruption::default()).await.expect("first page");

        let registry = CursorRegistry::new(Duration::from_millis(1));
        let id = registry.register(cursor).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let expired = registry.fetch(id, 2, &Interruption::default()).await;
        assert!(matches!(expired, Err(Error::CursorExpired(_))));
        assert_eq!(driver.open_cursors(), 0);
    }
}
