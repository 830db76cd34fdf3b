use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use uuid::Uuid;

use crate::db::cancel::Interruption;
use crate::db::lock_or_recover;
use crate::db::session::Session;
use crate::error::{Error, Result};

use super::pagination::{parse_link, LinkTarget};
use super::types::{SqlResultSet, SqlResultSetMetadata};

#[derive(Debug, Clone, Copy)]
struct Progress {
    offset: usize,
    has_more: bool,
}

/// Resets the busy flag when a fetch ends, however it ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Forward-only pages of one query.
///
/// The first page is fetched by [`Session::execute_query`]; [`ResultSet::next`]
/// fetches the following ones. Only one fetch may be in flight at a time.
pub struct ResultSet {
    session: Session,
    first: SqlResultSet,
    cursor: Option<Uuid>,
    progress: Mutex<Progress>,
    busy: AtomicBool,
    closed: AtomicBool,
    interruption: Interruption,
}

impl ResultSet {
    pub(crate) fn new(session: Session, first: SqlResultSet, interruption: Interruption) -> Self {
        let cursor = first
            .next_link()
            .and_then(|link| parse_link(&link.href))
            .filter(|(target, _, _)| *target == LinkTarget::Cursor)
            .map(|(_, id, _)| id);
        let progress = Progress {
            offset: first.offset + first.count,
            has_more: first.has_more && cursor.is_some(),
        };
        Self {
            session,
            first,
            cursor,
            progress: Mutex::new(progress),
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(cursor.is_none()),
            interruption,
        }
    }

    pub fn first_page(&self) -> &SqlResultSet {
        &self.first
    }

    pub fn metadata(&self) -> &[SqlResultSetMetadata] {
        &self.first.metadata
    }

    /// Rows handed out so far.
    pub fn offset(&self) -> usize {
        lock_or_recover(&self.progress, "result set progress").offset
    }

    pub fn has_next(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && lock_or_recover(&self.progress, "result set progress").has_more
    }

    /// The page after the last one returned.
    ///
    /// Fails with `ConcurrentAccess` while another `next` is running,
    /// `CursorExpired` once the rows are exhausted or the set is closed, and
    /// `Cancelled` when the query's cancel token or timeout fires; a cancelled
    /// result set can still be closed.
    pub async fn next(&self) -> Result<SqlResultSet> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(Error::ConcurrentAccess(
                "another page of this result set is being fetched".to_string(),
            ));
        }
        let _busy = BusyGuard(&self.busy);

        let progress = *lock_or_recover(&self.progress, "result set progress");
        let cursor = match self.cursor {
            Some(cursor) if progress.has_more && !self.closed.load(Ordering::SeqCst) => cursor,
            _ => {
                return Err(Error::CursorExpired(format!(
                    "result set has no rows after offset {}",
                    progress.offset
                )))
            }
        };

        let page = self
            .session
            .cursors()
            .fetch(cursor, progress.offset, &self.interruption)
            .await?;
        {
            let mut progress = lock_or_recover(&self.progress, "result set progress");
            progress.offset = page.offset + page.count;
            progress.has_more = page.has_more;
        }
        if !page.has_more {
            self.closed.store(true, Ordering::SeqCst);
        }
        Ok(page)
    }

    /// Releases the server cursor. Safe to call any number of times.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(cursor) = self.cursor {
            self.session.release_cursor(cursor).await;
        }
        Ok(())
    }
}

impl Drop for ResultSet {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Some(cursor) = self.cursor {
                self.session.forget_cursor(cursor);
            }
        }
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("cursor", &self.cursor)
            .field("offset", &self.offset())
            .field("has_next", &self.has_next())
            .finish()
    }
}
