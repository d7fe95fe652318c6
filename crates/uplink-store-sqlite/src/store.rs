//! [`SqliteArchive`]: the SQLite implementation of [`CommandArchive`].

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::warn;
use uplink_core::{
  archive::{CommandArchive, HistoricalRow, LookupQuery},
  status::{CommandStatus, MasterKey},
};

use crate::{
  Result,
  encode::{RawHistoricalRow, encode_dt, encode_status},
  schema::SCHEMA,
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// A request registered by the session that radiated it.
#[derive(Debug, Clone)]
pub struct NewCommand {
  pub key:           MasterKey,
  pub request_id:    String,
  pub original_file: Option<String>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A command store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteArchive {
  conn: tokio_rusqlite::Connection,
}

impl SqliteArchive {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Register a request radiated by a session. Registering the same request
  /// twice is a no-op.
  pub async fn record_command(&self, cmd: NewCommand) -> Result<()> {
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO command_messages (
             host_id, session_id, session_fragment, request_id,
             original_file, finalized, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
          rusqlite::params![
            cmd.key.host_id,
            cmd.key.session_id,
            cmd.key.session_fragment,
            cmd.request_id,
            cmd.original_file,
            at_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert one observed status for the request owned by `key`.
  ///
  /// Creates the owning command row if the session never registered it.
  /// Returns `false` when this status was already recorded.
  pub async fn record_status(
    &self,
    key:        MasterKey,
    request_id: &str,
    status:     CommandStatus,
    event_time: DateTime<Utc>,
  ) -> Result<bool> {
    let request_id = request_id.to_owned();
    let status_str = encode_status(status).to_owned();
    let event_str  = encode_dt(event_time);
    let at_str     = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO command_messages (
             host_id, session_id, session_fragment, request_id,
             original_file, finalized, recorded_at
           ) VALUES (?1, ?2, ?3, ?4, NULL, 0, ?5)",
          rusqlite::params![
            key.host_id,
            key.session_id,
            key.session_fragment,
            request_id,
            at_str,
          ],
        )?;
        let n = tx.execute(
          "INSERT OR IGNORE INTO command_statuses (
             host_id, session_id, session_fragment, request_id,
             status, event_time
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            key.host_id,
            key.session_id,
            key.session_fragment,
            request_id,
            status_str,
            event_str,
          ],
        )?;
        tx.commit()?;
        Ok(n > 0)
      })
      .await?;

    Ok(inserted)
  }

  /// Whether the request owned by `key` is marked finalized. `None` when the
  /// request is unknown.
  pub async fn is_finalized(
    &self,
    key:        MasterKey,
    request_id: &str,
  ) -> Result<Option<bool>> {
    use rusqlite::OptionalExtension as _;

    let request_id = request_id.to_owned();
    let finalized = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT finalized FROM command_messages
               WHERE host_id = ?1 AND session_id = ?2
                 AND session_fragment = ?3 AND request_id = ?4",
              rusqlite::params![
                key.host_id,
                key.session_id,
                key.session_fragment,
                request_id,
              ],
              |row| row.get::<_, bool>(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(finalized)
  }
  /// One page of raw lookup rows after `query.cursor`.
  ///
  /// The request-ids are staged in a temp table and joined against, so the
  /// id set is not bounded by SQLite's host-parameter limit.
  async fn fetch_raw_page(&self, query: &LookupQuery) -> Result<Vec<RawHistoricalRow>> {
    let request_ids: Vec<String> = query.request_ids.iter().cloned().collect();
    let epoch = query.epoch_start.map(encode_dt);
    let cursor = query.cursor.unwrap_or(0);
    let limit = query.batch_size as i64;

    let raws = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute_batch(
          "CREATE TEMP TABLE IF NOT EXISTS lookup_ids (request_id TEXT PRIMARY KEY);
           DELETE FROM temp.lookup_ids;",
        )?;
        {
          let mut insert =
            tx.prepare("INSERT OR IGNORE INTO temp.lookup_ids (request_id) VALUES (?1)")?;
          for id in &request_ids {
            insert.execute([id])?;
          }
        }

        let rows = {
          let mut stmt = tx.prepare(
            "SELECT
               s.status_id, s.request_id, s.status, s.event_time,
               s.session_id, s.host_id, s.session_fragment,
               m.finalized, m.original_file
             FROM command_statuses s
             JOIN temp.lookup_ids l ON l.request_id = s.request_id
             JOIN command_messages m
               ON  m.host_id          = s.host_id
               AND m.session_id       = s.session_id
               AND m.session_fragment = s.session_fragment
               AND m.request_id       = s.request_id
             WHERE (?1 IS NULL OR s.event_time >= ?1)
               AND s.status_id > ?2
             ORDER BY s.status_id
             LIMIT ?3",
          )?;
          stmt
            .query_map(rusqlite::params![epoch, cursor, limit], |row| {
              Ok(RawHistoricalRow {
                status_id:        row.get(0)?,
                request_id:       row.get(1)?,
                status:           row.get(2)?,
                event_time:       row.get(3)?,
                session_id:       row.get(4)?,
                host_id:          row.get(5)?,
                session_fragment: row.get(6)?,
                finalized:        row.get(7)?,
                original_file:    row.get(8)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute("DELETE FROM temp.lookup_ids", [])?;
        tx.commit()?;
        Ok(rows)
      })
      .await?;
    Ok(raws)
  }

  #[cfg(test)]
  pub(crate) async fn overwrite_status_text(&self, request_id: &str, text: &str) -> Result<()> {
    let (request_id, text) = (request_id.to_owned(), text.to_owned());
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE command_statuses SET status = ?2 WHERE request_id = ?1",
          rusqlite::params![request_id, text],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── CommandArchive impl ─────────────────────────────────────────────────────

impl CommandArchive for SqliteArchive {
  type Error = crate::Error;

  async fn fetch_batch(&self, query: &mut LookupQuery) -> Result<Vec<HistoricalRow>> {
    if query.request_ids.is_empty() {
      return Ok(Vec::new());
    }

    // Rows that fail to decode are skipped, so keep reading until a page
    // yields something or the lookup is exhausted.
    loop {
      let raws = self.fetch_raw_page(query).await?;
      let Some(last) = raws.last() else {
        return Ok(Vec::new());
      };
      query.cursor = Some(last.status_id);

      let rows: Vec<HistoricalRow> = raws
        .into_iter()
        .filter_map(|raw| {
          let (status_id, request_id) = (raw.status_id, raw.request_id.clone());
          raw
            .into_row()
            .inspect_err(|e| {
              warn!(status_id, %request_id, error = %e, "Skipping undecodable status row");
            })
            .ok()
        })
        .collect();

      if !rows.is_empty() {
        return Ok(rows);
      }
    }
  }

  async fn finalize(&self, key: MasterKey, request_id: &str) -> Result<()> {
    let request_id = request_id.to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE command_messages SET finalized = 1
           WHERE host_id = ?1 AND session_id = ?2
             AND session_fragment = ?3 AND request_id = ?4",
          rusqlite::params![
            key.host_id,
            key.session_id,
            key.session_fragment,
            request_id,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
