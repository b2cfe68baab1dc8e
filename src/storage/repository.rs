use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{OpKind, QueuedOp, Task, TaskPayload, TaskStatus};

// ── Tasks ──────────────────────────────────────────────────────────

fn task_from_row(row: &Row<'_>) -> Result<Task, rusqlite::Error> {
    let status: String = row.get(3)?;
    let status = status.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status,
        due_date: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        synced: row.get(7)?,
        local_id: row.get(8)?,
    })
}

const TASK_COLUMNS: &str =
    "id, title, description, status, due_date, created_at, updated_at, synced, local_id";

/// Upsert a task by identifier. `local_id` defaults to the identifier
/// itself when unset, so the provisional→server transition can always be
/// traced back. Last writer for a given id wins.
pub fn save_task(conn: &Connection, task: &Task) -> Result<(), rusqlite::Error> {
    let local_id = task.local_id.as_deref().unwrap_or(&task.id);
    conn.execute(
        "INSERT INTO tasks (id, title, description, status, due_date,
                            created_at, updated_at, synced, local_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
             title=excluded.title, description=excluded.description,
             status=excluded.status, due_date=excluded.due_date,
             created_at=excluded.created_at, updated_at=excluded.updated_at,
             synced=excluded.synced, local_id=excluded.local_id",
        params![
            task.id,
            task.title,
            task.description,
            task.status.as_str(),
            task.due_date,
            task.created_at,
            task.updated_at,
            task.synced,
            local_id,
        ],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, id: &str) -> Result<Option<Task>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
        params![id],
        task_from_row,
    )
    .optional()
}

/// Look a task up by its retained provisional identifier. After a CREATE
/// has been acknowledged the row's `id` is the server ID but `local_id`
/// still carries the provisional one.
pub fn get_task_by_local_id(
    conn: &Connection,
    local_id: &str,
) -> Result<Option<Task>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE local_id = ?1"),
        params![local_id],
        task_from_row,
    )
    .optional()
}

/// All tasks, unordered. Callers sort.
pub fn list_tasks(conn: &Connection) -> Result<Vec<Task>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks"))?;
    let rows = stmt.query_map([], task_from_row)?;
    rows.collect()
}

pub fn delete_task(conn: &Connection, id: &str) -> Result<bool, rusqlite::Error> {
    let affected = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
    Ok(affected > 0)
}

/// Swap a provisional row for its server-acknowledged form in one
/// transaction: the row keyed by the provisional id goes away and the
/// server task (with `local_id` retained) takes its place.
pub fn replace_provisional(
    conn: &Connection,
    local_id: &str,
    task: &Task,
) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM tasks WHERE id = ?1", params![local_id])?;
    save_task(&tx, task)?;
    tx.commit()
}

// ── Mutation queue ─────────────────────────────────────────────────

fn op_from_row(row: &Row<'_>) -> Result<QueuedOp, rusqlite::Error> {
    let kind: String = row.get(1)?;
    let kind = kind.parse::<OpKind>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let payload: String = row.get(4)?;
    let payload: TaskPayload = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(QueuedOp {
        id: row.get(0)?,
        kind,
        local_id: row.get(2)?,
        task_id: row.get(3)?,
        payload,
        queued_at: row.get(5)?,
        retries: row.get(6)?,
    })
}

/// Append an operation with a fresh sequence number and retries=0.
/// Returns the sequence number. Never reorders or deduplicates.
pub fn enqueue_op(
    conn: &Connection,
    kind: OpKind,
    local_id: Option<&str>,
    task_id: Option<&str>,
    payload: &TaskPayload,
) -> Result<i64, rusqlite::Error> {
    let payload =
        serde_json::to_string(payload).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO sync_queue (kind, local_id, task_id, payload, queued_at, retries)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![kind.as_str(), local_id, task_id, payload, Utc::now()],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Pending operations in enqueue order (sequence ascending). Replay must
/// follow this order so a CREATE is never replayed after an UPDATE that
/// depends on the server ID it produces.
pub fn list_pending_ops(conn: &Connection) -> Result<Vec<QueuedOp>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT id, kind, local_id, task_id, payload, queued_at, retries
         FROM sync_queue ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], op_from_row)?;
    rows.collect()
}

pub fn remove_op(conn: &Connection, op_id: i64) -> Result<bool, rusqlite::Error> {
    let affected = conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![op_id])?;
    Ok(affected > 0)
}

/// Bump the retry counter after a failed replay. The operation stays
/// queued; only a successful replay removes it.
pub fn increment_retry(conn: &Connection, op_id: i64) -> Result<(), rusqlite::Error> {
    conn.execute(
        "UPDATE sync_queue SET retries = retries + 1 WHERE id = ?1",
        params![op_id],
    )?;
    Ok(())
}

pub fn pending_count(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))
}

// ── App config ─────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}
