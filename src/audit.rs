use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub actor: String,
    pub entity_type: String,
    pub entity_id: String,
    pub action: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// Collects audit entries while a business transaction runs and writes them
/// in a separate transaction once the primary commit has succeeded. A flush
/// failure is reported to the log and never propagates: the audit trail is
/// best-effort and must not undo the operation that produced it.
#[derive(Debug, Default)]
pub struct AuditRecorder {
    entries: Vec<AuditEntry>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: AuditEntry) {
        self.entries.push(entry);
    }

    /// Returns the number of entries persisted: all of them, or zero when
    /// the flush transaction failed.
    pub fn flush(self, conn: &Connection) -> usize {
        if self.entries.is_empty() {
            return 0;
        }
        let count = self.entries.len();
        match flush_entries(conn, &self.entries) {
            Ok(()) => count,
            Err(e) => {
                warn!(error = %e, entries = count, "audit flush failed, entries dropped");
                0
            }
        }
    }
}

fn flush_entries(conn: &Connection, entries: &[AuditEntry]) -> Result<(), rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO audit_log(id, actor, entity_type, entity_id, action,
                                   old_value, new_value, metadata, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        let created_at = Utc::now().to_rfc3339();
        for entry in entries {
            stmt.execute((
                Uuid::new_v4().to_string(),
                &entry.actor,
                &entry.entity_type,
                &entry.entity_id,
                &entry.action,
                entry.old_value.as_ref().map(|v| v.to_string()),
                entry.new_value.to_string(),
                entry.metadata.to_string(),
                &created_at,
            ))?;
        }
    }
    tx.commit()
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub limit: Option<i64>,
}

/// Newest-first entries for downstream historical reporting.
pub fn list_entries(
    conn: &Connection,
    filter: &AuditFilter,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut sql = String::from(
        "SELECT id, actor, entity_type, entity_id, action, old_value, new_value,
                metadata, created_at
         FROM audit_log",
    );
    let mut clauses: Vec<&str> = Vec::new();
    let mut binds: Vec<String> = Vec::new();
    if let Some(entity_type) = &filter.entity_type {
        clauses.push("entity_type = ?");
        binds.push(entity_type.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        clauses.push("entity_id = ?");
        binds.push(entity_id.clone());
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, rowid DESC");
    let limit = filter.limit.unwrap_or(100).clamp(1, 1000);
    sql.push_str(&format!(" LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(binds.iter()), |r| {
        let old_value: Option<String> = r.get(5)?;
        let new_value: String = r.get(6)?;
        let metadata: Option<String> = r.get(7)?;
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "actor": r.get::<_, String>(1)?,
            "entityType": r.get::<_, String>(2)?,
            "entityId": r.get::<_, String>(3)?,
            "action": r.get::<_, String>(4)?,
            "oldValue": old_value
                .and_then(|v| serde_json::from_str::<serde_json::Value>(&v).ok())
                .unwrap_or(serde_json::Value::Null),
            "newValue": serde_json::from_str::<serde_json::Value>(&new_value)
                .unwrap_or(serde_json::Value::Null),
            "metadata": metadata
                .and_then(|v| serde_json::from_str::<serde_json::Value>(&v).ok())
                .unwrap_or(serde_json::Value::Null),
            "createdAt": r.get::<_, String>(8)?,
        }))
    })?;
    rows.collect()
}
