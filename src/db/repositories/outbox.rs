use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_signals, signals_to_json},
};
use crate::models::ClassifiedMessage;

fn row_to_message(row: &Row) -> Result<ClassifiedMessage> {
    let signals_json: String = row.get("signals_json")?;

    Ok(ClassifiedMessage {
        contact_name: row.get("chat_name")?,
        text: row.get("text")?,
        is_incoming: row.get("is_incoming")?,
        timestamp_millis: row.get("timestamp_millis")?,
        display_timestamp: row.get("display_timestamp")?,
        confidence_signals: parse_signals(&signals_json, "signals_json")?,
    })
}

impl Database {
    /// Keep a failed batch for replay; rows already queued are left as is.
    pub async fn save_outbox(&self, chat_name: &str, batch: &[ClassifiedMessage]) -> Result<usize> {
        let chat_name = chat_name.to_string();
        let records = batch.to_vec();
        self.transaction(move |tx| {
            let queued_at = Utc::now().to_rfc3339();
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO sync_outbox
                    (chat_name, text, is_incoming, timestamp_millis, display_timestamp, signals_json, queued_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut inserted = 0;
            for record in &records {
                inserted += stmt
                    .execute(params![
                        chat_name,
                        record.text,
                        record.is_incoming,
                        record.timestamp_millis,
                        record.display_timestamp,
                        signals_to_json(&record.confidence_signals)?,
                        queued_at,
                    ])
                    .with_context(|| format!("failed to queue message for {chat_name}"))?;
            }
            Ok(inserted)
        })
        .await
    }

    /// Remove rows matching a batch the backend has accepted.
    pub async fn discard_outbox(&self, chat_name: &str, batch: &[ClassifiedMessage]) -> Result<usize> {
        let chat_name = chat_name.to_string();
        let keys: Vec<(String, i64)> = batch
            .iter()
            .map(|m| (m.text.clone(), m.timestamp_millis))
            .collect();
        self.transaction(move |tx| {
            let mut stmt = tx.prepare(
                "DELETE FROM sync_outbox
                 WHERE chat_name = ?1 AND text = ?2 AND timestamp_millis = ?3",
            )?;
            let mut removed = 0;
            for (text, timestamp_millis) in &keys {
                removed += stmt.execute(params![chat_name, text, timestamp_millis])?;
            }
            Ok(removed)
        })
        .await
    }

    /// Every queued message, grouped by chat and in original order.
    pub async fn load_outbox(&self) -> Result<Vec<ClassifiedMessage>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_name, text, is_incoming, timestamp_millis, display_timestamp, signals_json
                 FROM sync_outbox
                 ORDER BY chat_name, timestamp_millis, id",
            )?;

            let mut rows = stmt.query([])?;
            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(row_to_message(row)?);
            }
            Ok(messages)
        })
        .await
    }

    pub async fn clear_outbox(&self) -> Result<()> {
        self.execute(|conn| {
            conn.execute("DELETE FROM sync_outbox", [])?;
            Ok(())
        })
        .await
    }
}
