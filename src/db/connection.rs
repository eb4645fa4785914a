use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct Worker {
    sender: mpsc::Sender<DbCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        if self.sender.send(DbCommand::Shutdown).is_err() {
            error!("Outbox DB thread already gone at shutdown");
        }
        if let Err(join_err) = handle.join() {
            error!("Failed to join outbox DB thread: {join_err:?}");
        }
    }
}

/// Local SQLite store for messages the backend has not accepted yet.
///
/// The connection lives on its own thread; async callers hand it closures
/// and await the reply, so the engine task never blocks on disk I/O.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Option<Arc<PathBuf>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let path_for_thread = db_path.clone();
        let worker = spawn_worker(move || {
            let conn = Connection::open(&path_for_thread)?;
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                error!("Failed to enable WAL mode: {err}");
            }
            Ok(conn)
        })?;
        info!("Outbox database ready at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(worker),
            path: Some(Arc::new(db_path)),
        })
    }

    /// Throwaway database; nothing survives the last clone being dropped.
    pub fn in_memory() -> Result<Self> {
        let worker = spawn_worker(Connection::open_in_memory)?;
        Ok(Self {
            worker: Arc::new(worker),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                error!("Outbox caller dropped before receiving result");
            }
        }));

        self.worker
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to outbox DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("outbox DB thread terminated unexpectedly"))?
    }

    /// Run `task` in a transaction that commits only when it returns `Ok`.
    pub async fn transaction<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to begin transaction")?;
            let value = task(&tx)?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
        .await
    }
}

fn spawn_worker<O>(open: O) -> Result<Worker>
where
    O: FnOnce() -> rusqlite::Result<Connection> + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let thread = thread::Builder::new()
        .name("replycue-db".into())
        .spawn(move || {
            let mut conn = match open().context("failed to open SQLite database") {
                Ok(conn) => conn,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                error!("Failed to set busy timeout: {err}");
            }

            let init_result = run_migrations(&mut conn).context("failed to run database migrations");
            if ready_tx.send(init_result).is_err() {
                return;
            }

            for command in command_rx {
                match command {
                    DbCommand::Execute(task) => task(&mut conn),
                    DbCommand::Shutdown => break,
                }
            }
            info!("Outbox DB thread shutting down");
        })
        .context("failed to spawn database worker thread")?;

    ready_rx
        .recv()
        .context("database worker exited before signaling readiness")??;

    Ok(Worker {
        sender: command_tx,
        thread: Mutex::new(Some(thread)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failed_transactions_roll_back() {
        let db = Database::in_memory().unwrap();
        assert!(db.path().is_none());

        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO sync_outbox (chat_name, text, is_incoming, timestamp_millis, display_timestamp, queued_at)
                     VALUES ('Alice', 'Hi', 1, 1, '10:00', 'now')",
                    [],
                )?;
                Err(anyhow!("abort"))
            })
            .await;
        assert!(result.is_err());

        let rows: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM sync_outbox", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn file_database_reports_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.sqlite3");
        let db = Database::new(path.clone()).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
    }
}
