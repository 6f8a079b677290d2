//! JSON Lines Snapshot Store
//!
//! Append-only `SnapshotStore` writing one JSON document per line into a
//! file per record kind:
//!
//! | Record     | File                |
//! |------------|---------------------|
//! | snapshot   | `snapshots.jsonl`   |
//! | trade      | `trades.jsonl`      |
//! | candle     | `candles.jsonl`     |
//! | order book | `order_books.jsonl` |
//!
//! Each line is written with a single `write_all` while holding the
//! store's lock, so concurrent writers never interleave partial lines.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::application::ports::{PersistenceError, SnapshotStore};
use crate::domain::streaming::{CandleUpdate, DepthSnapshot, MarketSnapshot, TradeTick};

const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
const TRADES_FILE: &str = "trades.jsonl";
const CANDLES_FILE: &str = "candles.jsonl";
const ORDER_BOOKS_FILE: &str = "order_books.jsonl";

/// `SnapshotStore` appending JSON lines under a directory.
#[derive(Debug)]
pub struct JsonlSnapshotStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSnapshotStore {
    /// Open a store in `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Io` if the directory cannot be created.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!(dir = %dir.display(), "JSON lines store opened");

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the record files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize + Sync>(
        &self,
        file: &str,
        record: &T,
    ) -> Result<(), PersistenceError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(&line).await?;
        handle.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for JsonlSnapshotStore {
    async fn store_snapshot(&self, snapshot: &MarketSnapshot) -> Result<(), PersistenceError> {
        self.append(SNAPSHOTS_FILE, snapshot).await
    }

    async fn store_trade(&self, trade: &TradeTick) -> Result<(), PersistenceError> {
        self.append(TRADES_FILE, trade).await
    }

    async fn store_candle(&self, candle: &CandleUpdate) -> Result<(), PersistenceError> {
        self.append(CANDLES_FILE, candle).await
    }

    async fn store_order_book(&self, depth: &DepthSnapshot) -> Result<(), PersistenceError> {
        self.append(ORDER_BOOKS_FILE, depth).await
    }
}
