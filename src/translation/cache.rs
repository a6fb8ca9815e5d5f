//! Shared, periodically rebuilt translation table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::store::OnboardingStore;

use super::table::CodeTranslationTable;

/// Holds the current table snapshot.
///
/// Readers take an `Arc` snapshot and keep using it for the whole request
/// build, so a refresh never changes codes halfway through one request.
pub struct TranslationCache {
    current: RwLock<Arc<CodeTranslationTable>>,
}

impl TranslationCache {
    pub fn new(table: CodeTranslationTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Build the first snapshot from the store.
    pub async fn load(store: &dyn OnboardingStore) -> Result<Self, DatabaseError> {
        let rows = store.load_reference_rows().await?;
        let table = CodeTranslationTable::from_rows(rows);
        info!(rows = table.len(), "Translation table loaded");
        Ok(Self::new(table))
    }

    /// Current snapshot.
    pub async fn snapshot(&self) -> Arc<CodeTranslationTable> {
        self.current.read().await.clone()
    }

    /// Swap in a new table.
    pub async fn replace(&self, table: CodeTranslationTable) {
        *self.current.write().await = Arc::new(table);
    }

    /// Rebuild from the store and swap it in. Returns the new row count.
    ///
    /// An empty result never replaces a populated table.
    pub async fn refresh(&self, store: &dyn OnboardingStore) -> Result<usize, DatabaseError> {
        let rows = store.load_reference_rows().await?;
        let table = CodeTranslationTable::from_rows(rows);
        let count = table.len();

        if table.is_empty() && !self.snapshot().await.is_empty() {
            warn!("Reference data came back empty; keeping the previous translation table");
            return Ok(0);
        }

        self.replace(table).await;
        debug!(rows = count, "Translation table refreshed");
        Ok(count)
    }
}

/// Spawn a background task that rebuilds the table on an interval.
pub fn spawn_refresh_task(
    cache: Arc<TranslationCache>,
    store: Arc<dyn OnboardingStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately; the table was just loaded.
        interval.tick().await;
        loop {
            interval.tick().await;
            if let Err(e) = cache.refresh(store.as_ref()).await {
                warn!(error = %e, "Translation table refresh failed; keeping previous snapshot");
            }
        }
    })
}
