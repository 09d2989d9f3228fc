use std::sync::Arc;

use shared::{
    domain::{EvaluationId, MeterId, Settings},
    protocol::{DigitSample, Evaluation, HistoryEntry, MeterSnapshot},
};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{error::ClientError, transport::MeterApi, views::FieldView};

/// Evaluations pulled by a fresh load; older ones are paged in on demand.
pub const FRESH_EVALUATION_AMOUNT: u32 = 1;

#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub last_picture: Option<MeterSnapshot>,
    /// Newest first.
    pub evaluations: Vec<Evaluation>,
    pub current_evaluation: Option<Evaluation>,
    pub settings: Settings,
    pub history: Vec<HistoryEntry>,
}

/// Canonical device configuration plus the latest evaluation data for the
/// meter under setup.
pub struct MeterStore {
    api: Arc<dyn MeterApi>,
    include_history: bool,
    inner: RwLock<StoreSnapshot>,
}

impl MeterStore {
    pub fn new(api: Arc<dyn MeterApi>) -> Self {
        Self {
            api,
            include_history: false,
            inner: RwLock::new(StoreSnapshot::default()),
        }
    }

    /// Makes [`MeterStore::fetch_all`] also pull the reading history.
    pub fn with_history(mut self, include_history: bool) -> Self {
        self.include_history = include_history;
        self
    }

    pub async fn fetch_device(&self, id: &MeterId) -> Result<MeterSnapshot, ClientError> {
        let snapshot = self.api.meter(id).await?;
        self.inner.write().await.last_picture = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Without `from_id` the collection is replaced and the newest entry
    /// becomes current. With `from_id` the page is appended and the current
    /// evaluation is left alone.
    pub async fn fetch_evaluations(
        &self,
        id: &MeterId,
        amount: u32,
        from_id: Option<EvaluationId>,
    ) -> Result<Vec<Evaluation>, ClientError> {
        let evals = self.api.evaluations(id, amount, from_id).await?;
        let mut guard = self.inner.write().await;
        match from_id {
            None => {
                guard.current_evaluation = evals.first().cloned();
                guard.evaluations = evals.clone();
            }
            Some(cursor) => {
                debug!(meter = %id, cursor = cursor.0, count = evals.len(), "appending evaluation page");
                guard.evaluations.extend(evals.iter().cloned());
            }
        }
        Ok(evals)
    }

    pub async fn fetch_history(&self, id: &MeterId) -> Result<Vec<HistoryEntry>, ClientError> {
        let history = self.api.history(id).await?;
        self.inner.write().await.history = history.clone();
        Ok(history)
    }

    pub async fn fetch_settings(&self, id: &MeterId) -> Result<Settings, ClientError> {
        let settings = self.api.settings(id).await?;
        self.inner.write().await.settings = settings.clone();
        Ok(settings)
    }

    /// Pushes the whole local settings record. Edits must already be applied.
    pub async fn update_settings(&self, id: &MeterId) -> Result<(), ClientError> {
        let settings = self.inner.read().await.settings.clone();
        self.api.put_settings(id, &settings).await?;
        info!(meter = %id, "settings updated");
        Ok(())
    }

    /// Runs every fetch concurrently and waits for all of them. Fetches that
    /// succeed keep their effect even when a sibling fails; the first error
    /// is returned.
    ///
    /// Evaluations are reloaded without a cursor, which replaces the
    /// collection: older pages appended earlier are discarded.
    pub async fn fetch_all(&self, id: &MeterId) -> Result<(), ClientError> {
        let history = async {
            if self.include_history {
                self.fetch_history(id).await.map(|_| ())
            } else {
                Ok(())
            }
        };
        let (device, evals, settings, history) = futures::join!(
            self.fetch_device(id),
            self.fetch_evaluations(id, FRESH_EVALUATION_AMOUNT, None),
            self.fetch_settings(id),
            history
        );
        device?;
        evals?;
        settings?;
        history?;
        Ok(())
    }

    /// Overwrites the digit crops and predictions of the current evaluation.
    /// Returns `false` when there is no current evaluation.
    pub async fn replace_current_digits(&self, sample: DigitSample) -> bool {
        let mut guard = self.inner.write().await;
        match guard.current_evaluation.as_mut() {
            Some(current) => {
                current.processed_images = sample.processed_images;
                current.predictions = sample.predictions;
                true
            }
            None => false,
        }
    }

    pub async fn settings(&self) -> Settings {
        self.inner.read().await.settings.clone()
    }

    pub async fn edit_settings<F>(&self, edit: F)
    where
        F: FnOnce(&mut Settings),
    {
        edit(&mut self.inner.write().await.settings);
    }

    pub async fn read<V>(&self, view: FieldView<V>) -> V {
        view.read(&self.inner.read().await.settings)
    }

    pub async fn write<V>(&self, view: FieldView<V>, value: V) {
        view.write(&mut self.inner.write().await.settings, value);
    }

    pub async fn current_evaluation(&self) -> Option<Evaluation> {
        self.inner.read().await.current_evaluation.clone()
    }

    pub async fn evaluations(&self) -> Vec<Evaluation> {
        self.inner.read().await.evaluations.clone()
    }

    pub async fn last_picture(&self) -> Option<MeterSnapshot> {
        self.inner.read().await.last_picture.clone()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.read().await.history.clone()
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
