//! Drives the setup flow for one meter: step progression, threshold and
//! segmentation edits, server-side re-evaluation and the confirmation sample
//! batch.
//!
//! The sample batch is filled by a sequential loop that owns a
//! [`CancelToken`]. Anything that makes the batch stale cancels that token
//! and installs a fresh one; the loop checks its own token before every
//! request and again before appending, so a response that lands after
//! cancellation is dropped.

use std::sync::Arc;

use shared::{
    domain::{MeterId, SetupStep, ThresholdPair},
    protocol::DigitSample,
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::{
    cancel::CancelToken,
    error::ClientError,
    events::SetupEvent,
    store::MeterStore,
    transport::MeterApi,
    views,
};

pub const DEFAULT_SAMPLE_AMOUNT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdUpdate {
    pub threshold: ThresholdPair,
    pub threshold_last: ThresholdPair,
    pub islanding_padding: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentationUpdate {
    pub segments: u32,
    pub extended_last_digit: bool,
    pub last_3_digits_narrow: bool,
    pub rotated_180: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowSnapshot {
    pub step: SetupStep,
    pub samples: Vec<DigitSample>,
    pub loading: bool,
    pub no_bounding_box: bool,
}

#[derive(Default)]
struct WorkflowState {
    step: SetupStep,
    samples: Vec<DigitSample>,
    loading: bool,
    no_bounding_box: bool,
    cancel: CancelToken,
}

pub struct SetupCoordinator {
    store: Arc<MeterStore>,
    api: Arc<dyn MeterApi>,
    sample_amount: u32,
    state: Mutex<WorkflowState>,
    events: broadcast::Sender<SetupEvent>,
}

impl SetupCoordinator {
    pub fn new(store: Arc<MeterStore>, api: Arc<dyn MeterApi>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            api,
            sample_amount: DEFAULT_SAMPLE_AMOUNT,
            state: Mutex::new(WorkflowState::default()),
            events,
        }
    }

    /// Batch size used when an edit or a re-evaluation reloads samples.
    pub fn with_sample_amount(mut self, sample_amount: u32) -> Self {
        self.sample_amount = sample_amount;
        self
    }

    pub fn store(&self) -> &Arc<MeterStore> {
        &self.store
    }

    pub fn sample_amount(&self) -> u32 {
        self.sample_amount
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SetupEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SetupEvent) {
        let _ = self.events.send(event);
    }

    pub async fn snapshot(&self) -> WorkflowSnapshot {
        let guard = self.state.lock().await;
        WorkflowSnapshot {
            step: guard.step,
            samples: guard.samples.clone(),
            loading: guard.loading,
            no_bounding_box: guard.no_bounding_box,
        }
    }

    /// Moves 1 -> 2 and 2 -> 3. Any other input leaves the step untouched.
    pub async fn advance(&self, from: u8) -> SetupStep {
        let mut guard = self.state.lock().await;
        match SetupStep::following(from) {
            Some(next) => {
                guard.step = next;
                drop(guard);
                self.emit(SetupEvent::StepChanged(next));
                next
            }
            None => {
                debug!(from, "ignoring advance from terminal or unknown step");
                guard.step
            }
        }
    }

    pub async fn set_loading(&self, loading: bool) {
        self.state.lock().await.loading = loading;
        self.emit(SetupEvent::LoadingChanged(loading));
    }

    /// Asks the running sample loop to stop. The batch collected so far is kept.
    pub async fn cancel_ongoing_load(&self) {
        self.state.lock().await.cancel.cancel();
    }

    /// Cancels the running loop, starts a new cancellation epoch and empties the batch.
    /// The cancelled loop no longer owns `loading`, so it is cleared here.
    async fn supersede_load(&self) {
        let was_loading = {
            let mut guard = self.state.lock().await;
            guard.cancel.cancel();
            guard.cancel = CancelToken::new();
            guard.samples.clear();
            std::mem::replace(&mut guard.loading, false)
        };
        self.emit(SetupEvent::SamplesCleared);
        if was_loading {
            self.emit(SetupEvent::LoadingChanged(false));
        }
    }

    /// Loads samples for offsets `0..amount`, one request at a time and in
    /// order. Stops at the first failed request or once cancelled. Failures
    /// are logged and never returned.
    pub async fn request_samples(&self, id: &MeterId, amount: u32) {
        let token = {
            let mut guard = self.state.lock().await;
            guard.cancel.cancel();
            guard.cancel = CancelToken::new();
            guard.samples.clear();
            guard.loading = true;
            guard.cancel.clone()
        };
        self.emit(SetupEvent::SamplesCleared);
        self.emit(SetupEvent::LoadingChanged(true));
        info!(meter = %id, amount, "loading sample batch");

        for offset in 0..amount {
            if token.is_cancelled() {
                debug!(meter = %id, offset, "sample batch cancelled");
                break;
            }
            match self.api.sample(id, Some(offset)).await {
                Ok(sample) => {
                    let mut guard = self.state.lock().await;
                    if token.is_cancelled() {
                        debug!(meter = %id, offset, "dropping sample that arrived after cancellation");
                        break;
                    }
                    guard.samples.push(sample.clone());
                    drop(guard);
                    self.emit(SetupEvent::SampleAppended { offset, sample });
                }
                Err(err) => {
                    warn!(meter = %id, offset, kind = err.kind(), "sample request failed: {err}");
                    self.emit(SetupEvent::Error(format!(
                        "sample {offset} for meter {id} failed: {err}"
                    )));
                    break;
                }
            }
        }

        let still_current = {
            let mut guard = self.state.lock().await;
            let still_current = guard.cancel.same_as(&token);
            if still_current {
                guard.loading = false;
            }
            still_current
        };
        if still_current {
            self.emit(SetupEvent::LoadingChanged(false));
        }
    }

    /// Applies and persists new thresholds, then reloads the sample batch
    /// against them. A persist failure is returned and no reload happens.
    pub async fn update_thresholds(
        &self,
        update: ThresholdUpdate,
        id: &MeterId,
    ) -> Result<(), ClientError> {
        self.supersede_load().await;
        self.store
            .edit_settings(|settings| {
                views::THRESHOLD.write(settings, update.threshold);
                views::THRESHOLD_LAST.write(settings, update.threshold_last);
                views::ISLANDING_PADDING.write(settings, update.islanding_padding);
            })
            .await;
        self.store.update_settings(id).await?;
        self.request_samples(id, self.sample_amount).await;
        Ok(())
    }

    pub async fn update_max_flow(&self, value: f64, id: &MeterId) -> Result<(), ClientError> {
        self.store.write(views::MAX_FLOW_RATE, value).await;
        self.store.update_settings(id).await
    }

    /// Applies and persists segmentation geometry, then re-evaluates.
    pub async fn update_segmentation(
        &self,
        update: SegmentationUpdate,
        id: &MeterId,
    ) -> Result<(), ClientError> {
        self.supersede_load().await;
        self.store
            .edit_settings(|settings| {
                views::SEGMENTS.write(settings, update.segments);
                views::EXTENDED_LAST_DIGIT.write(settings, update.extended_last_digit);
                views::LAST_3_DIGITS_NARROW.write(settings, update.last_3_digits_narrow);
                views::ROTATED_180.write(settings, update.rotated_180);
            })
            .await;
        self.store.update_settings(id).await?;
        self.reevaluate(id).await;
        Ok(())
    }

    /// Re-runs detection server side. Whatever the outcome, the store is
    /// refreshed, loading is cleared and a new sample batch is loaded.
    /// The refresh goes through [`MeterStore::fetch_all`], so evaluation pages
    /// loaded with a cursor are dropped and only the newest page remains.
    pub async fn reevaluate(&self, id: &MeterId) {
        self.supersede_load().await;
        self.set_loading(true).await;

        match self.api.reevaluate(id).await {
            Ok(found) => {
                self.state.lock().await.no_bounding_box = !found;
                if !found {
                    warn!(meter = %id, "no display bounding box found");
                }
                self.emit(SetupEvent::BoundingBoxChecked { found });
            }
            Err(ClientError::Application(message)) => {
                warn!(meter = %id, "reevaluate rejected: {message}");
                self.emit(SetupEvent::Error(format!("reevaluate rejected: {message}")));
            }
            Err(err) => {
                error!(meter = %id, kind = err.kind(), "reevaluate failed: {err}");
                self.emit(SetupEvent::Error(format!("reevaluate failed: {err}")));
            }
        }

        if let Err(err) = self.store.fetch_all(id).await {
            warn!(meter = %id, "refresh after reevaluate failed: {err}");
            self.emit(SetupEvent::Error(format!("refresh failed: {err}")));
        }
        self.set_loading(false).await;
        self.request_samples(id, self.sample_amount).await;
    }

    /// Re-segments one random capture and shows it on the current evaluation.
    pub async fn redo_digit_eval(&self, id: &MeterId) {
        self.set_loading(true).await;
        match self.api.sample(id, None).await {
            Ok(sample) => {
                if self.store.replace_current_digits(sample).await {
                    self.emit(SetupEvent::CurrentEvaluationUpdated);
                } else {
                    debug!(meter = %id, "no current evaluation to update");
                }
            }
            Err(err) => {
                error!(meter = %id, kind = err.kind(), "redo digit evaluation failed: {err}");
                self.emit(SetupEvent::Error(format!(
                    "redo digit evaluation failed: {err}"
                )));
            }
        }
        self.set_loading(false).await;
    }

    /// Refreshes all store data behind the busy indicator.
    pub async fn get_data(&self, id: &MeterId) -> Result<(), ClientError> {
        self.set_loading(true).await;
        let result = self.store.fetch_all(id).await;
        self.set_loading(false).await;
        result
    }

    /// Back to step one with an empty batch; a running sample loop is cancelled.
    pub async fn reset(&self) {
        {
            let mut guard = self.state.lock().await;
            guard.cancel.cancel();
            *guard = WorkflowState::default();
        }
        self.emit(SetupEvent::SamplesCleared);
        self.emit(SetupEvent::StepChanged(SetupStep::PickImage));
        self.emit(SetupEvent::LoadingChanged(false));
    }
}

#[cfg(test)]
#[path = "tests/coordinator_tests.rs"]
mod tests;
