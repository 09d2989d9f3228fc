//! In-memory `MeterApi` double with per-offset gates for controlling how the
//! sample loop interleaves with other calls.

use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex as StdMutex},
};

use async_trait::async_trait;
use shared::{
    domain::{EvaluationId, MeterId, Settings},
    protocol::{DigitCandidate, DigitSample, Evaluation, HistoryEntry, MeterSnapshot, PictureData},
};
use tokio::sync::{Mutex, Notify};

use crate::{error::ClientError, transport::MeterApi};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Application,
    Transport,
    Status(u16),
}

impl Failure {
    fn into_error(self, what: &str) -> ClientError {
        match self {
            Failure::Application => ClientError::Application(format!("{what} rejected")),
            Failure::Transport => ClientError::transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{what}: connection refused"),
            )),
            Failure::Status(status) => ClientError::HttpStatus { status },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReevaluateOutcome {
    Found(bool),
    Fails(Failure),
}

pub(crate) struct FakeState {
    pub settings: Settings,
    /// Newest first, ids descending.
    pub evals: Vec<Evaluation>,
    pub put_calls: Vec<Settings>,
    pub sample_calls: Vec<Option<u32>>,
    pub evaluation_calls: Vec<(u32, Option<EvaluationId>)>,
    pub meter_calls: u32,
    pub reevaluate_calls: u32,
    pub reevaluate: ReevaluateOutcome,
    pub failing_offsets: HashMap<u32, Failure>,
    pub fail_random_sample: Option<Failure>,
    pub fail_meter: Option<Failure>,
    pub fail_put: Option<Failure>,
}

pub(crate) struct Gate {
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

pub(crate) struct FakeMeterApi {
    pub state: Mutex<FakeState>,
    gates: StdMutex<HashMap<u32, Gate>>,
}

impl FakeMeterApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                settings: Settings::default(),
                evals: vec![evaluation(3), evaluation(2), evaluation(1)],
                put_calls: Vec::new(),
                sample_calls: Vec::new(),
                evaluation_calls: Vec::new(),
                meter_calls: 0,
                reevaluate_calls: 0,
                reevaluate: ReevaluateOutcome::Found(true),
                failing_offsets: HashMap::new(),
                fail_random_sample: None,
                fail_meter: None,
                fail_put: None,
            }),
            gates: StdMutex::new(HashMap::new()),
        })
    }

    /// The next request for `offset` waits after being issued until
    /// `release` is notified. Returns `(reached, release)`.
    pub fn gate(&self, offset: u32) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.gates.lock().expect("gates").insert(
            offset,
            Gate {
                reached: reached.clone(),
                release: release.clone(),
            },
        );
        (reached, release)
    }

    pub async fn sample_offsets(&self) -> Vec<Option<u32>> {
        self.state.lock().await.sample_calls.clone()
    }
}

pub(crate) fn meter() -> MeterId {
    MeterId::new("kitchen")
}

pub(crate) fn evaluation(id: i64) -> Evaluation {
    Evaluation {
        id: EvaluationId(id),
        timestamp: Some(format!("2024-05-0{id}T08:00:00")),
        colored_digits: vec![format!("colored-{id}")],
        processed_images: vec![format!("processed-{id}")],
        predictions: vec![vec![DigitCandidate(id.to_string(), 0.9)]],
        value: Some(id * 100),
        confidence: Some(0.9),
    }
}

pub(crate) fn sample_tag(sample: &DigitSample) -> &str {
    sample
        .processed_images
        .first()
        .map(String::as_str)
        .unwrap_or_default()
}

#[async_trait]
impl MeterApi for FakeMeterApi {
    async fn meter(&self, id: &MeterId) -> Result<MeterSnapshot, ClientError> {
        let mut state = self.state.lock().await;
        state.meter_calls += 1;
        if let Some(failure) = state.fail_meter {
            return Err(failure.into_error("meter"));
        }
        Ok(MeterSnapshot {
            name: id.to_string(),
            picture_number: i64::from(state.meter_calls),
            wifi_rssi: -60,
            picture: PictureData {
                format: "jpeg".into(),
                timestamp: "2024-05-03T08:00:00".into(),
                width: 640,
                height: 480,
                length: 4,
                data: "AAAA".into(),
            },
        })
    }

    async fn evaluations(
        &self,
        _id: &MeterId,
        amount: u32,
        from_id: Option<EvaluationId>,
    ) -> Result<Vec<Evaluation>, ClientError> {
        let mut state = self.state.lock().await;
        state.evaluation_calls.push((amount, from_id));
        Ok(state
            .evals
            .iter()
            .filter(|eval| from_id.map_or(true, |cursor| eval.id.0 < cursor.0))
            .take(amount as usize)
            .cloned()
            .collect())
    }

    async fn history(&self, _id: &MeterId) -> Result<Vec<HistoryEntry>, ClientError> {
        Ok(vec![HistoryEntry {
            value: 300,
            timestamp: "2024-05-03T08:00:00".into(),
            confidence: Some(0.9),
            manual: false,
        }])
    }

    async fn settings(&self, _id: &MeterId) -> Result<Settings, ClientError> {
        Ok(self.state.lock().await.settings.clone())
    }

    async fn put_settings(&self, _id: &MeterId, settings: &Settings) -> Result<(), ClientError> {
        let mut state = self.state.lock().await;
        if let Some(failure) = state.fail_put {
            return Err(failure.into_error("settings"));
        }
        state.put_calls.push(settings.clone());
        state.settings = settings.clone();
        Ok(())
    }

    async fn reevaluate(&self, _id: &MeterId) -> Result<bool, ClientError> {
        let mut state = self.state.lock().await;
        state.reevaluate_calls += 1;
        match state.reevaluate {
            ReevaluateOutcome::Found(found) => Ok(found),
            ReevaluateOutcome::Fails(failure) => Err(failure.into_error("reevaluate")),
        }
    }

    /// Tags each sample with the threshold the server held when the request
    /// was issued, e.g. `t10-o2`.
    async fn sample(&self, _id: &MeterId, offset: Option<u32>) -> Result<DigitSample, ClientError> {
        let (tag, failure) = {
            let mut state = self.state.lock().await;
            state.sample_calls.push(offset);
            let position = offset.map_or_else(|| "r".to_string(), |o| o.to_string());
            let failure = match offset {
                Some(offset) => state.failing_offsets.get(&offset).copied(),
                None => state.fail_random_sample,
            };
            (
                format!("t{}-o{position}", state.settings.threshold_low),
                failure,
            )
        };

        let gate = offset.and_then(|offset| self.gates.lock().expect("gates").remove(&offset));
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        if let Some(failure) = failure {
            return Err(failure.into_error("sample"));
        }
        Ok(DigitSample {
            processed_images: vec![tag],
            predictions: vec![vec![DigitCandidate("7".into(), 0.8)]],
        })
    }
}
