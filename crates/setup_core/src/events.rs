use shared::{domain::SetupStep, protocol::DigitSample};

#[derive(Debug, Clone)]
pub enum SetupEvent {
    StepChanged(SetupStep),
    LoadingChanged(bool),
    SamplesCleared,
    SampleAppended { offset: u32, sample: DigitSample },
    BoundingBoxChecked { found: bool },
    CurrentEvaluationUpdated,
    Error(String),
}
