//! Client-side core of the meter setup workflow: the settings/evaluation
//! store and the coordinator that drives tuning and confirmation samples.

pub mod cancel;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod store;
pub mod transport;
pub mod views;

pub use cancel::CancelToken;
pub use coordinator::{
    SegmentationUpdate, SetupCoordinator, ThresholdUpdate, WorkflowSnapshot,
    DEFAULT_SAMPLE_AMOUNT,
};
pub use error::ClientError;
pub use events::SetupEvent;
pub use store::{MeterStore, StoreSnapshot};
pub use transport::{HttpMeterApi, MeterApi};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
