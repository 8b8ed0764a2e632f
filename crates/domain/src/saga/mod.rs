//! Saga state machine.

mod state;
mod status;
mod step;

pub use state::SagaState;
pub use status::SagaStatus;
pub use step::SagaStep;
