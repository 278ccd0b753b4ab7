//! Service layer: scenario steps, the create/delete correlator, and the
//! fleet orchestrator that runs scenarios across many sessions.

pub mod fleet;
pub mod scenario;
pub mod sessions;

pub use fleet::{ConnectionFactory, Fleet, FleetReport, SessionReport};
pub use scenario::{Scenario, ScenarioBuilder, ScenarioOutcome, SubscriptionStream};
pub use sessions::{CycleOutcome, create_then_delete};
