//! Load-generation engine: ramps populations of virtual users through timed stages,
//! drives HTTP or correlated async traffic, and reports outcomes to a metrics sink.

pub mod config;
pub mod correlation;
mod error;
pub mod executor;
pub mod generator;
pub mod runner;
pub mod script;
pub mod template;
pub mod transport;

pub use config::{
    DurationValue, ScenarioConfig, ScenarioDefinition, ScenarioKind, TestConfig, TestDefinition,
};
pub use correlation::{AsyncSettings, CorrelationStore};
pub use error::{Error, Result};
pub use executor::{StepExecutor, StepOutcome};
pub use generator::ValueGenerator;
pub use runner::{
    AsyncTransport, RampAction, RampStep, Scenario, ScenarioResources, ScenarioState, TestRun,
};
pub use script::{Script, Step};
pub use template::{Bindings, Variable, VariableScope};
