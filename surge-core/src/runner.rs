mod pacing;
mod ramp;
mod scenario;
mod test_run;
mod vu;

pub use pacing::{MIN_PACING_SLEEP, jittered_pacing, next_sleep};
pub use ramp::{RampAction, RampStep, fit_to_budget};
pub use scenario::{AsyncTransport, Scenario, ScenarioResources, ScenarioState};
pub use test_run::TestRun;
