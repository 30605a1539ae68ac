pub mod grid;
pub mod scenario;
pub mod split;

pub use grid::Grid;
pub use scenario::{run_many, run_scenario, ScenarioConfig, ScenarioReport};
pub use split::{split_task, SplitPlan};
