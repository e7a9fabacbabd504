mod engine;
mod result;
mod summary;

pub use engine::{ExecutionSettings, ExecutionStateMachine, SetupReport};
pub use result::{ExecutionRequest, ExecutionResult};
pub use summary::render_position_summary;
