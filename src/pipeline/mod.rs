pub mod analyst;
pub mod debate;
pub mod judge;
pub mod orchestrator;
pub mod prompts;
pub mod registry;
pub mod risk;
mod stage;
mod state;
pub mod trader;

pub use orchestrator::{choose_verdict, PipelineOrchestrator, RunOutcome};
pub use registry::{ResolvedStages, StageRegistry};
pub use stage::{Stage, StageKind};
pub use state::{AnalystReport, DebateSide, DebateState, RiskDebateState, RiskSpeaker, RunState, StateDelta};
