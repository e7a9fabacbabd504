pub mod audit;
pub mod cli;
pub mod config;
pub mod decision;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod llm;
pub mod observer;
pub mod pipeline;
pub mod retry;

pub use config::AppConfig;
pub use decision::{Signal, SignalExtractor, StructuredDecision, Verdict};
pub use domain::{CanonicalAction, Position, PositionBook, PositionSide};
pub use error::{DeskError, Result};
pub use exchange::{BinanceFuturesClient, ExchangeGateway};
pub use execution::{ExecutionRequest, ExecutionResult, ExecutionSettings, ExecutionStateMachine};
pub use llm::{LlmGateway, OpenAiCompatibleClient};
pub use pipeline::{PipelineOrchestrator, RunOutcome, RunState};
pub use retry::RetryPolicy;
