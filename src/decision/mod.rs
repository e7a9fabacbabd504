mod extractor;
mod structured;

pub use extractor::{Signal, SignalExtractor, SignalSource, Verdict};
pub use structured::{clamp_leverage, RecordSource, StructuredDecision, DEFAULT_CONFIDENCE, MAX_LEVERAGE, MIN_LEVERAGE};
