pub mod engine;
pub mod types;

pub use engine::{Engine, EngineConfig};
pub use types::{
    CoverageMode, DecisionSink, FecPlan, NetworkStats, PolicyDecision, SampleObserver,
};
