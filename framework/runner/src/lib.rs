mod aggregator;
mod cli;
mod context;
mod definition;
mod distribute;
mod divide;
mod error_buffer;
mod event;
mod executor;
mod init;
mod lifecycle;
mod monitor;
mod orchestrator;
mod phase;
mod plan;
mod platform;
mod progress;
mod run;
mod shutdown;
mod test_definition;
mod types;

pub mod prelude {
    pub use crate::aggregator::{quorum_patience_ms, Aggregator, ERROR_FLUSH_AGE_MS};
    pub use crate::cli::{PlatformOpt, ReporterOpt, SwarmScenarioCli};
    pub use crate::context::{RunnerContext, VuContext};
    pub use crate::definition::{
        DefinitionError, HookResult, ScenarioDefinitionBuilder, SplitMode, VuBehaviour,
    };
    pub use crate::distribute::distribute;
    pub use crate::divide::{divide_phases, replicate_phases};
    pub use crate::event::{
        ErrorLevel, EventBus, LogEvent, PhaseEvent, RunEvent, WorkerError, WorkerErrorEvent,
        WorkerEvent, WorkerEventSender, WorkerId, WorkerMessage,
    };
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::lifecycle::{LifecycleError, WorkerRecord, WorkerState};
    pub use crate::orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome};
    pub use crate::phase::{PhaseDefinition, PhaseShape, WorkerPhase};
    pub use crate::plan::{PayloadDataset, Variables, WorkerPlan};
    pub use crate::platform::{
        LocalPlatform, PrepareRequest, WorkerCommand, WorkerOptions, WorkerPlatform,
    };
    pub use crate::run::run;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
    pub use crate::test_definition::{PayloadSource, TestDefinition};
    pub use crate::types::SwarmResult;

    pub use swarm_instruments::OperationRecord;
}
