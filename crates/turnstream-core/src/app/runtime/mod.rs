pub mod checkpoint;
pub mod consent;
pub mod context;
pub mod controller;
pub mod driver;
pub mod engine;
pub mod ledger;
pub mod local_engine;
pub mod orchestrator;
pub mod subscription;
pub mod ui;

pub use checkpoint::{CheckpointWriter, TerminalSave};
pub use consent::{
    AllowAll, AttachmentMaterializer, AuthorizationCheck, CapabilityProbe, ConsentError,
    ConsentGate, ExecutionDescriptor, FixedMode, Passthrough,
};
pub use context::{ActiveSubscriptions, ReconnectGuard, SessionContext};
pub use controller::{Activation, StreamStatus, SubscriptionController};
pub use driver::{DEFAULT_CHECKPOINT_INTERVAL, TurnDriver, TurnOutcome};
pub use engine::{EngineError, ExecutionEngine, ExecutionRequest, StreamDescriptor};
pub use ledger::CompletionLedger;
pub use local_engine::{
    DEFAULT_MAX_BUFFERED_EVENTS, ExecutionHandler, LocalExecutionEngine, StreamProducer,
};
pub use orchestrator::{
    RetryPolicy, SendArgs, SendOrchestrator, SendOutcome, TurnConfig, TurnHandle,
};
pub use subscription::{EventSubscription, StreamBatch};
pub use ui::{UiEvent, UiSink};
