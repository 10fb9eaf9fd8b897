#![doc = include_str!("../README.md")]

pub mod activity;
pub mod interrupt;
pub mod machine;
pub mod transcript;

pub use activity::{
    BufferedPlannerEvents, PlanActivityInput, PlanActivityOutput, StreamedPlannerEvent,
};
pub use interrupt::{
    ClarificationAnswer, ConfirmationDecision, ExternalToolResults, InterruptController,
    PauseRequest, ProvidedToolResult, ResumeRequest, SIGNAL_CLARIFICATION, SIGNAL_CONFIRMATION,
    SIGNAL_PAUSE, SIGNAL_RESUME, SIGNAL_TOOL_RESULTS,
};
pub use machine::{AgentActivities, RunMachine, RunOutput, WorkflowRunInput};
pub use transcript::Transcript;
