#![doc = include_str!("../README.md")]

pub mod agent_tool;
pub mod registry;
pub mod stores;
pub mod tracing_hook;
mod workflow;

pub use agent_tool::AgentToolExecutor;
pub use registry::{
    AgentRegistration, ModelClient, NotAwaitableKind, RunHandle, RunSubmission, Runtime,
    RuntimeBuilder, RuntimeError,
};
pub use stores::{
    FileMemoryStore, InMemoryMemoryStore, InMemoryRunStore, MemoryStore, PersistenceSubscriber,
    RunStore,
};
pub use tracing_hook::TracingSubscriber;
