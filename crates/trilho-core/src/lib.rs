pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod trace;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, GatePolicy, RetryPolicy};
pub use error::{Result, TrilhoError};
pub use event::EventBus;
pub use memory::{MemoryWrite, WorkflowMemory};
pub use trace::{RunTrace, TraceEntry};
pub use traits::AgentInvoker;
pub use types::*;
