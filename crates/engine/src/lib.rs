//! Policy application against the kernel packet-filtering engine.
//!
//! - [`error`]: the closed [`ErrorCode`] taxonomy and the native result-code translator
//! - [`policy`]: the declarative policy file model, parsing and validation
//! - [`native`]: the blocking [`NativeEngine`] boundary (sessions, transactions, objects)
//! - [`memory`]: an in-process engine with real transaction semantics
//! - [`pipeline`]: the serialised, transactional [`ApplyPipeline`]

pub mod codes;
pub mod error;
pub mod memory;
pub mod native;
pub mod pipeline;
pub mod policy;

pub use {
    error::{DomainError, ErrorCode, check, is_success, to_failed, to_failed_result, translate},
    memory::MemoryEngine,
    native::{NativeEngine, SessionId, Step},
    pipeline::{ApplyPipeline, ApplySuccess},
    policy::{Action, Direction, FilterSpec, Policy, PolicyFormat, Protocol, ProviderSpec, SublayerSpec},
};
