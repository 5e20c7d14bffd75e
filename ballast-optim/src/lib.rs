//! Optimizers built from chains of gradient transformations.
//!
//! A [`BaseOptimizer`] runs one [`Chain`] per parameter (Adam-family moments,
//! SOAP, PSGD Kron), surrounded by warmup, clipping, mars, caution and
//! decoupled weight decay. [`ScheduleFreeOptimizer`] adds schedule-free
//! averaging with explicit train/eval modes. [`create_optimizer`] builds any
//! of them by name.

pub mod blend;
pub mod chain;
pub mod config;
pub mod driver;
pub mod grad_clipping;
pub mod layout;
pub mod optimizer_state;
pub mod optimizer_trait;
pub mod param_group;
pub mod registry;
pub mod schedule;
pub mod schedule_free;
pub mod transforms;

pub use chain::{Chain, ChainBuilder, StepContext, StepOutcome, Transform};
pub use config::{
    FeatureFlags, MemorySaveMode, OptimizerConfig, ProbSchedule, PsgdConfig, SoapConfig,
    UpdateProbability, Variant,
};
pub use driver::BaseOptimizer;
pub use grad_clipping::{Clip, ClipFn, ClipPolicy};
pub use optimizer_state::{Mode, OptimizerState, ParamState, StateSlice, StateValue};
pub use optimizer_trait::Optimizer;
pub use param_group::{ParamGroup, ParamGroupOptions, ParamRef};
pub use registry::{create_default_optimizer, create_optimizer, lookup, names, AnyOptimizer};
pub use schedule_free::ScheduleFreeOptimizer;
