//! Rondo core types
//!
//! Leaf types shared by every rondo crate:
//! - [`EngineError`] and the crate-wide [`Result`]
//! - [`EngineConfig`] with validation, file loading and env overrides
//! - [`Condition`] wait descriptors and the [`WaitRequest`] arguments of a wait
//! - [`Signal`]s exchanged between machines and the controller
//! - the time-ordered slot [`Scheduler`] and its [`SlotProcessor`] callback
//! - the [`MetaContext`] domain collaborator
//! - [`Clocks`], the virtual and event clocks of a run

pub mod clock;
pub mod condition;
pub mod config;
pub mod errors;
pub mod ids;
pub mod meta;
pub mod scheduler;
pub mod signal;

pub use clock::Clocks;
pub use condition::{Condition, ConditionKind, TargetTime, UserEvent, WaitRequest};
pub use config::{
    ConfigLoad, ConfigValidation, EngineConfig, ModelCheckingCriteria, Pick, ResumeBypass,
    SelectionPolicy, VerificationMode,
};
pub use errors::{EngineError, Result};
pub use ids::{MachineKey, StateId};
pub use meta::{MetaContext, NullMeta};
pub use scheduler::{
    NoopSlotProcessor, RipeSlot, Scheduler, Slot, SlotContext, SlotKind, SlotPayload,
    SlotProcessor,
};
pub use signal::{SenderKind, Signal, SignalKind};
