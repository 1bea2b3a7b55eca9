//! Rondo execution engine
//!
//! Runs many cooperating automata under one global critical section. Every
//! scheduled machine has its own thread and a [`MachineControl`]; a single
//! controller thread admits one machine at a time according to the active
//! selection policy, drains ripe scheduler slots and advances virtual time.
//!
//! In model-checking mode the controller records a [`ChoicePoint`] whenever
//! other machines could have been admitted instead, and the [`Explorer`]
//! replays each alternative from a full copy of the run.
//!
//! ```rust,no_run
//! use rondo_engine::{Automaton, HandlerOutcome, Explorer, Scenario, Status};
//! use rondo_core::{EngineConfig, Result, StateId};
//! use std::sync::Arc;
//!
//! struct Hello;
//!
//! impl Scenario for Hello {
//!     fn name(&self) -> &str { "hello" }
//!     fn description(&self) -> &str { "one machine that yields once" }
//!     fn setup(&self, status: &Arc<Status>) -> Result<()> {
//!         let automaton = Automaton::builder("hello")
//!             .state(StateId(0), "yield once", |status, machine| {
//!                 if !machine.wait_nothing(status, false)? {
//!                     return Ok(HandlerOutcome::Stopped);
//!                 }
//!                 Ok(HandlerOutcome::Exit)
//!             })
//!             .build()?;
//!         status.register_automaton(automaton)?;
//!         status.start_machine("hello", "hello", Default::default(), Default::default())?;
//!         Ok(())
//!     }
//! }
//!
//! let report = Explorer::new(EngineConfig::default(), &Hello)?.run()?;
//! println!("{report}");
//! # Ok::<(), rondo_core::EngineError>(())
//! ```

pub mod automaton;
pub mod choice;
pub mod control;
pub mod controller;
pub mod explorer;
pub mod machine;
mod policy;
pub mod runner;
pub mod session;
pub mod status;
pub mod view;

pub use automaton::{AliasHook, Automaton, AutomatonBuilder, CopyHook, HandlerOutcome, StateHandler};
pub use choice::{ChoicePoint, ChoicePoints, ModelCheckingVars, Replay};
pub use control::MachineControl;
pub use controller::{ControllerState, TerminationReason};
pub use explorer::{Explorer, Scenario, VerificationReport};
pub use machine::{LocalVars, Machine, MachineContext, MachineHandle, StartMode};
pub use runner::{RunReport, Runner};
pub use session::Session;
pub use status::{RunStats, Status};
pub use view::{MachineView, StatusView};
