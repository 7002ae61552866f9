//! Access decision engine for the shear enclosure.
//!
//! This crate turns card reads into unlock cycles. It owns the allow-list,
//! the access state machine, the unlock session and the recent-events log,
//! and exposes a read-only status surface plus a validated manual control
//! entry point for outputs.
//!
//! ```text
//!   CardReader ──mpsc──┐
//!   IoControl ──mpsc───┼──► AccessManager ──► IoHandle ──► IoModule
//!   Sampler ────watch──┘          │
//!                                 └──watch──► StatusAggregator
//! ```
//!
//! [`Engine`] wires everything together; the individual pieces are public
//! so they can be driven directly in tests.

pub mod allow_list;
pub mod control;
pub mod engine;
pub mod error;
pub mod manager;
pub mod policy;
pub mod recent;
pub mod sampler;
pub mod session;
pub mod state_machine;
pub mod status;

pub use allow_list::{AllowList, CardEntry, Verdict};
pub use control::{ControlError, ControlRequest, IoControl};
pub use engine::{Engine, EngineHandle};
pub use error::{AccessError, Result};
pub use manager::{AccessManager, ManagerCommand, ManagerInputs, ManagerView, ManagerWatch};
pub use policy::{DeniedAttemptPolicy, NoLockout};
pub use recent::{EventOrder, RecentEvent, RecentEventsLog};
pub use sampler::{Sampler, SensorSample};
pub use session::{AccessSession, SessionState};
pub use state_machine::{AccessState, StateMachine, StateTransition};
pub use status::{StatusAggregator, StatusSnapshot};
