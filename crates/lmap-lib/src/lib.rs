//! Core library for the LMAP measurement agent
//!
//! This crate provides the building blocks of the daemon:
//! - Data model and validation of the LMAP configuration tree
//! - Calendar matching and event dispatching
//! - The scheduler loop that supervises measurement children
//! - The on-disk queue workspace with its artefact hand-off
//! - XML/JSON encoding of configuration, state and reports

pub mod calendar;
pub mod csv;
pub mod dispatch;
pub mod jsonio;
pub mod model;
pub mod pidfile;
pub mod runner;
pub mod signals;
pub mod suppress;
pub mod validate;
pub mod workspace;
pub mod xmlio;

pub use dispatch::EventFire;
pub use model::{Lmap, TagSet};
pub use runner::{Reap, RunOutcome, Runner, SchedulerRequest};
pub use workspace::Workspace;
