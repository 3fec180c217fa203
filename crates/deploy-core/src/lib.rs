//! Building blocks for scripted software-stack deployments.
//!
//! An [`Operations`] facade runs named steps (package installs, service
//! control, file edits, downloads) through a shell, records everything in a
//! deployment log and escalates failures according to a per-call [`Severity`].

pub mod command;
pub mod config;
pub mod error;
pub mod exec;
pub mod log;
pub mod ops;
pub mod policy;
pub mod profile;
pub mod prompt;

pub use command::{BuildError, PackageAction, PmsAction, ServiceAction, ServiceConfigAction};
pub use config::DeployConfig;
pub use error::OperationError;
pub use ops::{OpResult, Operations};
pub use policy::{DeploymentMode, OperationCode, Outcome, Severity};
pub use profile::{DistroProfile, InitSystem, PackageManager, ServiceManager};
