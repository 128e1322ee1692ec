//! Shared type definitions for stencil.
//!
//! The models here describe what authors write in job documents and what
//! users keep in their settings file. They are lenient: unknown keys are kept
//! rather than rejected, and every collection defaults to empty so that a
//! document only needs the fields required to look up a job.

pub mod document;
pub mod options;
pub mod parameter;
pub mod settings;

pub use document::{DEFAULT_JOB_NAME, JobDefinition, JobDocument};
pub use options::{DEFAULT_SCRIPT_NAME, RunOptions};
pub use parameter::{ParameterOverride, ParameterSpec, ParameterType, PromptSpec};
pub use settings::{LibraryEntry, UserSettings};
