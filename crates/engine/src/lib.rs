//! # Stencil Engine
//!
//! The Stencil Engine resolves a package, selects a job from its job document
//! and runs the job's steps against a shared context. Step bodies, file
//! contents and prompts are templated with `${{ ... }}` expressions.
//!
//! ## Key Features
//!
//! - **Package Resolution**: local directories or `[host/]owner/repo[@version]` git references with a local clone cache
//! - **Template Rendering**: typed single-expression rendering, text mode for multi-line strings, filters and utility namespaces
//! - **Step Dispatch**: static handlers plus dynamic `plugin.object:function` resolution with asynchronous operations
//! - **Parameters**: context-supplied values, override rules, gated defaults and interactive prompts through a [`Runtime`]
//!
//! ## Usage
//!
//! ```rust
//! use stencil_engine::{Context, RunOptions, RunOutcome, ScriptedRuntime, run};
//!
//! let package = tempfile::tempdir()?;
//! std::fs::write(package.path().join(".stencil.yaml"), r#"
//! parameters:
//!   - name: fname
//! notes:
//!   - "hello ${{ fname }}"
//! jobs:
//!   default:
//!     steps: []
//! "#)?;
//!
//! let target = tempfile::tempdir()?;
//! let mut context = Context::new();
//! context.set_target(target.path());
//! let options = RunOptions::new(package.path().to_string_lossy());
//! let mut runtime = ScriptedRuntime::new([serde_json::json!("john")]);
//!
//! if let RunOutcome::Completed(context) = run(context, &options, &mut runtime)? {
//!     assert_eq!(context.notes(), ["hello john"]);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`context`**: the run's key/value state, notes and todos
//! - **`template`**: expression parsing, evaluation, filters and utilities
//! - **`plugin`**: step handlers and the per-run registry
//! - **`executor`**: sequential step dispatch
//! - **`parameters`**: parameter resolution and type conversion
//! - **`package`** and **`loader`**: package cache and job documents
//! - **`scaffold`**: the run API tying everything together

pub mod context;
pub mod error;
pub mod executor;
pub mod loader;
pub mod package;
pub mod parameters;
pub mod plugin;
pub mod runtime;
pub mod scaffold;
pub mod template;
pub mod values;

pub use context::Context;
pub use error::{EngineError, EngineResult};
pub use executor::execute_steps;
pub use loader::{LoadedDocument, load_document};
pub use package::{PackageReference, ResolvedPackage, default_cache_root, fetch_package};
pub use parameters::{convert, process_parameters, str2bool, validate_answer};
pub use plugin::{DynamicResolver, Operation, Plugin, PluginRegistry, ResolvedOperation, StepHandler};
pub use runtime::{Runtime, ScriptedRuntime};
pub use scaffold::{Discovery, JobInfo, RunOutcome, discover, execute_scaffold, get_job, run};
pub use stencil_types::{JobDefinition, JobDocument, ParameterOverride, ParameterType, PromptSpec, RunOptions};
pub use template::{RenderError, render, render_str, render_text, render_value};
