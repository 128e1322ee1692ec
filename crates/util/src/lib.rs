//! Helpers shared by the stencil engine and command line.

pub mod async_runtime;
pub mod git_url;
pub mod home;
pub mod merge;
pub mod path_processing;
pub mod redact;
pub mod structured;

pub use async_runtime::block_on_future;
pub use git_url::{GitUrl, GitUrlError};
pub use home::{HOME_ENV, SettingsError, SettingsStore, StencilHome, read_context_file};
pub use merge::{deep_merge, merge_maps};
pub use path_processing::{absolutize, expand_tilde, resolve_against};
pub use redact::redact_value;
pub use structured::{StructuredFileError, is_json_path, parse_structured, read_structured};
