pub mod catalog;
pub mod diff_producer;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod hash;
pub mod matcher;
pub mod operations;
pub mod package_details;
pub mod parser;
pub mod resolver;
pub mod state;
pub mod types;
pub mod workflow;

pub use error::{PatchError, PatchResult};
pub use operations::{apply_patch, run_preflight_checks, ApplyOptions, ApplyResult};
pub use parser::parse;
pub use types::{ChangeKind, FileDiff, FileMode, Hunk, HunkLine, ParsedPatch};
