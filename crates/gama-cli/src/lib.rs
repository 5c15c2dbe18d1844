pub mod case;
pub mod cli;
pub mod manifest;

pub use case::{load_case, Case, CaseFile};
pub use cli::{Cli, Commands};
pub use manifest::{read_manifest, RunManifest, MANIFEST_FILE};
