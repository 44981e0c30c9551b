//! rpm-lockfile core - value types and input model.
//!
//! Everything here is free of network and subprocess access: the error
//! taxonomy, the input file model, repositories, package filters and the
//! lockfile document itself.

pub mod config;
pub mod error;
pub mod lockfile;
pub mod log;
pub mod package;
pub mod repository;
pub mod vars;

// Re-export commonly used types
pub use config::{ContainerfileSelector, ContextConfig, InputConfig};
pub use error::{LockError, Result};
pub use lockfile::{ArchResult, LockfileDocument, ModuleMetadataRecord, PackageRecord};
pub use log::ArchContext;
pub use package::{ArchFilter, OneOrMany, PackageSpec};
pub use repository::{Repository, UrlSource};
pub use vars::substitute;

/// rpm-lockfile version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
