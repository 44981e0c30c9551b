//! rpm-lockfile runtime - everything that touches the network, subprocesses
//! or the cache.
//!
//! The flow of a run:
//!
//! ```text
//! InputConfig ──► origin::collect_content_origins ──► Vec<Repository>
//!      │
//!      └────────► plan::RunPlan ──► orchestrator (one task per arch)
//!                                     ├── rootfs::RpmdbProvisioner ──► cache::RpmdbCache
//!                                     └── resolver::DependencyResolver
//! ```

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod manifest;
pub mod oci;
pub mod orchestrator;
pub mod origin;
pub mod plan;
pub mod process;
pub mod resolver;
pub mod rootfs;

#[cfg(test)]
mod testutil;

// Re-export common types
pub use cache::{DiskUsage, RpmdbCache, StatvfsUsage};
pub use oci::{ImageService, ImageSpec, Skopeo};
pub use orchestrator::{ArchitectureOrchestrator, ResolveFlags};
pub use origin::{collect_content_origins, ContentOrigin, OriginContext, OriginRegistry};
pub use plan::{host_arch, ArchJob, BaseState, PlanOptions, RunPlan};
pub use resolver::{DependencyResolver, ResolveRequest, ResolveResponse, SubprocessResolver};
pub use rootfs::{detect_local_dbpath, ProvisionedRoot, RpmdbProvisioner, RpmdbSource};

/// rpm-lockfile runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
