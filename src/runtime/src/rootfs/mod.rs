//! Installation roots for resolver runs.
//!
//! Each architecture run gets its own temporary root holding the rpmdb the
//! resolver should treat as "already installed".

mod provisioner;

pub use provisioner::{detect_local_dbpath, ProvisionedRoot, RpmdbProvisioner, RpmdbSource};
