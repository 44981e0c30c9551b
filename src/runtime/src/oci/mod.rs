//! Container image handling.
//!
//! - `reference`: `repo[:tag][@digest]` parsing
//! - `containerfile`: base image discovery from `FROM`/`ARG` lines
//! - `image_service`: registry access (`skopeo inspect` / `skopeo copy`)
//! - `layers`: rpmdb extraction from a copied image layout
//!
//! ```text
//! layout/
//! ├── manifest.json   {"layers": [{"digest": "sha256:<hex>"}, ...]}
//! ├── <hex>           layer tarball (gzip, xz or plain)
//! └── ...
//! ```

pub mod containerfile;
pub mod image_service;
pub mod layers;
pub mod reference;

pub use containerfile::{extract_base_image, extract_from_selector, find_containerfile, StageFilter};
pub use image_service::{translate_arch, ImageInfo, ImageService, Skopeo};
pub use layers::{extract_rpmdb, RPMDB_PATHS};
pub use reference::{is_fully_qualified, resolve_pull_reference, ImageSpec};
