//! Lockfile generation: the default (and only) command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;

use rpm_lockfile_core::config::{default_cache_dir, InputConfig, DEFAULT_INPUT_FILE, DEFAULT_OUTPUT_FILE};
use rpm_lockfile_runtime::{
    collect_content_origins, detect_local_dbpath, host_arch, ArchitectureOrchestrator, BaseState,
    OriginContext, OriginRegistry, PlanOptions, RpmdbCache, RunPlan, Skopeo, SubprocessResolver,
};

#[derive(Args)]
pub struct LockArgs {
    /// Load installed packages from the base image named in this Containerfile
    #[arg(
        short = 'f',
        long,
        conflicts_with_all = ["image", "local_system", "bare", "rpm_ostree_treefile"]
    )]
    pub containerfile: Option<PathBuf>,

    /// Use rpmdb from the given image
    #[arg(long, conflicts_with_all = ["local_system", "bare", "rpm_ostree_treefile"])]
    pub image: Option<String>,

    /// Resolve dependencies for the current system
    #[arg(long, conflicts_with_all = ["bare", "rpm_ostree_treefile"])]
    pub local_system: bool,

    /// Resolve dependencies as if nothing is installed in the target system
    #[arg(long, conflicts_with = "rpm_ostree_treefile")]
    pub bare: bool,

    /// Take the package list from an rpm-ostree treefile
    #[arg(long)]
    pub rpm_ostree_treefile: Option<PathBuf>,

    /// Add packages from the flatpak section of container.yaml
    #[arg(long)]
    pub flatpak: bool,

    /// Run the resolution for this architecture; can be repeated
    #[arg(long)]
    pub arch: Vec<String>,

    /// Input file
    #[arg(value_name = "INPUT_FILE", default_value = DEFAULT_INPUT_FILE)]
    pub infile: PathBuf,

    /// Where to write the lockfile
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    pub outfile: PathBuf,

    /// Allow erasing of installed packages to resolve dependencies
    #[arg(long)]
    pub allowerasing: bool,
}

impl LockArgs {
    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            containerfile: self.containerfile.clone(),
            image: self.image.clone(),
            local_system: self.local_system,
            bare: self.bare,
            rpm_ostree_treefile: self.rpm_ostree_treefile.clone(),
            flatpak: self.flatpak,
            arches: self.arch.clone(),
            allowerasing: self.allowerasing,
        }
    }
}

/// Directory holding the input file, symlinks resolved.
fn config_dir(infile: &Path) -> std::io::Result<PathBuf> {
    let real = std::fs::canonicalize(infile)?;
    Ok(real.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("/")))
}

pub async fn execute(args: LockArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = InputConfig::from_path(&args.infile)?;
    let config_dir = config_dir(&args.infile)?;
    let cwd = std::env::current_dir()?;

    let plan = RunPlan::build(&config, &config_dir, &cwd, &args.plan_options(), &host_arch())?;
    tracing::debug!(arches = ?plan.arches(), base = ?plan.base, "Planned resolution");

    let images = Arc::new(Skopeo::new());
    let origin_ctx = OriginContext::new(&config_dir, images.clone())?;
    let repos = collect_content_origins(&OriginRegistry::builtin(), &origin_ctx, &config.content_origin).await?;
    tracing::info!(count = repos.len(), "Collected repositories");

    let dbpath = match plan.base {
        BaseState::Empty => String::new(),
        BaseState::LocalSystem | BaseState::Image(_) => detect_local_dbpath().await?,
    };
    let cache = Arc::new(RpmdbCache::new(default_cache_dir(), images, dbpath.clone()));
    let provisioner = Arc::new(plan.provisioner(cache, &dbpath));
    let orchestrator =
        ArchitectureOrchestrator::new(provisioner, Arc::new(SubprocessResolver::from_env()));

    let document = orchestrator.lock(&plan, repos).await?;
    document.write_to(&args.outfile)?;
    tracing::info!(path = %args.outfile.display(), "Wrote lockfile");
    Ok(())
}
