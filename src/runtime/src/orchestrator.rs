//! Concurrent per-architecture resolution.
//!
//! One task per architecture: provision a root, call the resolver, wrap the
//! answer. Tasks do not share mutable state and are never cancelled by a
//! sibling's failure; all failures are reported together once every task
//! has finished.

use std::sync::Arc;

use tracing::Instrument;

use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::lockfile::{ArchResult, LockfileDocument};
use rpm_lockfile_core::log::ArchContext;
use rpm_lockfile_core::repository::Repository;

use crate::plan::{ArchJob, RunPlan};
use crate::resolver::{DependencyResolver, ResolveRequest};
use crate::rootfs::RpmdbProvisioner;

/// Settings shared by every architecture run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveFlags {
    pub allow_erasing: bool,
    pub no_sources: bool,
    pub install_weak_deps: Option<bool>,
}

impl From<&RunPlan> for ResolveFlags {
    fn from(plan: &RunPlan) -> Self {
        Self {
            allow_erasing: plan.allow_erasing,
            no_sources: plan.no_sources,
            install_weak_deps: plan.install_weak_deps,
        }
    }
}

pub struct ArchitectureOrchestrator {
    provisioner: Arc<RpmdbProvisioner>,
    resolver: Arc<dyn DependencyResolver>,
}

impl ArchitectureOrchestrator {
    pub fn new(provisioner: Arc<RpmdbProvisioner>, resolver: Arc<dyn DependencyResolver>) -> Self {
        Self {
            provisioner,
            resolver,
        }
    }

    /// Resolve every job concurrently. Results come back in job order.
    pub async fn run(
        &self,
        jobs: Vec<ArchJob>,
        repos: Arc<Vec<Repository>>,
        flags: ResolveFlags,
    ) -> Result<Vec<ArchResult>> {
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let ctx = ArchContext::new(&job.arch);
            let span = ctx.span();
            let provisioner = self.provisioner.clone();
            let resolver = self.resolver.clone();
            let repos = repos.clone();
            let handle = tokio::spawn(
                async move { resolve_arch(&provisioner, resolver.as_ref(), job, repos, flags).await }
                    .instrument(span),
            );
            handles.push((ctx, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        let mut failures = Vec::new();
        for (ctx, handle) in handles {
            match handle.await {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    tracing::error!(arch = %ctx, error = %e, "Resolution failed");
                    failures.push((ctx.arch().to_string(), e));
                }
                Err(e) => {
                    tracing::error!(arch = %ctx, error = %e, "Resolution task aborted");
                    failures.push((
                        ctx.arch().to_string(),
                        LockError::ResolverError {
                            arch: ctx.arch().to_string(),
                            message: format!("task failed: {}", e),
                        },
                    ));
                }
            }
        }

        if failures.is_empty() {
            Ok(results)
        } else {
            Err(LockError::ArchitecturesFailed(failures))
        }
    }

    /// Run all jobs of `plan` and assemble the lockfile.
    pub async fn lock(&self, plan: &RunPlan, repos: Vec<Repository>) -> Result<LockfileDocument> {
        let results = self
            .run(plan.jobs.clone(), Arc::new(repos), ResolveFlags::from(plan))
            .await?;
        Ok(LockfileDocument::assemble(results))
    }
}

async fn resolve_arch(
    provisioner: &RpmdbProvisioner,
    resolver: &dyn DependencyResolver,
    job: ArchJob,
    repos: Arc<Vec<Repository>>,
    flags: ResolveFlags,
) -> Result<ArchResult> {
    tracing::info!(packages = job.packages.len(), "Resolving");
    // The root lives until the resolver returns and is removed on every path.
    let root = provisioner.provision(&job.arch).await?;

    let request = ResolveRequest {
        arch: job.arch.clone(),
        installroot: root.path().to_path_buf(),
        repos: repos.as_ref().clone(),
        packages: job.packages,
        reinstall: job.reinstall,
        upgrade: job.upgrade,
        module_enable: job.module_enable,
        module_disable: job.module_disable,
        allow_erasing: flags.allow_erasing,
        install_weak_deps: flags.install_weak_deps,
        no_sources: flags.no_sources,
    };
    let response = resolver.resolve(&request).await?;
    drop(root);

    let result = ArchResult::new(
        job.arch,
        response.packages,
        response.sources,
        response.module_metadata,
    );
    tracing::info!(
        packages = result.packages.len(),
        sources = result.sources.len(),
        "Resolved"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{package, FakeResolver};
    use rpm_lockfile_core::lockfile::ModuleMetadataRecord;
    use rpm_lockfile_core::repository::UrlSource;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn job(arch: &str, packages: &[&str]) -> ArchJob {
        ArchJob {
            arch: arch.to_string(),
            packages: packages.iter().map(|s| s.to_string()).collect(),
            reinstall: BTreeSet::new(),
            upgrade: BTreeSet::new(),
            module_enable: BTreeSet::new(),
            module_disable: BTreeSet::new(),
        }
    }

    fn repos() -> Arc<Vec<Repository>> {
        Arc::new(vec![Repository::new(
            "baseos",
            UrlSource::Baseurl(vec!["http://x/$basearch/".to_string()]),
        )])
    }

    fn orchestrator(resolver: Arc<FakeResolver>) -> ArchitectureOrchestrator {
        ArchitectureOrchestrator::new(Arc::new(RpmdbProvisioner::empty()), resolver)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_arches_sorted_regardless_of_completion() {
        // x86_64 finishes first, aarch64 last.
        let resolver = Arc::new(
            FakeResolver::new()
                .with_packages("x86_64", vec![package("bash", "x86_64", "sha256:01")])
                .with_packages("aarch64", vec![package("bash", "aarch64", "sha256:02")])
                .with_delay("aarch64", Duration::from_millis(50)),
        );
        let results = orchestrator(resolver.clone())
            .run(
                vec![job("x86_64", &["bash"]), job("aarch64", &["bash"])],
                repos(),
                ResolveFlags::default(),
            )
            .await
            .unwrap();

        let doc = LockfileDocument::assemble(results);
        let arches: Vec<&str> = doc.arches.iter().map(|a| a.arch.as_str()).collect();
        assert_eq!(arches, vec!["aarch64", "x86_64"]);
        assert_eq!(doc.arches[0].packages[0].checksum, "sha256:02");
        assert_eq!(doc.arches[1].packages[0].checksum, "sha256:01");

        let yaml = doc.to_yaml().unwrap();
        assert!(yaml.starts_with("---\nlockfileVersion: 1\nlockfileVendor: redhat\narches:"));
        assert_eq!(resolver.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_request_carries_job_and_flags() {
        let resolver = Arc::new(FakeResolver::new());
        let mut j = job("s390x", &["vim"]);
        j.reinstall.insert("tzdata".to_string());
        j.module_disable.insert("perl".to_string());
        let flags = ResolveFlags {
            allow_erasing: true,
            no_sources: true,
            install_weak_deps: Some(false),
        };

        orchestrator(resolver.clone()).run(vec![j], repos(), flags).await.unwrap();

        let requests = resolver.requests();
        let request = &requests[0];
        assert_eq!(request.arch, "s390x");
        assert!(request.reinstall.contains("tzdata"));
        assert!(request.module_disable.contains("perl"));
        assert!(request.allow_erasing && request.no_sources);
        assert_eq!(request.install_weak_deps, Some(false));
        assert_eq!(request.repos, *repos());
        // The root is gone once the run finished.
        assert!(!request.installroot.exists());
    }

    #[tokio::test]
    async fn test_fail_together() {
        let resolver = Arc::new(
            FakeResolver::new()
                .with_failure("ppc64le", "No match for argument: nope")
                .with_failure("s390x", "No match for argument: nope")
                .with_packages("x86_64", vec![package("bash", "x86_64", "sha256:01")]),
        );

        let err = orchestrator(resolver.clone())
            .run(
                vec![job("ppc64le", &["nope"]), job("s390x", &["nope"]), job("x86_64", &["bash"])],
                repos(),
                ResolveFlags::default(),
            )
            .await
            .unwrap_err();

        match err {
            LockError::ArchitecturesFailed(failures) => {
                let arches: Vec<&str> = failures.iter().map(|(a, _)| a.as_str()).collect();
                assert_eq!(arches, vec!["ppc64le", "s390x"]);
            }
            other => panic!("unexpected error: {}", other),
        }
        // The healthy architecture still ran to completion.
        assert_eq!(resolver.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_results_are_deduplicated_and_sorted() {
        let response = crate::resolver::ResolveResponse {
            packages: vec![
                package("zlib", "x86_64", "sha256:03"),
                package("bash", "x86_64", "sha256:01"),
                package("bash", "x86_64", "sha256:01"),
            ],
            module_metadata: vec![
                ModuleMetadataRecord {
                    url: "http://b/modules.yaml.gz".to_string(),
                    repoid: "b".to_string(),
                    size: 1,
                    checksum: "sha256:bb".to_string(),
                },
                ModuleMetadataRecord {
                    url: "http://a/modules.yaml.gz".to_string(),
                    repoid: "a".to_string(),
                    size: 1,
                    checksum: "sha256:aa".to_string(),
                },
            ],
            ..Default::default()
        };
        let resolver = Arc::new(FakeResolver::new().with_response("x86_64", response));
        let plan = RunPlan {
            base: crate::plan::BaseState::Empty,
            manifest: crate::plan::PackageManifest::None,
            jobs: vec![job("x86_64", &["bash", "zlib"])],
            allow_erasing: false,
            no_sources: false,
            install_weak_deps: None,
        };

        let doc = orchestrator(resolver).lock(&plan, repos().as_ref().clone()).await.unwrap();

        let names: Vec<&str> = doc.arches[0].packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bash", "zlib"]);
        assert_eq!(doc.arches[0].module_metadata[0].repoid, "a");
    }
}
