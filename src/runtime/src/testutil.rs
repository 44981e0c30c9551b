//! Fakes and fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use rpm_lockfile_core::error::{LockError, Result};
use rpm_lockfile_core::lockfile::PackageRecord;

use crate::cache::DiskUsage;
use crate::oci::image_service::{ImageInfo, ImageService};
use crate::oci::reference::ImageSpec;
use crate::origin::{CheckedOutFile, GitFetcher, OriginContext};
use crate::resolver::{DependencyResolver, ResolveRequest, ResolveResponse};

#[derive(Debug, Clone, Copy)]
pub enum LayerCompression {
    Gzip,
    Xz,
    None,
}

/// Write a gzip-compressed tar layer holding `files`.
pub fn write_layer(path: &Path, files: &[(&str, &[u8])]) {
    write_layer_with(path, files, LayerCompression::Gzip);
}

pub fn write_layer_with(path: &Path, files: &[(&str, &[u8])], compression: LayerCompression) {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    let tarball = builder.into_inner().unwrap();

    let bytes = match compression {
        LayerCompression::Gzip => {
            let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(&tarball).unwrap();
            enc.finish().unwrap()
        }
        LayerCompression::Xz => {
            let mut enc = xz2::write::XzEncoder::new(Vec::new(), 6);
            enc.write_all(&tarball).unwrap();
            enc.finish().unwrap()
        }
        LayerCompression::None => tarball,
    };
    std::fs::write(path, bytes).unwrap();
}

#[derive(Clone, Default)]
struct FakeImage {
    digest: String,
    labels: BTreeMap<String, String>,
    files: Option<Vec<(String, Vec<u8>)>>,
}

/// In-memory [`ImageService`]; `copy` writes a one-layer `dir:` layout.
#[derive(Default)]
pub struct FakeImageService {
    images: HashMap<String, FakeImage>,
    copy_delay: Option<Duration>,
    inspects: AtomicUsize,
    copies: Mutex<Vec<(String, String)>>,
}

impl FakeImageService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `image_ref` and its digest-pinned form with layer content.
    pub fn with_image(mut self, image_ref: &str, digest: &str, files: &[(&str, &[u8])]) -> Self {
        let image = FakeImage {
            digest: digest.to_string(),
            labels: BTreeMap::new(),
            files: Some(
                files
                    .iter()
                    .map(|(name, data)| (name.to_string(), data.to_vec()))
                    .collect(),
            ),
        };
        let pinned = ImageSpec::parse(image_ref).unwrap().pinned(digest).full_reference();
        self.images.insert(pinned, image.clone());
        self.images.insert(image_ref.to_string(), image);
        self
    }

    /// Inspectable image whose copy fails.
    pub fn with_digest(mut self, image_ref: &str, digest: &str) -> Self {
        self.images
            .entry(image_ref.to_string())
            .or_default()
            .digest = digest.to_string();
        self
    }

    pub fn with_labels(mut self, image_ref: &str, labels: &[(&str, &str)]) -> Self {
        let image = self.images.entry(image_ref.to_string()).or_insert_with(|| FakeImage {
            digest: "sha256:feed".to_string(),
            ..Default::default()
        });
        image.labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    pub fn with_copy_delay(mut self, delay: Duration) -> Self {
        self.copy_delay = Some(delay);
        self
    }

    pub fn inspect_count(&self) -> usize {
        self.inspects.load(Ordering::SeqCst)
    }

    /// `(reference, arch)` of every copy, in call order.
    pub fn copied(&self) -> Vec<(String, String)> {
        self.copies.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageService for FakeImageService {
    async fn inspect(&self, image_ref: &str, _arch: Option<&str>) -> Result<ImageInfo> {
        self.inspects.fetch_add(1, Ordering::SeqCst);
        let image = self
            .images
            .get(image_ref)
            .ok_or_else(|| LockError::ImageError(format!("manifest unknown: {}", image_ref)))?;
        Ok(ImageInfo {
            digest: image.digest.clone(),
            labels: image.labels.clone(),
        })
    }

    async fn copy(&self, image_ref: &str, arch: &str, dest: &Path) -> Result<()> {
        self.copies
            .lock()
            .unwrap()
            .push((image_ref.to_string(), arch.to_string()));
        if let Some(delay) = self.copy_delay {
            tokio::time::sleep(delay).await;
        }
        let files = self
            .images
            .get(image_ref)
            .and_then(|image| image.files.clone())
            .ok_or_else(|| LockError::ImageError(format!("Failed to copy {}", image_ref)))?;

        std::fs::create_dir_all(dest)?;
        let borrowed: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(name, data)| (name.as_str(), data.as_slice()))
            .collect();
        write_layer(&dest.join("0a0a"), &borrowed);
        std::fs::write(
            dest.join("manifest.json"),
            r#"{"schemaVersion": 2, "layers": [{"digest": "sha256:0a0a"}]}"#,
        )?;
        Ok(())
    }
}

/// Disk usage that always reports the same value.
pub struct FixedUsage(pub Option<u8>);

impl DiskUsage for FixedUsage {
    fn usage_percent(&self, _path: &Path) -> Option<u8> {
        self.0
    }
}

/// [`GitFetcher`] serving files from memory.
#[derive(Default)]
pub struct FakeGit {
    files: HashMap<String, String>,
    requests: Mutex<Vec<(String, String, String)>>,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: &str, content: &str) -> Self {
        self.files.insert(file.to_string(), content.to_string());
        self
    }

    /// `(url, gitref, file)` of every fetch.
    pub fn requests(&self) -> Vec<(String, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GitFetcher for FakeGit {
    async fn fetch_file(&self, repo_url: &str, gitref: &str, file: &str) -> Result<CheckedOutFile> {
        self.requests.lock().unwrap().push((
            repo_url.to_string(),
            gitref.to_string(),
            file.to_string(),
        ));
        let content = self
            .files
            .get(file)
            .ok_or_else(|| LockError::GitError(format!("no file {} at {}", file, gitref)))?;
        let checkout = tempfile::TempDir::new()?;
        let path = checkout.path().join(file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(CheckedOutFile::new(checkout, file))
    }
}

/// [`DependencyResolver`] with canned per-architecture answers.
#[derive(Default)]
pub struct FakeResolver {
    responses: HashMap<String, ResolveResponse>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<ResolveRequest>>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_packages(mut self, arch: &str, packages: Vec<PackageRecord>) -> Self {
        self.responses.entry(arch.to_string()).or_default().packages = packages;
        self
    }

    pub fn with_response(mut self, arch: &str, response: ResolveResponse) -> Self {
        self.responses.insert(arch.to_string(), response);
        self
    }

    pub fn with_failure(mut self, arch: &str, message: &str) -> Self {
        self.failures.insert(arch.to_string(), message.to_string());
        self
    }

    pub fn with_delay(mut self, arch: &str, delay: Duration) -> Self {
        self.delays.insert(arch.to_string(), delay);
        self
    }

    /// Requests received, sorted by architecture.
    pub fn requests(&self) -> Vec<ResolveRequest> {
        let mut requests = self.requests.lock().unwrap().clone();
        requests.sort_by(|a, b| a.arch.cmp(&b.arch));
        requests
    }
}

#[async_trait]
impl DependencyResolver for FakeResolver {
    async fn resolve(&self, request: &ResolveRequest) -> Result<ResolveResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delays.get(&request.arch) {
            tokio::time::sleep(*delay).await;
        }
        if let Some(message) = self.failures.get(&request.arch) {
            return Err(LockError::ResolverError {
                arch: request.arch.clone(),
                message: message.clone(),
            });
        }
        Ok(self.responses.get(&request.arch).cloned().unwrap_or_default())
    }
}

pub fn package(name: &str, arch: &str, checksum: &str) -> PackageRecord {
    PackageRecord {
        url: format!("https://example.com/{}/{}-1.0-1.{}.rpm", arch, name, arch),
        repoid: "baseos".to_string(),
        size: 100,
        checksum: checksum.to_string(),
        name: name.to_string(),
        evr: "1.0-1".to_string(),
        sourcerpm: Some(format!("{}-1.0-1.src.rpm", name)),
    }
}

/// Origin context rooted at `dir` with fake images and git, no CTS.
pub fn origin_context(dir: &Path, images: FakeImageService) -> OriginContext {
    OriginContext::new(dir, Arc::new(images))
        .unwrap()
        .with_git(Arc::new(FakeGit::new()))
        .with_cts_url(None)
}

/// Serve `(path_and_query, status, body)` routes on a local port.
///
/// `{base}` in a body is replaced by the server's base URL, which is
/// returned. Unknown paths get a 404.
pub async fn spawn_http(routes: Vec<(String, u16, String)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
        routes
            .into_iter()
            .map(|(path, status, body)| (path, (status, body.replace("{base}", &base))))
            .collect(),
    );

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&request);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, "not found".to_string()));
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    base
}
