//! Step execution
//!
//! Runs one provisioning step against its cache handles inside a build
//! container. The cache side of every step is idempotent: a complete stamp
//! with a matching fingerprint means nothing is downloaded again. The image
//! side (unpacking, installing from a warm package cache) is redone each
//! build, because every build starts from a fresh container.

pub mod fetch;

pub use fetch::{Fetcher, HttpFetcher};

use crate::cache::{check_stamp, sha256_file, CacheHandle, CacheState, Stamp};
use crate::error::{SandkitError, SandkitResult};
use crate::orchestration::{BuildContainer, ContainerRuntime, ExecRequest};
use crate::plan::{shell_quote, ArchiveFormat, Step, StepAction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Env var pointing install scripts at their cache mount
pub const CACHE_ENV: &str = "SANDKIT_CACHE";

/// Env var telling install scripts whether their cache is already complete
pub const CACHE_WARM_ENV: &str = "SANDKIT_CACHE_WARM";

/// How a step finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// Populated its cache for the first time
    Installed,
    /// Served from a complete cache entry
    Cached,
    /// Uncached command ran
    Ran,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed => write!(f, "installed"),
            Self::Cached => write!(f, "cached"),
            Self::Ran => write!(f, "ran"),
        }
    }
}

/// Executes steps in a build container
pub struct StepExecutor {
    runtime: Arc<dyn ContainerRuntime>,
    fetcher: Arc<dyn Fetcher>,
}

impl StepExecutor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { runtime, fetcher }
    }

    /// Run one step. `handles` must line up with `step.mounts`.
    pub async fn execute(
        &self,
        step: &Step,
        handles: &[CacheHandle],
        container: &BuildContainer,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<StepOutcome> {
        check_handles(step, handles)?;
        debug!("Executing step {} ({})", step.id, step.action.label());

        match &step.action {
            StepAction::Configure { argv } => {
                let request = ExecRequest::new(argv.clone()).with_env(step_env(step, container));
                self.run(container, request, on_output).await?;
                Ok(StepOutcome::Ran)
            }
            StepAction::FetchArchive {
                url,
                sha256,
                format,
                install_dir,
                ..
            } => {
                self.fetch_archive(
                    step,
                    primary_handle(step, handles)?,
                    container,
                    ArchiveRef {
                        url,
                        sha256: sha256.as_deref(),
                        format: *format,
                        install_dir,
                    },
                    on_output,
                )
                .await
            }
            StepAction::PackageInstall {
                manager, packages, ..
            } => {
                let quoted: Vec<String> = packages.iter().map(|p| shell_quote(p)).collect();
                let primary = primary_handle(step, handles)?;
                self.stamped_command(
                    step,
                    primary,
                    container,
                    |warm| manager.install_command(&quoted, warm),
                    on_output,
                )
                .await
            }
            StepAction::Script { script, .. } => {
                let primary = primary_handle(step, handles)?;
                self.stamped_command(step, primary, container, |_| script.clone(), on_output)
                    .await
            }
        }
    }

    /// Package installs and scripts: the command always runs, the stamp
    /// records that the cache behind it is complete. `script` learns whether
    /// the cache is warm so package managers can stay offline.
    async fn stamped_command(
        &self,
        step: &Step,
        primary: &CacheHandle,
        container: &BuildContainer,
        script: impl FnOnce(bool) -> String,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<StepOutcome> {
        let version = step.action.version().unwrap_or_default();
        let identity = step.cache_fingerprint();
        let stamp = Stamp::read(primary.path(), primary.key()).await?;
        let state = check_stamp(primary.key(), stamp.as_ref(), &identity, version)?;

        if !state.is_warm() {
            Stamp::building(&step.id, &identity, version)
                .write(primary.path())
                .await?;
        }

        let mut env = step_env(step, container);
        if matches!(step.action, StepAction::Script { .. }) {
            if let Some(mount) = step.primary_mount() {
                env.insert(CACHE_ENV.to_string(), mount.mount_path.clone());
            }
            env.insert(
                CACHE_WARM_ENV.to_string(),
                if state.is_warm() { "1" } else { "0" }.to_string(),
            );
        }

        let script = script(state.is_warm());
        self.run(container, ExecRequest::shell(script).with_env(env), on_output)
            .await?;

        if state.is_warm() {
            return Ok(StepOutcome::Cached);
        }

        Stamp::building(&step.id, &identity, version)
            .complete(None)
            .write(primary.path())
            .await?;
        Ok(StepOutcome::Installed)
    }

    async fn fetch_archive(
        &self,
        step: &Step,
        primary: &CacheHandle,
        container: &BuildContainer,
        archive: ArchiveRef<'_>,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<StepOutcome> {
        let version = step.action.version().unwrap_or_default();
        let key = primary.key();
        let archive_path = primary.path().join(archive.format.file_name());

        let stamp = Stamp::read(primary.path(), key).await?;
        let identity = step.cache_fingerprint();
        let state = check_stamp(key, stamp.as_ref(), &identity, version)?;

        let digest = match (state, stamp) {
            (CacheState::Complete, Some(stamp)) => {
                verify_cached_archive(key, &archive_path, &stamp, archive.sha256).await?
            }
            _ => {
                Stamp::building(&step.id, &identity, version)
                    .write(primary.path())
                    .await?;
                self.download(key, archive.url, &archive_path, archive.sha256)
                    .await?
            }
        };

        let mount_path = step
            .primary_mount()
            .map(|m| m.mount_path.as_str())
            .unwrap_or_default();
        let in_container = format!("{}/{}", mount_path, archive.format.file_name());
        let script = unpack_command(archive.format, &in_container, archive.install_dir);
        self.run(
            container,
            ExecRequest::shell(script).with_env(step_env(step, container)),
            on_output,
        )
        .await?;

        if state.is_warm() {
            info!("{} served from cache {}", step.id, key);
            return Ok(StepOutcome::Cached);
        }

        Stamp::building(&step.id, &identity, version)
            .complete(Some(digest))
            .write(primary.path())
            .await?;
        Ok(StepOutcome::Installed)
    }

    /// Download to a temporary file, verify, then rename into place
    async fn download(
        &self,
        key: &str,
        url: &str,
        archive_path: &Path,
        pinned: Option<&str>,
    ) -> SandkitResult<String> {
        let partial = archive_path.with_extension("part");
        if let Err(e) = self.fetcher.fetch(url, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        let digest = sha256_file(&partial).await?;
        if let Some(expected) = pinned {
            if !digest.eq_ignore_ascii_case(expected) {
                let _ = fs::remove_file(&partial).await;
                return Err(SandkitError::mismatch(
                    key,
                    format!(
                        "downloaded archive has sha256 {} but {} is pinned",
                        digest, expected
                    ),
                ));
            }
        }

        fs::rename(&partial, archive_path).await.map_err(|e| {
            SandkitError::io(format!("moving archive to {}", archive_path.display()), e)
        })?;
        Ok(digest)
    }

    /// Run a request and turn a non-zero exit into a command failure
    async fn run(
        &self,
        container: &BuildContainer,
        request: ExecRequest,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> SandkitResult<()> {
        let output = self.runtime.exec(&container.id, &request, on_output).await?;
        if output.success() {
            return Ok(());
        }

        warn!(
            "Command exited with {}: {}",
            output.exit_code,
            request.display()
        );
        let stdout = output.stdout();
        Err(SandkitError::CommandFailure {
            command: request.display(),
            code: output.exit_code,
            output: crate::orchestration::build_error_output(&stdout, ""),
        })
    }
}

struct ArchiveRef<'a> {
    url: &'a str,
    sha256: Option<&'a str>,
    format: ArchiveFormat,
    install_dir: &'a str,
}

fn check_handles(step: &Step, handles: &[CacheHandle]) -> SandkitResult<()> {
    let keys_match = handles.len() == step.mounts.len()
        && handles
            .iter()
            .zip(&step.mounts)
            .all(|(handle, mount)| handle.key() == mount.key);
    if keys_match {
        Ok(())
    } else {
        Err(SandkitError::Internal(format!(
            "step {} expects caches {:?}, got {:?}",
            step.id,
            step.mounts.iter().map(|m| &m.key).collect::<Vec<_>>(),
            handles.iter().map(CacheHandle::key).collect::<Vec<_>>()
        )))
    }
}

/// Handle of the cache carrying a step's stamp
fn primary_handle<'a>(step: &Step, handles: &'a [CacheHandle]) -> SandkitResult<&'a CacheHandle> {
    match step.primary_mount() {
        Some(_) => handles.first().ok_or_else(|| {
            SandkitError::Internal(format!("step {} was given no cache handles", step.id))
        }),
        None => Err(SandkitError::Internal(format!(
            "step {} ({}) has no cache mount to stamp",
            step.id,
            step.action.label()
        ))),
    }
}

/// A complete cache must still hold the exact archive it was stamped with
async fn verify_cached_archive(
    key: &str,
    archive_path: &Path,
    stamp: &Stamp,
    pinned: Option<&str>,
) -> SandkitResult<String> {
    if !archive_path.is_file() {
        return Err(SandkitError::mismatch(
            key,
            format!("stamp is complete but {} is missing", archive_path.display()),
        ));
    }

    let digest = sha256_file(archive_path).await?;
    let recorded = stamp.digest.as_deref().unwrap_or_default();
    if !digest.eq_ignore_ascii_case(recorded) {
        return Err(SandkitError::mismatch(
            key,
            format!("cached archive has sha256 {} but stamp records {}", digest, recorded),
        ));
    }
    if let Some(expected) = pinned {
        if !digest.eq_ignore_ascii_case(expected) {
            return Err(SandkitError::mismatch(
                key,
                format!("cached archive has sha256 {} but {} is pinned", digest, expected),
            ));
        }
    }

    debug!("Verified cached archive for {}", key);
    Ok(digest)
}

/// Environment for commands of a step: earlier exports plus the extended PATH
fn step_env(step: &Step, container: &BuildContainer) -> BTreeMap<String, String> {
    let mut env = step.build_env.clone();
    env.insert("PATH".to_string(), container.path_with(&step.build_path));
    env
}

/// Shell command unpacking an archive into `install_dir`, replacing what was there
fn unpack_command(format: ArchiveFormat, archive: &str, install_dir: &str) -> String {
    let archive = shell_quote(archive);
    let dir = shell_quote(install_dir);
    match format {
        ArchiveFormat::Tar => format!(
            "rm -rf {dir} && mkdir -p {dir} && tar -xf {archive} -C {dir} --strip-components=1"
        ),
        ArchiveFormat::Zip => {
            let tmp = shell_quote(&format!("{}.unpack", install_dir.trim_end_matches('/')));
            format!(
                "rm -rf {dir} {tmp} && mkdir -p {tmp} && unzip -q {archive} -d {tmp} && \
                 mkdir -p \"$(dirname {dir})\" && set -- {tmp}/* && \
                 if [ \"$#\" -eq 1 ] && [ -d \"$1\" ]; then mv \"$1\" {dir} && rm -rf {tmp}; \
                 else mv {tmp} {dir}; fi"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{sha256_bytes, CacheMount, CacheStore};
    use crate::catalog::PackageManager;
    use crate::orchestration::{ContainerConfig, ExecOutput};
    use crate::plan::{fingerprint, StepExports};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingRuntime {
        requests: Mutex<Vec<ExecRequest>>,
        exit_code: i32,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn is_available(&self) -> SandkitResult<bool> {
            Ok(true)
        }
        async fn image_exists(&self, _image: &str) -> SandkitResult<bool> {
            Ok(true)
        }
        async fn pull(&self, _image: &str) -> SandkitResult<()> {
            Ok(())
        }
        async fn create(&self, _config: &ContainerConfig) -> SandkitResult<String> {
            Ok("c1".to_string())
        }
        async fn exec(
            &self,
            _container_id: &str,
            request: &ExecRequest,
            on_output: &(dyn Fn(String) + Send + Sync),
        ) -> SandkitResult<ExecOutput> {
            self.requests.lock().unwrap().push(request.clone());
            on_output("ok".to_string());
            Ok(ExecOutput {
                exit_code: self.exit_code,
                lines: vec!["E: Unable to locate package".to_string()],
            })
        }
        async fn commit(&self, _id: &str, _tag: &str, _changes: &[String]) -> SandkitResult<String> {
            Ok("sha256:img".to_string())
        }
        async fn remove(&self, _id: &str) -> SandkitResult<()> {
            Ok(())
        }
        fn runtime_name(&self) -> &'static str {
            "recording"
        }
    }

    struct BytesFetcher {
        bytes: Vec<u8>,
        calls: AtomicUsize,
    }

    impl BytesFetcher {
        fn new(bytes: &[u8]) -> Self {
            Self {
                bytes: bytes.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for BytesFetcher {
        async fn fetch(&self, _url: &str, dest: &Path) -> SandkitResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, &self.bytes).unwrap();
            Ok(self.bytes.len() as u64)
        }
    }

    fn container() -> BuildContainer {
        BuildContainer {
            id: "c1".to_string(),
            base_path: "/usr/bin:/bin".to_string(),
        }
    }

    fn make_step(id: &str, action: StepAction, mounts: Vec<CacheMount>) -> Step {
        Step {
            index: 0,
            fingerprint: fingerprint(id, &action, &mounts),
            id: id.to_string(),
            description: id.to_string(),
            action,
            mounts,
            build_env: BTreeMap::new(),
            build_path: vec!["/opt/java/jdk-21/bin".to_string()],
            exports: StepExports::default(),
        }
    }

    fn maven_step(sha256: Option<String>) -> Step {
        make_step(
            "tool:maven@3.9.6",
            StepAction::FetchArchive {
                tool: "maven".to_string(),
                version: "3.9.6".to_string(),
                url: "https://example.com/apache-maven-3.9.6-bin.tar.gz".to_string(),
                sha256,
                format: ArchiveFormat::Tar,
                install_dir: "/opt/maven".to_string(),
            },
            vec![
                CacheMount::per_tool("maven-3.9.6", "/var/cache/sandkit/maven-3.9.6"),
                CacheMount::shared("maven-repository", "/root/.m2"),
            ],
        )
    }

    async fn handles(store: &CacheStore, step: &Step) -> Vec<CacheHandle> {
        let mut handles = Vec::new();
        for mount in &step.mounts {
            handles.push(store.acquire(&mount.key).await.unwrap());
        }
        handles
    }

    fn silent(_: String) {}

    #[tokio::test]
    async fn archive_installed_then_cached() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let runtime = Arc::new(RecordingRuntime::default());
        let fetcher = Arc::new(BytesFetcher::new(b"maven tarball"));
        let executor = StepExecutor::new(runtime.clone(), fetcher.clone());
        let step = maven_step(None);

        let held = handles(&store, &step).await;
        let outcome = executor.execute(&step, &held, &container(), &silent).await.unwrap();
        assert_eq!(outcome, StepOutcome::Installed);
        let stamp = Stamp::read(held[0].path(), "maven-3.9.6").await.unwrap().unwrap();
        assert_eq!(stamp.state, CacheState::Complete);
        assert_eq!(stamp.digest.as_deref(), Some(sha256_bytes(b"maven tarball").as_str()));
        drop(held);

        let held = handles(&store, &step).await;
        let outcome = executor.execute(&step, &held, &container(), &silent).await.unwrap();
        assert_eq!(outcome, StepOutcome::Cached);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Unpacked both times, with earlier tools on PATH
        let requests = runtime.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].argv[2].contains("tar -xf /var/cache/sandkit/maven-3.9.6/archive.tar"));
        assert_eq!(
            requests[1].env.get("PATH").map(String::as_str),
            Some("/opt/java/jdk-21/bin:/usr/bin:/bin")
        );
    }

    #[tokio::test]
    async fn tampered_archive_is_mismatch() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let executor = StepExecutor::new(
            Arc::new(RecordingRuntime::default()),
            Arc::new(BytesFetcher::new(b"original")),
        );
        let step = maven_step(None);

        let held = handles(&store, &step).await;
        executor.execute(&step, &held, &container(), &silent).await.unwrap();
        std::fs::write(held[0].path().join("archive.tar"), b"tampered").unwrap();

        let err = executor
            .execute(&step, &held, &container(), &silent)
            .await
            .unwrap_err();
        assert!(matches!(err, SandkitError::ChecksumOrVersionMismatch { .. }));
    }

    #[tokio::test]
    async fn pinned_checksum_mismatch_leaves_no_archive() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let executor = StepExecutor::new(
            Arc::new(RecordingRuntime::default()),
            Arc::new(BytesFetcher::new(b"evil")),
        );
        let step = maven_step(Some(sha256_bytes(b"good")));

        let held = handles(&store, &step).await;
        let err = executor
            .execute(&step, &held, &container(), &silent)
            .await
            .unwrap_err();
        assert!(matches!(err, SandkitError::ChecksumOrVersionMismatch { .. }));
        assert!(!held[0].path().join("archive.tar").exists());
        assert!(!held[0].path().join("archive.part").exists());

        // The building stamp keeps the entry distinguishable from installed
        let stamp = Stamp::read(held[0].path(), "maven-3.9.6").await.unwrap().unwrap();
        assert_eq!(stamp.state, CacheState::Building);
    }

    #[tokio::test]
    async fn failed_command_keeps_building_stamp() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let runtime = Arc::new(RecordingRuntime {
            exit_code: 100,
            ..RecordingRuntime::default()
        });
        let executor = StepExecutor::new(runtime, Arc::new(BytesFetcher::new(b"")));
        let step = make_step(
            "system-packages",
            StepAction::PackageInstall {
                manager: PackageManager::Apt,
                packages: vec!["git".to_string(), "bad pkg".to_string()],
                version: "abc".to_string(),
            },
            vec![
                CacheMount::per_tool("system-packages-abc", "/var/cache/sandkit/system-packages-abc"),
                CacheMount::shared("apt-archives", "/var/cache/apt/archives"),
            ],
        );

        let held = handles(&store, &step).await;
        let err = executor
            .execute(&step, &held, &container(), &silent)
            .await
            .unwrap_err();
        match err {
            SandkitError::CommandFailure { code, output, command } => {
                assert_eq!(code, 100);
                assert!(output.contains("Unable to locate package"));
                assert!(command.contains("'bad pkg'"));
            }
            other => panic!("unexpected error {:?}", other),
        }

        let stamp = Stamp::read(held[0].path(), "system-packages-abc").await.unwrap().unwrap();
        assert_eq!(stamp.state, CacheState::Building);
    }

    #[tokio::test]
    async fn script_sees_cache_env() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = StepExecutor::new(runtime.clone(), Arc::new(BytesFetcher::new(b"")));
        let step = make_step(
            "tool:just@1.25.0",
            StepAction::Script {
                tool: "just".to_string(),
                version: "1.25.0".to_string(),
                script: "install-just".to_string(),
            },
            vec![CacheMount::per_tool("just-1.25.0", "/var/cache/sandkit/just-1.25.0")],
        );

        let held = handles(&store, &step).await;
        assert_eq!(
            executor.execute(&step, &held, &container(), &silent).await.unwrap(),
            StepOutcome::Installed
        );
        assert_eq!(
            executor.execute(&step, &held, &container(), &silent).await.unwrap(),
            StepOutcome::Cached
        );

        let requests = runtime.requests.lock().unwrap();
        assert_eq!(
            requests[0].env.get(CACHE_ENV).map(String::as_str),
            Some("/var/cache/sandkit/just-1.25.0")
        );
        assert_eq!(requests[0].env.get(CACHE_WARM_ENV).map(String::as_str), Some("0"));
        assert_eq!(requests[1].env.get(CACHE_WARM_ENV).map(String::as_str), Some("1"));
    }

    #[tokio::test]
    async fn configure_runs_argv() {
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = StepExecutor::new(runtime.clone(), Arc::new(BytesFetcher::new(b"")));
        let argv = vec!["git".to_string(), "config".to_string()];
        let step = make_step("configure-1", StepAction::Configure { argv: argv.clone() }, vec![]);

        let outcome = executor.execute(&step, &[], &container(), &silent).await.unwrap();
        assert_eq!(outcome, StepOutcome::Ran);
        assert_eq!(runtime.requests.lock().unwrap()[0].argv, argv);
    }

    #[tokio::test]
    async fn mismatched_handles_rejected() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let executor = StepExecutor::new(
            Arc::new(RecordingRuntime::default()),
            Arc::new(BytesFetcher::new(b"")),
        );
        let step = maven_step(None);
        let wrong = vec![store.acquire("jdk-21").await.unwrap()];

        let err = executor
            .execute(&step, &wrong, &container(), &silent)
            .await
            .unwrap_err();
        assert!(matches!(err, SandkitError::Internal(_)));
    }

    #[tokio::test]
    async fn warm_package_install_stays_offline() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = StepExecutor::new(runtime.clone(), Arc::new(BytesFetcher::new(b"")));
        let step = make_step(
            "tool:pnpm@8.15.4",
            StepAction::PackageInstall {
                manager: PackageManager::Npm,
                packages: vec!["pnpm@8.15.4".to_string()],
                version: "8.15.4".to_string(),
            },
            vec![
                CacheMount::per_tool("pnpm-8.15.4", "/var/cache/sandkit/pnpm-8.15.4"),
                CacheMount::shared("npm-cache", "/root/.npm"),
            ],
        );

        let held = handles(&store, &step).await;
        assert_eq!(
            executor.execute(&step, &held, &container(), &silent).await.unwrap(),
            StepOutcome::Installed
        );
        assert_eq!(
            executor.execute(&step, &held, &container(), &silent).await.unwrap(),
            StepOutcome::Cached
        );

        let requests = runtime.requests.lock().unwrap();
        assert!(!requests[0].argv[2].contains("--offline"));
        assert_eq!(
            requests[1].argv[2],
            "npm install -g --offline --cache /root/.npm pnpm@8.15.4"
        );
    }

    #[tokio::test]
    async fn warm_apt_install_skips_update() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        let runtime = Arc::new(RecordingRuntime::default());
        let executor = StepExecutor::new(runtime.clone(), Arc::new(BytesFetcher::new(b"")));
        let step = make_step(
            "system-packages",
            StepAction::PackageInstall {
                manager: PackageManager::Apt,
                packages: vec!["git".to_string()],
                version: "abc".to_string(),
            },
            vec![
                CacheMount::per_tool("system-packages-abc", "/var/cache/sandkit/system-packages-abc"),
                CacheMount::shared("apt-archives", "/var/cache/apt/archives"),
                CacheMount::shared("apt-lists", "/var/lib/apt/lists"),
            ],
        );

        let held = handles(&store, &step).await;
        executor.execute(&step, &held, &container(), &silent).await.unwrap();
        executor.execute(&step, &held, &container(), &silent).await.unwrap();

        let requests = runtime.requests.lock().unwrap();
        assert!(requests[0].argv[2].contains("apt-get update"));
        assert!(!requests[1].argv[2].contains("apt-get update"));
        assert!(requests[1].argv[2].contains("--no-download git"));
    }

    #[tokio::test]
    async fn cached_action_without_mounts_is_rejected() {
        let executor = StepExecutor::new(
            Arc::new(RecordingRuntime::default()),
            Arc::new(BytesFetcher::new(b"")),
        );
        let mut step = maven_step(None);
        step.mounts.clear();

        let err = executor
            .execute(&step, &[], &container(), &silent)
            .await
            .unwrap_err();
        assert!(matches!(err, SandkitError::Internal(_)));
    }

    #[test]
    fn unpack_commands() {
        let tar = unpack_command(ArchiveFormat::Tar, "/var/cache/sandkit/jdk-21/archive.tar", "/opt/java/jdk-21");
        assert_eq!(
            tar,
            "rm -rf /opt/java/jdk-21 && mkdir -p /opt/java/jdk-21 && \
             tar -xf /var/cache/sandkit/jdk-21/archive.tar -C /opt/java/jdk-21 --strip-components=1"
        );

        let zip = unpack_command(ArchiveFormat::Zip, "/c/archive.zip", "/opt/gradle");
        assert!(zip.contains("unzip -q /c/archive.zip -d /opt/gradle.unpack"));
        assert!(zip.contains("mv \"$1\" /opt/gradle"));
    }
}
