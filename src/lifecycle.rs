//! Lifecycle owner: the single-active-bundle state machine, background
//! cleanup task, and shutdown sequencing. Owns the `ActiveBundle` record
//! exclusively — request handlers never reach it through a shared mutex,
//! they run on the same mailbox task that owns it (see rpc.rs).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use rand::Rng;
use reqwest::Client;
use tar::Archive;
use tokio::task::JoinHandle;

use crate::acquire::{self, AcquireOptions};
use crate::config::Config;
use crate::error::Result;
use crate::model::{ActiveBundle, BundleState};
use crate::sandbox;
use crate::supervisor::Supervisor;

pub struct InitializeArgs {
    pub source: String,
    pub force: bool,
}

pub struct Lifecycle {
    config: Config,
    http: Client,
    active: Option<ActiveBundle>,
    supervisor: Option<Supervisor>,
    cleanup_task: Option<JoinHandle<()>>,
}

impl Lifecycle {
    pub fn new(config: Config) -> Self {
        Lifecycle {
            config,
            http: Client::new(),
            active: None,
            supervisor: None,
            cleanup_task: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active_bundle(&self) -> Option<&ActiveBundle> {
        self.active.as_ref()
    }

    /// Start the background cleanup task if configured. Cancellation-safe:
    /// aborting the handle simply ends the task, it never poisons state.
    pub async fn spawn_periodic_cleanup(self_arc: &std::sync::Arc<tokio::sync::Mutex<Lifecycle>>) {
        let interval = {
            let guard = self_arc.lock().await;
            guard.config.cleanup_interval
        };
        let arc = std::sync::Arc::clone(self_arc);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                tracing::info!("running periodic bundle cleanup");
                arc.lock().await.cleanup_active_only().await;
            }
        });
        self_arc.lock().await.cleanup_task = Some(handle);
    }

    pub async fn initialize(&mut self, args: InitializeArgs) -> Result<&ActiveBundle> {
        if let Some(active) = &self.active {
            if active.is_ready() && !args.force {
                return Ok(self.active.as_ref().unwrap());
            }
        }

        if args.force {
            self.teardown_active().await;
        }

        match self.initialize_inner(&args).await {
            Ok(()) => Ok(self.active.as_ref().unwrap()),
            Err(e) => {
                // *failed* transitions straight back to *idle*: drop whatever
                // partial state this attempt built up and let the caller retry.
                self.teardown_active().await;
                Err(e)
            }
        }
    }

    async fn initialize_inner(&mut self, args: &InitializeArgs) -> Result<()> {
        self.active = Some(ActiveBundle {
            id: generate_bundle_id(&args.source),
            source: args.source.clone(),
            archive_path: PathBuf::new(),
            extraction_dir: PathBuf::new(),
            kubeconfig_path: None,
            helper: None,
            state: BundleState::Acquiring,
            acquired_at: SystemTime::now(),
            ready_at: None,
            readiness: None,
        });

        let acquire_opts = AcquireOptions {
            storage_root: self.config.bundle_dir.clone(),
            max_download_size: self.config.max_download_size,
            max_download_time: self.config.max_download_time,
            auth_token: self.config.auth_token.clone(),
        };
        let archive_path = acquire::resolve_source(&self.http, &args.source, &acquire_opts).await?;

        let bundle_id = self.active.as_ref().unwrap().id.clone();
        let extraction_dir = self.config.bundle_dir.join(&bundle_id).join("extracted");
        extract_archive(&archive_path, &extraction_dir)?;

        {
            let active = self.active.as_mut().unwrap();
            active.archive_path = archive_path.clone();
            active.extraction_dir = extraction_dir.clone();
            active.state = BundleState::Starting;
        }

        let (supervisor, mut helper) = Supervisor::spawn(&extraction_dir, &archive_path)?;
        let (kubeconfig, readiness) = supervisor
            .wait_ready(
                &mut helper,
                self.config.allow_alternative_kubeconfig,
                self.config.max_ready_time,
            )
            .await?;

        let active = self.active.as_mut().unwrap();
        active.helper = Some(helper);
        active.kubeconfig_path = Some(kubeconfig);
        active.state = BundleState::Ready;
        active.ready_at = Some(SystemTime::now());
        active.readiness = Some(readiness);
        self.supervisor = Some(supervisor);

        Ok(())
    }

    async fn teardown_active(&mut self) {
        if let (Some(active), Some(supervisor)) = (self.active.take(), self.supervisor.take()) {
            if let Some(helper) = active.helper {
                supervisor
                    .terminate(helper, &active.archive_path, self.config.cleanup_orphans)
                    .await;
            }
            if active.extraction_dir.starts_with(&self.config.bundle_dir) {
                let _ = std::fs::remove_dir_all(active.extraction_dir.parent().unwrap_or(&active.extraction_dir));
            }
        }
    }

    async fn cleanup_active_only(&mut self) {
        self.teardown_active().await;
    }

    pub async fn shutdown(&mut self) {
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        self.teardown_active().await;
        if self.config.bundle_dir_is_ephemeral {
            let _ = std::fs::remove_dir_all(&self.config.bundle_dir);
        }
    }
}

fn extract_archive(archive_path: &Path, extraction_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(extraction_dir)?;
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_name = entry.path()?.to_string_lossy().into_owned();
        let safe_name = sandbox::strip_and_reject(&raw_name).unwrap_or_else(|_| {
            PathBuf::from(
                Path::new(&raw_name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unnamed".to_string()),
            )
        });
        let dest = extraction_dir.join(&safe_name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        entry.unpack(&dest)?;
    }

    Ok(())
}

/// Last path segment of `source`, sanitized to `[A-Za-z0-9_-]`, `b_`-prefixed
/// if it would otherwise start with a digit or hyphen (or be empty), with an
/// 8-byte random hex suffix appended so repeated sources never collide.
fn generate_bundle_id(source: &str) -> String {
    let last_segment = source.rsplit(['/', '\\']).next().unwrap_or("");
    let sanitized: String = last_segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let needs_prefix = sanitized.is_empty()
        || sanitized.starts_with(|c: char| c.is_ascii_digit())
        || sanitized.starts_with('-');
    let base = if needs_prefix { format!("b_{sanitized}") } else { sanitized };

    let suffix: [u8; 8] = rand::thread_rng().gen();
    let mut suffix_hex = String::with_capacity(16);
    for byte in suffix {
        suffix_hex.push_str(&format!("{byte:02x}"));
    }

    format!("{base}_{suffix_hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_id_keeps_the_last_path_segment() {
        let id = generate_bundle_id("/tmp/bundles/my-cluster.tar.gz");
        assert!(id.starts_with("my-cluster.tar.gz_"));
    }

    #[test]
    fn bundle_id_sanitizes_and_prefixes_digit_start() {
        let id = generate_bundle_id("https://vendor.example.com/analyze/123abc");
        assert!(id.starts_with("b_123abc_"), "got {id}");
    }

    #[test]
    fn bundle_id_prefixes_empty_segment() {
        let id = generate_bundle_id("https://example.com/");
        assert!(id.starts_with("b__"), "got {id}");
    }

    #[test]
    fn bundle_id_suffix_is_sixteen_hex_chars() {
        let id = generate_bundle_id("cluster");
        let suffix = id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
