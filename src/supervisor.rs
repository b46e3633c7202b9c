//! Helper process supervision: spawn `sbctl serve`, wait for it to become
//! ready, and tear it down (gracefully, then forcefully, then by scanning
//! the process table for orphans).

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::{Error, Result};
use crate::model::{ActiveBundle, Diagnostics, HelperHandle, PortProbe, ReadinessInfo};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const GRACEFUL_WAIT: Duration = Duration::from_secs(3);
const PROBE_ATTEMPTS_BEFORE_COMPENSATION: u32 = 5;
const COMPENSATION_FRACTION: f64 = 0.30;

/// Lines seen on the helper's stdout/stderr so far, drained by dedicated
/// reader tasks rather than polled in-line.
#[derive(Default)]
struct DrainedOutput {
    lines: Vec<String>,
}

pub struct Supervisor {
    drained: Arc<Mutex<DrainedOutput>>,
}

impl Supervisor {
    pub fn spawn(extraction_dir: &Path, archive_path: &Path) -> Result<(Self, HelperHandle)> {
        let mut child = Command::new("sbctl")
            .arg("serve")
            .arg("--support-bundle-location")
            .arg(archive_path)
            .current_dir(extraction_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Internal(format!("failed to spawn sbctl: {e}")))?;

        let pid = child.id().ok_or_else(|| Error::Internal("sbctl exited immediately".into()))?;

        let drained = Arc::new(Mutex::new(DrainedOutput::default()));

        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Arc::clone(&drained));
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Arc::clone(&drained));
        }

        Ok((Supervisor { drained }, HelperHandle { child, pid }))
    }

    /// Poll until the helper's kubeconfig is known and the emulated API
    /// server answers, or the compensation rule kicks in.
    pub async fn wait_ready(
        &self,
        handle: &mut HelperHandle,
        allow_alternative_kubeconfig: bool,
        max_ready: Duration,
    ) -> Result<(PathBuf, ReadinessInfo)> {
        let deadline = Instant::now() + max_ready;
        let mut kubeconfig: Option<PathBuf> = None;
        let mut kubeconfig_seen_at: Option<Instant> = None;
        let mut probe_attempts = 0u32;

        loop {
            if let Ok(Some(status)) = handle.child.try_wait() {
                return Err(Error::HelperExited(format!("sbctl exited with status {status}")));
            }

            if kubeconfig.is_none() {
                kubeconfig = self.find_kubeconfig(allow_alternative_kubeconfig).await;
                if kubeconfig.is_some() {
                    kubeconfig_seen_at = Some(Instant::now());
                }
            }

            if let (Some(path), Some(seen_at)) = (&kubeconfig, kubeconfig_seen_at) {
                probe_attempts += 1;
                if probe_api_available(path).await {
                    return Ok((
                        path.clone(),
                        ReadinessInfo { reached_by_compensation: false, probe_attempts },
                    ));
                }

                let elapsed_since_seen = seen_at.elapsed();
                let compensation_threshold = max_ready.mul_f64(COMPENSATION_FRACTION);
                if probe_attempts >= PROBE_ATTEMPTS_BEFORE_COMPENSATION
                    || elapsed_since_seen >= compensation_threshold
                {
                    return Ok((
                        path.clone(),
                        ReadinessInfo { reached_by_compensation: true, probe_attempts },
                    ));
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::HelperNotReady);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn find_kubeconfig(&self, allow_alternative: bool) -> Option<PathBuf> {
        let re = Regex::new(r"export KUBECONFIG=(\S+)").expect("valid regex");
        let drained = self.drained.lock().await;
        for line in drained.lines.iter().rev() {
            if let Some(c) = re.captures(line) {
                return Some(PathBuf::from(&c[1]));
            }
        }
        drop(drained);

        if allow_alternative {
            for candidate in alternate_kubeconfig_locations() {
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    pub async fn terminate(
        &self,
        mut handle: HelperHandle,
        archive_path: &Path,
        cleanup_orphans: bool,
    ) {
        #[cfg(unix)]
        {
            // SIGTERM first, give it a moment to shut down the emulated API
            // server cleanly before escalating.
            unsafe {
                libc_kill(handle.pid as i32, 15);
            }
        }

        let waited = tokio::time::timeout(GRACEFUL_WAIT, handle.child.wait()).await;
        if waited.is_err() {
            let _ = handle.child.kill().await;
            let _ = handle.child.wait().await;
        }

        if cleanup_orphans {
            self.sweep_orphans(archive_path).await;
        }
    }

    async fn sweep_orphans(&self, archive_path: &Path) {
        // Best-effort: a failure here is logged, never propagated (I5).
        if let Ok(output) = Command::new("ps").arg("-eo").arg("pid,command").output().await {
            let text = String::from_utf8_lossy(&output.stdout);
            let archive_str = archive_path.to_string_lossy();
            for line in text.lines() {
                if line.contains("sbctl") && line.contains(archive_str.as_ref()) {
                    if let Some(pid) = line.trim().split_whitespace().next().and_then(|p| p.parse::<i32>().ok()) {
                        #[cfg(unix)]
                        unsafe {
                            libc_kill(pid, 9);
                        }
                    }
                }
            }
        }
        let _ = Command::new("pkill").arg("-f").arg("sbctl serve").output().await;
    }
}

fn spawn_reader<R>(reader: R, drained: Arc<Mutex<DrainedOutput>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            drained.lock().await.lines.push(line);
        }
    });
}

fn alternate_kubeconfig_locations() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = dirs_home() {
        out.push(home.join(".kube").join("sbctl-config"));
        out.push(home.join(".sbctl").join("kubeconfig"));
    }
    out
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Endpoints checked in order; a single 200 on any of them means the
/// emulated API server is up.
const PROBE_ENDPOINTS: &[&str] = &["/api", "/healthz", "/version", "/apis", "/"];

pub(crate) async fn probe_api_available(kubeconfig: &Path) -> bool {
    let Some(server) = crate::kubectl_exec::server_url_from_kubeconfig(kubeconfig) else {
        return false;
    };
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(2))
        .build();
    if let Ok(client) = client {
        for endpoint in PROBE_ENDPOINTS {
            if let Ok(resp) = client.get(format!("{server}{endpoint}")).send().await {
                if resp.status().as_u16() == 200 {
                    return true;
                }
            }
        }
    }
    probe_with_curl(&server).await
}

/// Backup probe when the HTTP client itself can't be built or every request
/// fails outright (TLS quirks the vendored `sbctl` server sometimes has).
async fn probe_with_curl(server: &str) -> bool {
    for endpoint in PROBE_ENDPOINTS {
        let output = Command::new("curl")
            .arg("-k")
            .arg("-s")
            .arg("-o")
            .arg("/dev/null")
            .arg("-w")
            .arg("%{http_code}")
            .arg("--max-time")
            .arg("2")
            .arg(format!("{server}{endpoint}"))
            .output()
            .await;
        if let Ok(output) = output {
            if String::from_utf8_lossy(&output.stdout).trim() == "200" {
                return true;
            }
        }
    }
    false
}

/// Minimal `kill(2)` wrapper so this module doesn't pull in the full `libc`
/// crate for one syscall.
#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) -> i32 {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig)
}

/// Structured diagnostics attached to `internal_error` responses and shown
/// in full at debug verbosity (helper reachability, API probe, active
/// bundle paths/mtimes).
pub async fn collect_diagnostics(active: Option<&ActiveBundle>) -> Diagnostics {
    let helper_on_path = binary_on_path("sbctl");
    let mut helper_alive = None;
    let mut helper_pid = None;
    let mut api_probe_ok = false;
    let mut port_probes = Vec::new();
    let mut archive_path = None;
    let mut archive_modified = None;
    let mut extraction_dir = None;

    if let Some(bundle) = active {
        archive_path = Some(bundle.archive_path.clone());
        archive_modified = std::fs::metadata(&bundle.archive_path)
            .ok()
            .and_then(|m| m.modified().ok());
        extraction_dir = Some(bundle.extraction_dir.clone());

        if let Some(helper) = &bundle.helper {
            helper_pid = Some(helper.pid);
            helper_alive = Some(process_is_alive(helper.pid));
        }

        if let Some(kubeconfig) = &bundle.kubeconfig_path {
            api_probe_ok = probe_api_available(kubeconfig).await;
            if let Some(server) = crate::kubectl_exec::server_url_from_kubeconfig(kubeconfig) {
                if let Some(port) = port_from_server_url(&server) {
                    port_probes.push(PortProbe {
                        port,
                        listening: api_probe_ok,
                        probe_code: None,
                    });
                }
            }
        }
    }

    Diagnostics {
        helper_on_path,
        helper_alive,
        api_probe_ok,
        bundle_initialized: active.is_some(),
        port_probes,
        helper_pid,
        helper_exit_code: None,
        archive_path,
        archive_modified,
        extraction_dir,
    }
}

fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

fn process_is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        // kill(pid, 0) probes existence without sending a signal.
        unsafe { libc_kill(pid as i32, 0) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn port_from_server_url(server: &str) -> Option<u16> {
    server.rsplit_once(':')?.1.trim_end_matches('/').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubeconfig_export_line_is_parsed() {
        let re = Regex::new(r"export KUBECONFIG=(\S+)").unwrap();
        let line = "some preamble export KUBECONFIG=/tmp/sbctl/kubeconfig more text";
        let captures = re.captures(line).unwrap();
        assert_eq!(&captures[1], "/tmp/sbctl/kubeconfig");
    }

    #[test]
    fn compensation_threshold_is_thirty_percent_of_max_ready() {
        let max_ready = Duration::from_secs(100);
        let threshold = max_ready.mul_f64(COMPENSATION_FRACTION);
        assert_eq!(threshold, Duration::from_secs(30));
    }

    #[test]
    fn probe_attempt_cap_matches_taxonomy() {
        assert_eq!(PROBE_ATTEMPTS_BEFORE_COMPENSATION, 5);
    }
}
