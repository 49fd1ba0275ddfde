//! kubectl wrapper bound to a temporary kubeconfig.
//!
//! The kubeconfig returned by Rancher is written to a private temp file
//! that lives as long as the runner. Every invocation passes it explicitly
//! with `--kubeconfig`, so the user's own `~/.kube/config` is never touched.

use std::ffi::OsStr;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Output;

use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Prefix `kubectl get -o name` puts in front of pod names.
const POD_PREFIX: &str = "pod/";

/// Parse `kubectl get pods -o name` output into bare pod names.
#[must_use]
pub fn parse_pod_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .map(|line| line.strip_prefix(POD_PREFIX).unwrap_or(line))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Runs kubectl against a single downstream cluster.
#[derive(Debug)]
pub struct KubectlRunner {
    /// Temp kubeconfig; `None` once cleaned up.
    kubeconfig: Option<TempPath>,
    /// Recorded separately so the path survives cleanup for diagnostics.
    path: PathBuf,
    binary: PathBuf,
}

impl KubectlRunner {
    /// Persist `kubeconfig` to a new temp file and return a runner using it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialFile`] if the file cannot be created or
    /// written.
    pub fn new(kubeconfig: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("kubeconfig-")
            .suffix(".yaml")
            .tempfile()
            .map_err(Error::CredentialFile)?;

        file.write_all(kubeconfig.as_bytes())
            .and_then(|()| file.flush())
            .map_err(Error::CredentialFile)?;

        let temp_path = file.into_temp_path();
        let path = temp_path.to_path_buf();
        info!(path = %path.display(), "kubeconfig saved");

        Ok(Self {
            kubeconfig: Some(temp_path),
            path,
            binary: PathBuf::from("kubectl"),
        })
    }

    /// Use a different kubectl executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Location of the temp kubeconfig.
    #[must_use]
    pub fn kubeconfig_path(&self) -> &Path {
        &self.path
    }

    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--kubeconfig").arg(&self.path).args(args);
        debug!(command = ?cmd.as_std(), "kubectl");

        cmd.output().await.map_err(|source| Error::Spawn {
            program: self.binary.display().to_string(),
            source,
        })
    }

    /// Apply a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ManifestNotFound`] if `manifest` does not exist and
    /// [`Error::Apply`] if kubectl fails.
    pub async fn apply(&self, manifest: &Path) -> Result<()> {
        if !manifest.exists() {
            return Err(Error::ManifestNotFound(manifest.to_path_buf()));
        }

        info!(manifest = %manifest.display(), "Applying manifest");
        let output = self
            .run([OsStr::new("apply"), OsStr::new("-f"), manifest.as_os_str()])
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Apply(format!("{}\n{}", stderr.trim(), stdout.trim())));
        }

        for line in stdout.lines() {
            debug!("{line}");
        }
        Ok(())
    }

    /// List pod names matching `selector`; empty when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ListPods`] if kubectl fails.
    pub async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let output = self
            .run(["get", "pods", "-n", namespace, "-l", selector, "-o", "name"])
            .await?;

        if !output.status.success() {
            return Err(Error::ListPods(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(parse_pod_names(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Block until `pod` is Ready or `timeout_secs` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] with kubectl's diagnostics otherwise.
    pub async fn wait_for_ready(&self, namespace: &str, pod: &str, timeout_secs: u64) -> Result<()> {
        info!(pod, timeout_secs, "Waiting for pod to be ready");
        let target = format!("pod/{pod}");
        let timeout = format!("--timeout={timeout_secs}s");
        let output = self
            .run([
                "wait",
                "--for=condition=ready",
                target.as_str(),
                "-n",
                namespace,
                timeout.as_str(),
            ])
            .await?;

        if !output.status.success() {
            return Err(Error::Timeout {
                pod: pod.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(pod, "Pod is ready");
        Ok(())
    }

    /// Last `tail` lines of the pod's log.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Logs`] if kubectl fails.
    pub async fn logs(&self, namespace: &str, pod: &str, tail: u32) -> Result<String> {
        let tail = format!("--tail={tail}");
        let output = self
            .run(["logs", pod, "-n", namespace, tail.as_str()])
            .await?;

        if !output.status.success() {
            return Err(Error::Logs(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run `command` in the pod; returns stdout followed by stderr.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exec`] if the command exits non-zero.
    pub async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        let mut args = vec!["exec", pod, "-n", namespace, "--"];
        args.extend(command.iter().map(String::as_str));
        let output = self.run(args).await?;

        if !output.status.success() {
            return Err(Error::Exec(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // `nginx -v` and friends report on stderr.
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(combined)
    }

    /// Delete the temp kubeconfig. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialFile`] if the file exists but cannot be
    /// removed.
    pub fn cleanup(&mut self) -> Result<()> {
        let Some(temp_path) = self.kubeconfig.take() else {
            return Ok(());
        };

        match temp_path.close() {
            Ok(()) => {
                debug!(path = %self.path.display(), "kubeconfig removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::CredentialFile(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters: []\n";

    #[test]
    fn test_parse_pod_names_strips_prefix() {
        let names = parse_pod_names("pod/nginx-7f8\npod/nginx-9c2\n");
        assert_eq!(names, vec!["nginx-7f8", "nginx-9c2"]);
        assert!(names.iter().all(|n| !n.starts_with(POD_PREFIX)));
    }

    #[test]
    fn test_parse_pod_names_empty() {
        assert!(parse_pod_names("").is_empty());
        assert!(parse_pod_names("\n  \n").is_empty());
    }

    #[test]
    fn test_new_writes_private_file() {
        let runner = KubectlRunner::new(KUBECONFIG).unwrap();
        let path = runner.kubeconfig_path();
        assert_eq!(std::fs::read_to_string(path).unwrap(), KUBECONFIG);

        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("kubeconfig-"));
        assert!(name.ends_with(".yaml"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }
    }

    #[test]
    fn test_unique_files() {
        let a = KubectlRunner::new(KUBECONFIG).unwrap();
        let b = KubectlRunner::new(KUBECONFIG).unwrap();
        assert_ne!(a.kubeconfig_path(), b.kubeconfig_path());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let mut runner = KubectlRunner::new(KUBECONFIG).unwrap();
        let path = runner.kubeconfig_path().to_path_buf();

        runner.cleanup().unwrap();
        assert!(!path.exists());
        runner.cleanup().unwrap();
    }

    #[test]
    fn test_cleanup_tolerates_missing_file() {
        let mut runner = KubectlRunner::new(KUBECONFIG).unwrap();
        std::fs::remove_file(runner.kubeconfig_path()).unwrap();
        runner.cleanup().unwrap();
    }

    #[test]
    fn test_drop_removes_file() {
        let runner = KubectlRunner::new(KUBECONFIG).unwrap();
        let path = runner.kubeconfig_path().to_path_buf();
        drop(runner);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_apply_missing_manifest() {
        let runner = KubectlRunner::new(KUBECONFIG).unwrap();
        let missing = Path::new("does/not/exist.yaml");
        match runner.apply(missing).await {
            Err(Error::ManifestNotFound(p)) => assert_eq!(p, missing),
            other => panic!("expected ManifestNotFound, got {other:?}"),
        }
    }
}
