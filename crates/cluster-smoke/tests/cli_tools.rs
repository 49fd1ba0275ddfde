//! terraform and kubectl wrappers against fake executables.
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use cluster_smoke::error::Error;
use cluster_smoke::kubectl::KubectlRunner;
use cluster_smoke::terraform::TerraformRunner;
use serial_test::serial;
use tempfile::TempDir;

const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\n";

/// Fake CLI that records its arguments and working directory, then runs `body`.
struct FakeTool {
    dir: TempDir,
    bin: PathBuf,
    log: PathBuf,
}

impl FakeTool {
    fn new(name: &str, body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join(name);
        let log = dir.path().join("invocations.log");
        let script = format!(
            "#!/bin/sh\necho \"$(pwd -P)|$*\" >> '{}'\n{body}\n",
            log.display()
        );
        fs::write(&bin, script).unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir, bin, log }
    }

    /// Recorded `(cwd, args)` pairs.
    fn invocations(&self) -> Vec<(String, String)> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|line| {
                let (cwd, args) = line.split_once('|').unwrap();
                (cwd.to_string(), args.to_string())
            })
            .collect()
    }
}

/// Terraform runner with its provider directory created.
fn terraform(fake: &FakeTool) -> (TempDir, TerraformRunner) {
    let base = tempfile::tempdir().unwrap();
    fs::create_dir(base.path().join("digitalocean")).unwrap();
    let runner = TerraformRunner::new(base.path(), "digitalocean").with_binary(&fake.bin);
    (base, runner)
}

fn kubectl(fake: &FakeTool) -> KubectlRunner {
    KubectlRunner::new(KUBECONFIG)
        .unwrap()
        .with_binary(&fake.bin)
}

fn canonical(path: &Path) -> String {
    path.canonicalize().unwrap().display().to_string()
}

#[tokio::test]
#[serial]
async fn test_terraform_init_runs_in_provider_dir() {
    let fake = FakeTool::new("terraform", "exit 0");
    let (_base, runner) = terraform(&fake);

    runner.init().await.unwrap();

    let calls = fake.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, canonical(runner.work_dir()));
    assert_eq!(calls[0].1, "init -input=false -no-color");
}

#[tokio::test]
#[serial]
async fn test_terraform_init_failure_carries_stderr() {
    let fake = FakeTool::new(
        "terraform",
        "echo 'Error: Failed to query available provider packages' >&2\nexit 1",
    );
    let (_base, runner) = terraform(&fake);

    match runner.init().await {
        Err(Error::Provision { command, stderr }) => {
            assert_eq!(command, "init");
            assert_eq!(stderr, "Error: Failed to query available provider packages");
        }
        other => panic!("expected Provision error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_terraform_outputs_parsed() {
    let fake = FakeTool::new(
        "terraform",
        r#"cat <<'JSON'
{
  "cluster_id": {"sensitive": false, "type": "string", "value": "c-abc123"},
  "cluster_name": {"sensitive": false, "type": "string", "value": "rancher-test"},
  "provider": {"sensitive": false, "type": "string", "value": "digitalocean"}
}
JSON"#,
    );
    let (_base, runner) = terraform(&fake);

    let outputs = runner.outputs().await.unwrap();
    assert_eq!(outputs.cluster_id, "c-abc123");
    assert_eq!(outputs.cluster_name, "rancher-test");
    assert_eq!(outputs.provider, "digitalocean");
    assert_eq!(fake.invocations()[0].1, "output -json");
}

#[tokio::test]
#[serial]
async fn test_terraform_outputs_malformed() {
    let fake = FakeTool::new("terraform", "echo 'Warning: No outputs found'");
    let (_base, runner) = terraform(&fake);

    assert!(matches!(runner.outputs().await, Err(Error::Parse(_))));
}

#[tokio::test]
#[serial]
async fn test_terraform_apply_and_destroy_arguments() {
    let fake = FakeTool::new("terraform", "exit 0");
    let (_base, runner) = terraform(&fake);

    runner.apply().await.unwrap();
    runner.destroy().await.unwrap();

    let args: Vec<String> = fake.invocations().into_iter().map(|(_, a)| a).collect();
    assert_eq!(
        args,
        vec![
            "apply -auto-approve -input=false",
            "destroy -auto-approve -input=false -no-color",
        ]
    );
}

#[tokio::test]
#[serial]
async fn test_terraform_destroy_failure() {
    let fake = FakeTool::new("terraform", "echo 'Error: state locked' >&2\nexit 1");
    let (_base, runner) = terraform(&fake);

    assert!(matches!(
        runner.destroy().await,
        Err(Error::Provision { command: "destroy", .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_terraform_missing_binary() {
    let fake = FakeTool::new("terraform", "exit 0");
    let (_base, runner) = terraform(&fake);
    let runner = runner.with_binary(fake.dir.path().join("no-such-terraform"));

    assert!(matches!(runner.init().await, Err(Error::Spawn { .. })));
}

#[tokio::test]
#[serial]
async fn test_kubectl_list_pods_strips_prefix() {
    let fake = FakeTool::new("kubectl", "printf 'pod/nginx-7f8\\npod/nginx-9c2\\n'");
    let runner = kubectl(&fake);

    let pods = runner.list_pods("test-app", "app=nginx").await.unwrap();
    assert_eq!(pods, vec!["nginx-7f8", "nginx-9c2"]);

    let expected = format!(
        "--kubeconfig {} get pods -n test-app -l app=nginx -o name",
        runner.kubeconfig_path().display()
    );
    assert_eq!(fake.invocations()[0].1, expected);
}

#[tokio::test]
#[serial]
async fn test_kubectl_list_pods_empty() {
    let fake = FakeTool::new("kubectl", "exit 0");
    let runner = kubectl(&fake);

    assert!(runner
        .list_pods("test-app", "app=nginx")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
#[serial]
async fn test_kubectl_wait_timeout() {
    let fake = FakeTool::new(
        "kubectl",
        "echo 'error: timed out waiting for the condition on pods/nginx-7f8' >&2\nexit 1",
    );
    let runner = kubectl(&fake);

    match runner.wait_for_ready("test-app", "nginx-7f8", 0).await {
        Err(Error::Timeout { pod, stderr }) => {
            assert_eq!(pod, "nginx-7f8");
            assert!(stderr.contains("timed out"));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }

    let args = &fake.invocations()[0].1;
    assert!(args.ends_with("wait --for=condition=ready pod/nginx-7f8 -n test-app --timeout=0s"));
}

#[tokio::test]
#[serial]
async fn test_kubectl_logs_tail() {
    let fake = FakeTool::new(
        "kubectl",
        "printf '10.42.0.1 - - \"GET / HTTP/1.1\" 200\\n'",
    );
    let runner = kubectl(&fake);

    let logs = runner.logs("test-app", "nginx-7f8", 10).await.unwrap();
    assert_eq!(logs, "10.42.0.1 - - \"GET / HTTP/1.1\" 200\n");
    assert!(fake.invocations()[0]
        .1
        .ends_with("logs nginx-7f8 -n test-app --tail=10"));
}

#[tokio::test]
#[serial]
async fn test_kubectl_exec_combines_streams() {
    let fake = FakeTool::new(
        "kubectl",
        "echo 'stdout line'\necho 'nginx version: nginx/1.25.0' >&2",
    );
    let runner = kubectl(&fake);

    let command = vec!["nginx".to_string(), "-v".to_string()];
    let output = runner.exec("test-app", "nginx-7f8", &command).await.unwrap();
    assert_eq!(output, "stdout line\nnginx version: nginx/1.25.0\n");
    assert!(fake.invocations()[0]
        .1
        .ends_with("exec nginx-7f8 -n test-app -- nginx -v"));
}

#[tokio::test]
#[serial]
async fn test_kubectl_exec_failure() {
    let fake = FakeTool::new(
        "kubectl",
        "echo 'error: unable to upgrade connection' >&2\nexit 1",
    );
    let runner = kubectl(&fake);

    let command = vec!["nginx".to_string(), "-v".to_string()];
    match runner.exec("test-app", "nginx-7f8", &command).await {
        Err(Error::Exec(stderr)) => assert_eq!(stderr, "error: unable to upgrade connection"),
        other => panic!("expected Exec error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_kubectl_apply_failure() {
    let fake = FakeTool::new(
        "kubectl",
        "echo 'error: unable to recognize \"nginx.yaml\"' >&2\nexit 1",
    );
    let manifest = fake.dir.path().join("nginx.yaml");
    fs::write(&manifest, "apiVersion: v1\nkind: Namespace\n").unwrap();
    let runner = kubectl(&fake);

    match runner.apply(&manifest).await {
        Err(Error::Apply(message)) => assert!(message.contains("unable to recognize")),
        other => panic!("expected Apply error, got {other:?}"),
    }
}
