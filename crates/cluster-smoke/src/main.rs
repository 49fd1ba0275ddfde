//! Rancher downstream cluster smoke test CLI.
//!
//! Provisions a cluster with terraform, then deploys nginx into it and
//! checks that logs and exec work through the Rancher-issued kubeconfig.

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cluster_smoke::driver::{Driver, Outcome, RunOptions, SystemBackend};
use cluster_smoke::interrupt::{self, ProvisionGuard};
use cluster_smoke::ui;

/// Rancher downstream cluster smoke test.
#[derive(Parser)]
#[command(
    name = "cluster-smoke",
    version,
    about = "Smoke-test a Rancher downstream cluster",
    long_about = "Provision a downstream cluster through Rancher with terraform,\n\
                  deploy a test application and verify pod logs and exec.\n\n\
                  Rancher and cloud credentials are read from the environment\n\
                  or a .env file in the current directory."
)]
struct Cli {
    /// Name of the downstream cluster.
    #[arg(long, env = "SMOKE_CLUSTER_NAME", default_value = "rancher-test")]
    cluster_name: String,

    /// Manifest deployed into the cluster.
    #[arg(long, default_value = "manifests/nginx.yaml")]
    manifest: PathBuf,

    /// Namespace of the test application.
    #[arg(long, default_value = "test-app")]
    namespace: String,

    /// Label selector of the test pod.
    #[arg(long, default_value = "app=nginx")]
    selector: String,

    /// Seconds to wait for the test pod to become ready.
    #[arg(long, default_value_t = 120)]
    ready_timeout: u64,

    /// Number of log lines to fetch.
    #[arg(long, default_value_t = 10)]
    log_lines: u32,

    /// Directory holding one terraform module per cloud provider.
    #[arg(long, default_value = "./terraform")]
    terraform_dir: PathBuf,

    /// terraform executable.
    #[arg(long, env = "TERRAFORM_BIN", default_value = "terraform")]
    terraform_bin: PathBuf,

    /// kubectl executable.
    #[arg(long, env = "KUBECTL_BIN", default_value = "kubectl")]
    kubectl_bin: PathBuf,

    /// Destroy the cluster after all checks pass.
    #[arg(long)]
    destroy: bool,

    /// Print the generated kubeconfig (contains credentials).
    #[arg(long)]
    show_kubeconfig: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,cluster_smoke=debug")
    } else {
        EnvFilter::new("warn,cluster_smoke=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Absolute, so the printed teardown command works from any directory.
    let terraform_dir = if cli.terraform_dir.is_absolute() {
        cli.terraform_dir
    } else {
        std::env::current_dir()
            .context("failed to resolve current directory")?
            .join(cli.terraform_dir)
    };

    let backend = SystemBackend {
        terraform_dir,
        terraform_bin: cli.terraform_bin,
        kubectl_bin: cli.kubectl_bin,
    };
    let options = RunOptions {
        cluster_name: cli.cluster_name,
        manifest: cli.manifest,
        namespace: cli.namespace,
        selector: cli.selector,
        ready_timeout_secs: cli.ready_timeout,
        log_lines: cli.log_lines,
        destroy: cli.destroy,
        show_kubeconfig: cli.show_kubeconfig,
        ..RunOptions::default()
    };

    ui::print_banner(&options.cluster_name);

    let guard = Arc::new(ProvisionGuard::new());
    let mut driver = Driver::new(backend, options, Arc::clone(&guard));

    // On interrupt the pipeline future is dropped, which removes the
    // temporary kubeconfig. Child processes keep running.
    let outcome = tokio::select! {
        outcome = driver.run() => outcome,
        () = interrupt::shutdown_signal() => {
            interrupt::report_interrupt(&guard);
            Outcome::interrupted(&guard)
        }
    };

    Ok(ExitCode::from(outcome.exit_code()))
}
