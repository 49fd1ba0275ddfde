//! Smoke-test pipeline.
//!
//! The driver walks a fixed sequence of [`Stage`]s. Each stage either
//! succeeds and advances, or fails and halts the run; nothing is retried
//! and nothing is rolled back. Collaborators are reached through the
//! traits below so the sequencing can be tested without a real Rancher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, warn};

use crate::config::SmokeConfig;
use crate::error::{Error, Result};
use crate::interrupt::ProvisionGuard;
use crate::kubectl::KubectlRunner;
use crate::provider;
use crate::rancher::RancherClient;
use crate::terraform::{ProvisionOutputs, TerraformRunner, TerraformVars};
use crate::ui;

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Nothing has run yet.
    Idle,
    /// Configuration loaded and validated.
    ConfigLoaded,
    /// Rancher login verified.
    Connected,
    /// Provider-specific terraform variables collected.
    ProviderVarsResolved,
    /// `terraform init` done.
    ProvisionInitialized,
    /// `terraform.tfvars` written.
    VariablesWritten,
    /// `terraform apply` done.
    Provisioned,
    /// Terraform outputs parsed.
    OutputsRead,
    /// Kubeconfig retrieved and persisted for kubectl.
    CredentialObtained,
    /// Test manifest applied.
    ManifestApplied,
    /// Test pod located.
    PodFound,
    /// Test pod is Ready.
    PodReady,
    /// Pod logs retrieved.
    LogsFetched,
    /// Command executed in the pod.
    ExecDone,
    /// Cluster destroyed (only with `--destroy`).
    TornDown,
    /// All checks passed.
    Done,
}

impl Stage {
    /// Get the next stage in the sequence.
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Idle => Self::ConfigLoaded,
            Self::ConfigLoaded => Self::Connected,
            Self::Connected => Self::ProviderVarsResolved,
            Self::ProviderVarsResolved => Self::ProvisionInitialized,
            Self::ProvisionInitialized => Self::VariablesWritten,
            Self::VariablesWritten => Self::Provisioned,
            Self::Provisioned => Self::OutputsRead,
            Self::OutputsRead => Self::CredentialObtained,
            Self::CredentialObtained => Self::ManifestApplied,
            Self::ManifestApplied => Self::PodFound,
            Self::PodFound => Self::PodReady,
            Self::PodReady => Self::LogsFetched,
            Self::LogsFetched => Self::ExecDone,
            Self::ExecDone => Self::TornDown,
            Self::TornDown | Self::Done => Self::Done,
        }
    }

    /// Human-readable description of the work that reaches this stage.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::Idle => "Not started",
            Self::ConfigLoaded => "Reading configuration",
            Self::Connected => "Connecting to Rancher",
            Self::ProviderVarsResolved => "Checking cloud provider credentials",
            Self::ProvisionInitialized => "Initializing Terraform",
            Self::VariablesWritten => "Preparing cluster configuration",
            Self::Provisioned => "Creating downstream cluster",
            Self::OutputsRead => "Checking cluster details",
            Self::CredentialObtained => "Getting the kubeconfig",
            Self::ManifestApplied => "Deploying test application",
            Self::PodFound => "Locating test pod",
            Self::PodReady => "Waiting for pod to be ready",
            Self::LogsFetched => "Testing pod logs",
            Self::ExecDone => "Testing pod exec",
            Self::TornDown => "Destroying cluster",
            Self::Done => "Complete",
        }
    }

    /// Step number for progress display (0 for `Idle` and `Done`).
    #[must_use]
    pub fn step_number(self) -> u8 {
        match self {
            Self::Idle | Self::Done => 0,
            Self::ConfigLoaded => 1,
            Self::Connected => 2,
            Self::ProviderVarsResolved => 3,
            Self::ProvisionInitialized => 4,
            Self::VariablesWritten => 5,
            Self::Provisioned => 6,
            Self::OutputsRead => 7,
            Self::CredentialObtained => 8,
            Self::ManifestApplied => 9,
            Self::PodFound => 10,
            Self::PodReady => 11,
            Self::LogsFetched => 12,
            Self::ExecDone => 13,
            Self::TornDown => 14,
        }
    }

    /// Number of numbered steps in a run.
    #[must_use]
    pub fn total_steps(destroy: bool) -> u8 {
        if destroy {
            Self::TornDown.step_number()
        } else {
            Self::ExecDone.step_number()
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Rancher operations used by the pipeline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// API base URL, for display.
    fn url(&self) -> String;

    /// Confirm the configured token is valid.
    async fn verify_login(&self) -> Result<()>;

    /// Generate a kubeconfig for a downstream cluster.
    async fn get_kubeconfig(&self, cluster_id: &str) -> Result<String>;
}

/// Infrastructure-as-code operations used by the pipeline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Command an operator can run to tear the cluster down by hand.
    fn teardown_command(&self) -> String;

    async fn init(&self) -> Result<()>;

    async fn write_variables(&self, vars: &TerraformVars) -> Result<()>;

    async fn apply(&self) -> Result<()>;

    async fn outputs(&self) -> Result<ProvisionOutputs>;

    async fn destroy(&self) -> Result<()>;
}

/// Cluster CLI operations used by the pipeline.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterCli: Send + Sync {
    async fn apply(&self, manifest: &Path) -> Result<()>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>>;

    async fn wait_for_ready(&self, namespace: &str, pod: &str, timeout_secs: u64) -> Result<()>;

    async fn logs(&self, namespace: &str, pod: &str, tail: u32) -> Result<String>;

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String>;

    /// Remove any credential material written to disk.
    fn cleanup(&mut self) -> Result<()>;
}

/// Factory for everything the pipeline talks to.
#[cfg_attr(test, automock)]
pub trait Backend: Send + Sync {
    fn load_config(&self) -> Result<SmokeConfig>;

    fn connect(&self, config: &SmokeConfig) -> Result<Box<dyn ControlPlane>>;

    fn provider_vars(&self, provider: &str) -> Result<BTreeMap<String, String>>;

    fn provisioner(&self, provider: &str) -> Box<dyn Provisioner>;

    fn cluster_cli(&self, kubeconfig: &str) -> Result<Box<dyn ClusterCli>>;
}

#[async_trait]
impl ControlPlane for RancherClient {
    fn url(&self) -> String {
        RancherClient::url(self).to_string()
    }

    async fn verify_login(&self) -> Result<()> {
        RancherClient::verify_login(self).await
    }

    async fn get_kubeconfig(&self, cluster_id: &str) -> Result<String> {
        RancherClient::get_kubeconfig(self, cluster_id).await
    }
}

#[async_trait]
impl Provisioner for TerraformRunner {
    fn teardown_command(&self) -> String {
        self.manual_destroy_command()
    }

    async fn init(&self) -> Result<()> {
        TerraformRunner::init(self).await
    }

    async fn write_variables(&self, vars: &TerraformVars) -> Result<()> {
        TerraformRunner::write_variables(self, vars).await
    }

    async fn apply(&self) -> Result<()> {
        TerraformRunner::apply(self).await
    }

    async fn outputs(&self) -> Result<ProvisionOutputs> {
        TerraformRunner::outputs(self).await
    }

    async fn destroy(&self) -> Result<()> {
        TerraformRunner::destroy(self).await
    }
}

#[async_trait]
impl ClusterCli for KubectlRunner {
    async fn apply(&self, manifest: &Path) -> Result<()> {
        KubectlRunner::apply(self, manifest).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<String>> {
        KubectlRunner::list_pods(self, namespace, selector).await
    }

    async fn wait_for_ready(&self, namespace: &str, pod: &str, timeout_secs: u64) -> Result<()> {
        KubectlRunner::wait_for_ready(self, namespace, pod, timeout_secs).await
    }

    async fn logs(&self, namespace: &str, pod: &str, tail: u32) -> Result<String> {
        KubectlRunner::logs(self, namespace, pod, tail).await
    }

    async fn exec(&self, namespace: &str, pod: &str, command: &[String]) -> Result<String> {
        KubectlRunner::exec(self, namespace, pod, command).await
    }

    fn cleanup(&mut self) -> Result<()> {
        KubectlRunner::cleanup(self)
    }
}

/// Backend wired to the real terraform, Rancher and kubectl.
#[derive(Debug, Clone)]
pub struct SystemBackend {
    /// Directory holding one terraform module per provider.
    pub terraform_dir: PathBuf,
    pub terraform_bin: PathBuf,
    pub kubectl_bin: PathBuf,
}

impl Backend for SystemBackend {
    fn load_config(&self) -> Result<SmokeConfig> {
        SmokeConfig::load()
    }

    fn connect(&self, config: &SmokeConfig) -> Result<Box<dyn ControlPlane>> {
        let client =
            RancherClient::connect(&config.rancher_url, config.token.clone(), config.insecure_tls)?;
        Ok(Box::new(client))
    }

    fn provider_vars(&self, provider: &str) -> Result<BTreeMap<String, String>> {
        provider::resolve_vars(provider, |key| std::env::var(key).ok())
    }

    fn provisioner(&self, provider: &str) -> Box<dyn Provisioner> {
        Box::new(
            TerraformRunner::new(&self.terraform_dir, provider)
                .with_binary(self.terraform_bin.clone()),
        )
    }

    fn cluster_cli(&self, kubeconfig: &str) -> Result<Box<dyn ClusterCli>> {
        let runner = KubectlRunner::new(kubeconfig)?.with_binary(self.kubectl_bin.clone());
        Ok(Box::new(runner))
    }
}

/// Knobs for a single run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub cluster_name: String,
    /// Manifest deployed into the new cluster.
    pub manifest: PathBuf,
    pub namespace: String,
    /// Label selector for the test pod.
    pub selector: String,
    pub ready_timeout_secs: u64,
    pub log_lines: u32,
    /// Command run inside the test pod.
    pub exec_command: Vec<String>,
    /// Tear the cluster down after all checks pass.
    pub destroy: bool,
    /// Print the kubeconfig instead of redacting it.
    pub show_kubeconfig: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            cluster_name: "rancher-test".into(),
            manifest: PathBuf::from("manifests/nginx.yaml"),
            namespace: "test-app".into(),
            selector: "app=nginx".into(),
            ready_timeout_secs: 120,
            log_lines: 10,
            exec_command: vec!["nginx".into(), "-v".into()],
            destroy: false,
            show_kubeconfig: false,
        }
    }
}

/// What a successful run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub cluster_name: String,
    pub cluster_id: String,
    pub provider: String,
    pub pod: String,
    pub log_bytes: usize,
    pub exec_output: String,
    /// Whether the cluster was torn down at the end of the run.
    pub destroyed: bool,
    pub teardown_command: String,
}

/// Terminal state of a run.
#[derive(Debug)]
pub enum Outcome {
    /// Every stage passed.
    Done(Summary),
    /// The step entering `stage` failed; nothing after it ran.
    Failed { stage: Stage, error: Error },
    /// The process was interrupted.
    Interrupted { teardown_hint: Option<String> },
}

impl Outcome {
    /// Build the interrupted outcome from the current guard state.
    #[must_use]
    pub fn interrupted(guard: &ProvisionGuard) -> Self {
        Self::Interrupted {
            teardown_hint: guard.teardown_hint(),
        }
    }

    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Done(_) => 0,
            Self::Failed { .. } | Self::Interrupted { .. } => 1,
        }
    }
}

struct WorkloadReport {
    pod: String,
    log_bytes: usize,
    exec_output: String,
}

/// Runs the smoke-test pipeline once.
pub struct Driver<B: Backend> {
    backend: B,
    options: RunOptions,
    guard: Arc<ProvisionGuard>,
    stage: Stage,
    history: Vec<Stage>,
}

impl<B: Backend> Driver<B> {
    /// Create a driver. `guard` is shared with the interrupt path.
    #[must_use]
    pub fn new(backend: B, options: RunOptions, guard: Arc<ProvisionGuard>) -> Self {
        Self {
            backend,
            options,
            guard,
            stage: Stage::Idle,
            history: Vec::new(),
        }
    }

    /// Last stage reached.
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage reached so far, in order.
    #[must_use]
    pub fn history(&self) -> &[Stage] {
        &self.history
    }

    /// Run every stage until done or the first failure.
    pub async fn run(&mut self) -> Outcome {
        match self.pipeline().await {
            Ok(summary) => {
                self.stage = Stage::Done;
                self.history.push(Stage::Done);
                info!(cluster_id = %summary.cluster_id, "Smoke test passed");
                print_summary(&summary);
                Outcome::Done(summary)
            }
            Err(error) => {
                let stage = self.stage.next();
                error!(stage = ?stage, error = %error, "Smoke test failed");
                ui::print_error(&format!("Failed at step '{stage}': {error}"));
                if let Some(command) = self.guard.teardown_hint() {
                    ui::print_warning("Cluster resources may exist");
                    ui::print_info(&format!("To clean up run: {command}"));
                }
                Outcome::Failed { stage, error }
            }
        }
    }

    fn begin(&self) {
        let stage = self.stage.next();
        info!(stage = ?stage, "Executing step");
        ui::print_progress_step(
            stage.step_number(),
            Stage::total_steps(self.options.destroy),
            stage.description(),
        );
    }

    fn advance(&mut self) {
        self.stage = self.stage.next();
        self.history.push(self.stage);
    }

    async fn pipeline(&mut self) -> Result<Summary> {
        self.begin();
        let config = self.backend.load_config()?;
        debug!(?config, "Configuration loaded");
        ui::print_success(&format!(
            "Rancher {} / K3s {} on {}",
            config.rancher_version, config.k3s_version, config.provider
        ));
        self.advance();

        self.begin();
        let control_plane = self.backend.connect(&config)?;
        control_plane.verify_login().await?;
        ui::print_success(&format!(
            "Connected to Rancher successfully: {}",
            control_plane.url()
        ));
        self.advance();

        self.begin();
        let extra = self.backend.provider_vars(&config.provider)?;
        ui::print_success(&format!("{} credentials configured", config.provider));
        self.advance();

        self.begin();
        let provisioner = self.backend.provisioner(&config.provider);
        let teardown_command = provisioner.teardown_command();
        self.guard.record_teardown(teardown_command.clone());
        provisioner.init().await?;
        ui::print_success("Terraform initialized");
        self.advance();

        self.begin();
        let vars = TerraformVars {
            rancher_url: config.rancher_url.clone(),
            rancher_token: config.token.clone(),
            k3s_version: config.k3s_version.clone(),
            cluster_name: self.options.cluster_name.clone(),
            extra,
        };
        provisioner.write_variables(&vars).await?;
        ui::print_success("Terraform variables written");
        self.advance();

        self.begin();
        ui::print_info("Running terraform apply (this may take 10-15 minutes)...");
        self.guard.mark_creating();
        provisioner.apply().await?;
        ui::print_success("Downstream cluster created");
        self.advance();

        self.begin();
        let outputs = provisioner.outputs().await?;
        ui::print_kv("Cluster ID", &outputs.cluster_id);
        ui::print_kv("Cluster name", &outputs.cluster_name);
        self.advance();

        self.begin();
        let kubeconfig = control_plane.get_kubeconfig(&outputs.cluster_id).await?;
        self.report_kubeconfig(&kubeconfig);
        let mut cli = self.backend.cluster_cli(&kubeconfig)?;
        self.advance();

        let workload = self.exercise_workload(cli.as_ref()).await;
        if let Err(e) = cli.cleanup() {
            warn!(error = %e, "Failed to remove temporary kubeconfig");
        }
        let workload = workload?;

        let destroyed = if self.options.destroy {
            self.begin();
            provisioner.destroy().await?;
            ui::print_success("Cluster destroyed");
            self.advance();
            true
        } else {
            false
        };

        Ok(Summary {
            cluster_name: self.options.cluster_name.clone(),
            cluster_id: outputs.cluster_id,
            provider: outputs.provider,
            pod: workload.pod,
            log_bytes: workload.log_bytes,
            exec_output: workload.exec_output,
            destroyed,
            teardown_command,
        })
    }

    async fn exercise_workload(&mut self, cli: &dyn ClusterCli) -> Result<WorkloadReport> {
        self.begin();
        cli.apply(&self.options.manifest).await?;
        ui::print_success("Application deployed");
        self.advance();

        self.begin();
        let pods = cli
            .list_pods(&self.options.namespace, &self.options.selector)
            .await?;
        let pod = pods.into_iter().next().ok_or_else(|| Error::NoPods {
            namespace: self.options.namespace.clone(),
            selector: self.options.selector.clone(),
        })?;
        ui::print_success(&format!("Found pod: {pod}"));
        self.advance();

        self.begin();
        cli.wait_for_ready(&self.options.namespace, &pod, self.options.ready_timeout_secs)
            .await?;
        ui::print_success(&format!("Pod {pod} is ready"));
        self.advance();

        self.begin();
        let logs = cli
            .logs(&self.options.namespace, &pod, self.options.log_lines)
            .await?;
        ui::print_success(&format!("Logs retrieved ({} bytes)", logs.len()));
        ui::print_block(&logs);
        self.advance();

        self.begin();
        let exec_output = cli
            .exec(&self.options.namespace, &pod, &self.options.exec_command)
            .await?;
        ui::print_success(&format!("Exec successful: {}", exec_output.trim()));
        self.advance();

        Ok(WorkloadReport {
            pod,
            log_bytes: logs.len(),
            exec_output,
        })
    }

    fn report_kubeconfig(&self, kubeconfig: &str) {
        if self.options.show_kubeconfig {
            ui::print_warning("Printing kubeconfig (contains cluster credentials)");
            ui::print_block(kubeconfig);
        } else {
            ui::print_success(&format!(
                "kubeconfig obtained ({} bytes, redacted; use --show-kubeconfig to print)",
                kubeconfig.len()
            ));
        }
    }
}

fn print_summary(summary: &Summary) {
    ui::print_section("ALL TESTS PASSED!");
    ui::print_kv("Cluster", &summary.cluster_name);
    ui::print_kv("Cluster ID", &summary.cluster_id);
    ui::print_kv("Provider", &summary.provider);
    println!();
    println!("Tests completed:");
    for check in [
        "Cluster provisioning",
        "Kubeconfig access",
        "Application deployment",
        "Pod logs",
        "Pod exec",
    ] {
        ui::print_list_item(check);
    }
    println!();
    if summary.destroyed {
        ui::print_success("Cluster destroyed");
    } else {
        ui::print_info("To destroy:");
        ui::print_info(&format!("  {}", summary.teardown_command));
        ui::print_info("  or re-run with --destroy");
    }
}
