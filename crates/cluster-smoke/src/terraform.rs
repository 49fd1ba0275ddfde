//! Terraform runner for the downstream cluster.
//!
//! Each provider has its own terraform module under `<base_dir>/<provider>`.
//! The runner drives `init`, `apply`, `output` and `destroy` in that
//! directory and writes the `terraform.tfvars` file consumed by the module.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Name of the variables file written into the working directory.
pub const TFVARS_FILE: &str = "terraform.tfvars";

/// Values read back from `terraform output -json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionOutputs {
    /// Rancher cluster id (e.g., `c-m-abc123`).
    pub cluster_id: String,
    /// Cluster display name.
    pub cluster_name: String,
    /// Provider reported by the module.
    pub provider: String,
}

/// Inputs for `terraform.tfvars`.
#[derive(Clone, Default)]
pub struct TerraformVars {
    pub rancher_url: String,
    pub rancher_token: String,
    pub k3s_version: String,
    pub cluster_name: String,
    /// Provider-specific variables, written after the fixed keys.
    pub extra: BTreeMap<String, String>,
}

impl std::fmt::Debug for TerraformVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformVars")
            .field("rancher_url", &self.rancher_url)
            .field("rancher_token", &"[REDACTED]")
            .field("k3s_version", &self.k3s_version)
            .field("cluster_name", &self.cluster_name)
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TerraformVars {
    /// Render the variables as HCL `key = "value"` lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidVariable`] if an extra key is not a valid
    /// HCL identifier.
    pub fn render(&self) -> Result<String> {
        let fixed = [
            ("rancher_url", self.rancher_url.as_str()),
            ("rancher_token", self.rancher_token.as_str()),
            ("k3s_version", self.k3s_version.as_str()),
            ("cluster_name", self.cluster_name.as_str()),
        ];

        let mut content = String::new();
        for (key, value) in fixed
            .into_iter()
            .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        {
            if !is_identifier(key) {
                return Err(Error::InvalidVariable(key.to_string()));
            }
            content.push_str(key);
            content.push_str(" = ");
            content.push_str(&hcl_quote(value));
            content.push('\n');
        }
        Ok(content)
    }
}

/// Quote a string as an HCL literal.
///
/// Template sequences are doubled so terraform does not interpolate them.
#[must_use]
pub fn hcl_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Deserialize)]
struct OutputEntry {
    value: serde_json::Value,
}

/// Parse the JSON document printed by `terraform output -json`.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the document is not a JSON object of
/// `{ "name": { "value": ... } }` entries or lacks `cluster_id`.
pub fn parse_outputs(raw: &[u8]) -> Result<ProvisionOutputs> {
    let outputs: BTreeMap<String, OutputEntry> =
        serde_json::from_slice(raw).map_err(|e| Error::Parse(e.to_string()))?;

    let text = |name: &str| {
        outputs.get(name).and_then(|entry| match &entry.value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        })
    };

    let cluster_id = text("cluster_id")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::Parse("output \"cluster_id\" is missing".to_string()))?;

    Ok(ProvisionOutputs {
        cluster_id,
        cluster_name: text("cluster_name").unwrap_or_default(),
        provider: text("provider").unwrap_or_default(),
    })
}

/// Runs terraform in a provider-specific working directory.
#[derive(Debug, Clone)]
pub struct TerraformRunner {
    work_dir: PathBuf,
    provider: String,
    binary: PathBuf,
}

impl TerraformRunner {
    /// Create a runner for `<base_dir>/<provider>`.
    #[must_use]
    pub fn new(base_dir: impl AsRef<Path>, provider: &str) -> Self {
        Self {
            work_dir: base_dir.as_ref().join(provider),
            provider: provider.to_string(),
            binary: PathBuf::from("terraform"),
        }
    }

    /// Use a different terraform executable.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Terraform working directory.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Path of the generated variables file.
    #[must_use]
    pub fn tfvars_path(&self) -> PathBuf {
        self.work_dir.join(TFVARS_FILE)
    }

    /// Shell command an operator can run to tear the cluster down by hand.
    #[must_use]
    pub fn manual_destroy_command(&self) -> String {
        format!(
            "cd {} && {} destroy -auto-approve",
            self.work_dir.display(),
            self.binary.display()
        )
    }

    fn command(&self, args: &[&str]) -> Command {
        debug!(dir = %self.work_dir.display(), ?args, "terraform");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).current_dir(&self.work_dir);
        cmd
    }

    async fn output(&self, mut cmd: Command) -> Result<Output> {
        cmd.output().await.map_err(|source| Error::Spawn {
            program: self.binary.display().to_string(),
            source,
        })
    }

    /// Run `terraform init`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provision`] with terraform's stderr on failure.
    pub async fn init(&self) -> Result<()> {
        info!(dir = %self.work_dir.display(), "Running terraform init");
        let output = self
            .output(self.command(&["init", "-input=false", "-no-color"]))
            .await?;
        check("init", &output)?;
        info!("terraform initialized");
        Ok(())
    }

    /// Write `terraform.tfvars`, replacing any previous file.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails or the file cannot be written.
    pub async fn write_variables(&self, vars: &TerraformVars) -> Result<()> {
        let content = vars.render()?;
        let path = self.tfvars_path();
        tokio::fs::write(&path, content).await?;

        // The file carries the Rancher token.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        info!(path = %path.display(), "terraform variables written");
        Ok(())
    }

    /// Run `terraform apply`. Blocks until terraform finishes.
    ///
    /// Stdout streams to the terminal; stderr is captured for the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provision`] with terraform's stderr on failure.
    pub async fn apply(&self) -> Result<()> {
        info!("Running terraform apply (this may take 10-15 minutes)");
        let mut cmd = self.command(&["apply", "-auto-approve", "-input=false"]);
        cmd.stdout(Stdio::inherit()).stderr(Stdio::piped());
        let output = self.output(cmd).await?;
        check("apply", &output)?;
        info!("terraform apply completed");
        Ok(())
    }

    /// Read the module outputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provision`] if terraform fails and [`Error::Parse`]
    /// if its output cannot be interpreted.
    pub async fn outputs(&self) -> Result<ProvisionOutputs> {
        let output = self.output(self.command(&["output", "-json"])).await?;
        check("output", &output)?;
        let outputs = parse_outputs(&output.stdout)?;
        debug!(cluster_id = %outputs.cluster_id, "terraform outputs parsed");
        Ok(outputs)
    }

    /// Run `terraform destroy`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Provision`] with terraform's stderr on failure.
    pub async fn destroy(&self) -> Result<()> {
        info!(dir = %self.work_dir.display(), "Destroying cluster");
        let output = self
            .output(self.command(&["destroy", "-auto-approve", "-input=false", "-no-color"]))
            .await?;
        check("destroy", &output)?;
        info!("Cluster destroyed");
        Ok(())
    }
}

fn check(command: &'static str, output: &Output) -> Result<()> {
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::Provision {
            command,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
