//! Error types for the smoke-test pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while running the smoke test.
#[derive(Error, Debug)]
pub enum Error {
    /// Required settings were absent or empty.
    #[error("missing required environment variables: {}", .0.join(", "))]
    MissingConfig(Vec<String>),

    /// The local `.env` file exists but could not be parsed.
    #[error("failed to load .env file: {0}")]
    ConfigFile(#[from] dotenvy::Error),

    /// The Rancher HTTP client could not be constructed.
    #[error("failed to create Rancher client: {0}")]
    Connect(#[source] reqwest::Error),

    /// The Rancher token was rejected or the API was unreachable.
    #[error("verify login failed: {0}")]
    Auth(String),

    /// Provider name is not known at all.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Provider is recognized but has no implementation yet.
    #[error("{0} provider not implemented yet")]
    NotImplemented(String),

    /// A tfvars key is not a valid HCL identifier.
    #[error("invalid terraform variable name: {0:?}")]
    InvalidVariable(String),

    /// A terraform subcommand exited non-zero.
    #[error("terraform {command} failed: {stderr}")]
    Provision {
        command: &'static str,
        stderr: String,
    },

    /// `terraform output -json` could not be interpreted.
    #[error("parse terraform output: {0}")]
    Parse(String),

    /// The cluster id does not resolve in Rancher.
    #[error("cluster not found: {0}")]
    NotFound(String),

    /// The `generateKubeconfig` action (or the lookup preceding it) failed.
    #[error("generate kubeconfig for {cluster_id} failed: {message}")]
    Action { cluster_id: String, message: String },

    /// The temporary kubeconfig file could not be written or removed.
    #[error("kubeconfig temp file: {0}")]
    CredentialFile(#[source] std::io::Error),

    #[error("manifest file not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("kubectl apply failed: {0}")]
    Apply(String),

    #[error("get pods failed: {0}")]
    ListPods(String),

    /// The label selector matched nothing.
    #[error("no pods found in namespace {namespace} matching {selector}")]
    NoPods { namespace: String, selector: String },

    /// `kubectl wait` gave up before the pod became ready.
    #[error("pod {pod} not ready: {stderr}")]
    Timeout { pod: String, stderr: String },

    #[error("get logs failed: {0}")]
    Logs(String),

    #[error("exec failed: {0}")]
    Exec(String),

    /// An external binary could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
