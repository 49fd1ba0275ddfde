//! Cloud provider selection and provider-specific terraform variables.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Cloud providers the terraform layout knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    /// DigitalOcean droplets.
    DigitalOcean,
    /// Amazon Web Services (not implemented).
    Aws,
    /// Microsoft Azure (not implemented).
    Azure,
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DigitalOcean => write!(f, "digitalocean"),
            Self::Aws => write!(f, "aws"),
            Self::Azure => write!(f, "azure"),
        }
    }
}

impl std::str::FromStr for CloudProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digitalocean" => Ok(Self::DigitalOcean),
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            _ => Err(Error::UnsupportedProvider(s.to_string())),
        }
    }
}

impl CloudProvider {
    /// Collect the provider's terraform variables from `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingConfig`] when a required credential is unset
    /// and [`Error::NotImplemented`] for providers without terraform support.
    pub fn variables<F>(self, lookup: F) -> Result<BTreeMap<String, String>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut vars = BTreeMap::new();

        match self {
            Self::DigitalOcean => {
                let token = get("DO_TOKEN")
                    .ok_or_else(|| Error::MissingConfig(vec!["DO_TOKEN".to_string()]))?;
                vars.insert("do_token".to_string(), token);

                if let Some(region) = get("DO_REGION") {
                    vars.insert("do_region".to_string(), region);
                }
                if let Some(size) = get("DO_SIZE") {
                    vars.insert("do_size".to_string(), size);
                }
            }
            Self::Aws => return Err(Error::NotImplemented("AWS".to_string())),
            Self::Azure => return Err(Error::NotImplemented("Azure".to_string())),
        }

        Ok(vars)
    }
}

/// Resolve provider-specific terraform variables for a provider name.
///
/// # Errors
///
/// Returns [`Error::UnsupportedProvider`] for unknown names, otherwise
/// whatever [`CloudProvider::variables`] returns.
pub fn resolve_vars<F>(provider: &str, lookup: F) -> Result<BTreeMap<String, String>>
where
    F: Fn(&str) -> Option<String>,
{
    provider.parse::<CloudProvider>()?.variables(lookup)
}
