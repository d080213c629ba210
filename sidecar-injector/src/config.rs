use sidecar_common::constants::{
    SIDECAR_CERT_ORGANIZATION, SIDECAR_CERT_ORGANIZATION_ENV, SIDECAR_INJECT_PATH,
    SIDECAR_INJECT_PATH_ENV, SIDECAR_NAMESPACE, SIDECAR_NAMESPACE_ENV, SIDECAR_POLICY_FILE,
    SIDECAR_POLICY_FILE_ENV, SIDECAR_PORT, SIDECAR_PORT_ENV, SIDECAR_REQUEST_TIMEOUT_SECONDS,
    SIDECAR_REQUEST_TIMEOUT_SECONDS_ENV, SIDECAR_SERVICE_NAME, SIDECAR_SERVICE_NAME_ENV,
    SIDECAR_SHUTDOWN_GRACE_SECONDS, SIDECAR_SHUTDOWN_GRACE_SECONDS_ENV,
};
use sidecar_common::errors::SidecarServiceError;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct InjectorConfig {
    pub port: u16,
    pub service_name: String,
    pub namespace: String,
    pub policy_file: String,
    pub inject_path: String,
    pub cert_organization: String,
    pub shutdown_grace: Duration,
    pub request_timeout: Duration,
}

fn string_var<F>(lookup: &F, name: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T, SidecarServiceError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match lookup(name).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.trim().parse::<T>().map_err(|e| {
            SidecarServiceError::from_string(format!("Invalid value {} for {}: {}", v, name, e))
                .with_component("Config")
        }),
    }
}

impl InjectorConfig {
    pub fn from_env() -> Result<Self, SidecarServiceError> {
        InjectorConfig::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads every setting through `lookup`, falling back to the defaults.
    /// Values that fail to parse are errors rather than defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SidecarServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let inject_path = string_var(&lookup, SIDECAR_INJECT_PATH_ENV, SIDECAR_INJECT_PATH);
        if !inject_path.starts_with('/') {
            return Err(SidecarServiceError::from_string(format!(
                "Invalid value {} for {}: path must start with /",
                inject_path, SIDECAR_INJECT_PATH_ENV
            ))
            .with_component("Config"));
        }
        Ok(InjectorConfig {
            port: parsed_var(&lookup, SIDECAR_PORT_ENV, SIDECAR_PORT)?,
            service_name: string_var(&lookup, SIDECAR_SERVICE_NAME_ENV, SIDECAR_SERVICE_NAME),
            namespace: string_var(&lookup, SIDECAR_NAMESPACE_ENV, SIDECAR_NAMESPACE),
            policy_file: string_var(&lookup, SIDECAR_POLICY_FILE_ENV, SIDECAR_POLICY_FILE),
            inject_path,
            cert_organization: string_var(
                &lookup,
                SIDECAR_CERT_ORGANIZATION_ENV,
                SIDECAR_CERT_ORGANIZATION,
            ),
            shutdown_grace: Duration::from_secs(parsed_var(
                &lookup,
                SIDECAR_SHUTDOWN_GRACE_SECONDS_ENV,
                SIDECAR_SHUTDOWN_GRACE_SECONDS,
            )?),
            request_timeout: Duration::from_secs(parsed_var(
                &lookup,
                SIDECAR_REQUEST_TIMEOUT_SECONDS_ENV,
                SIDECAR_REQUEST_TIMEOUT_SECONDS,
            )?),
        })
    }

    pub fn common_name(&self) -> String {
        format!("{}.{}.svc", self.service_name, self.namespace)
    }
}
