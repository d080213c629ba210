use std::collections::BTreeMap;
use std::time::Duration;

use http::Uri;
use k8s_openapi::api::core::v1::Pod;
use kube::{core::admission::AdmissionRequest, Client, Config, ResourceExt};

use crate::{
    errors::SidecarServiceError,
    traits::{Annotated, Labeled, MaybeNamespaced, Named, ObjectRequest},
};

pub const SIDECAR_K8S_HOST_ENV: &str = "SIDECAR_K8S_HOST";
pub const SIDECAR_K8S_NO_VERIFY_ENV: &str = "SIDECAR_K8S_NO_VERIFY";
pub const K8S_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const K8S_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a control plane client that fails fast instead of hanging on an
/// unreachable API server.
pub async fn get_k8s_client() -> Result<Client, SidecarServiceError> {
    let mut k8s_config = Config::infer()
        .await
        .map_err(SidecarServiceError::from_error("Unable to infer K8S configuration"))?;
    if let Ok(host) = std::env::var(SIDECAR_K8S_HOST_ENV) {
        let k8s_uri = format!("https://{}", host)
            .parse::<Uri>()
            .map_err(SidecarServiceError::from_error("Unable to parse SIDECAR_K8S_HOST value"))?;
        k8s_config.cluster_url = k8s_uri;
    }
    k8s_config.accept_invalid_certs = std::env::var(SIDECAR_K8S_NO_VERIFY_ENV)
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false);
    k8s_config.connect_timeout = Some(K8S_CONNECT_TIMEOUT);
    k8s_config.read_timeout = Some(K8S_READ_TIMEOUT);
    Client::try_from(k8s_config)
        .map_err(SidecarServiceError::from_error("Unable to create k8s client"))
}

// Implement required traits for Pod

impl Named for Pod {
    fn name(&self) -> String {
        self.metadata
            .name
            .clone()
            .or_else(|| self.metadata.generate_name.clone())
            .unwrap_or_default()
    }
}

impl MaybeNamespaced for Pod {
    fn namespace(&self) -> Option<String> {
        ResourceExt::namespace(self)
    }
}

impl Annotated for Pod {
    fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.annotations.as_ref()
    }
}

impl Labeled for Pod {
    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.labels.as_ref()
    }
}

// Implement required traits for AdmissionRequest<Pod>
// The request carries the namespace and name for CREATE operations, where the
// embedded object often has neither yet.

impl ObjectRequest<Pod> for AdmissionRequest<Pod> {
    fn object(&self) -> Option<&Pod> {
        self.object.as_ref()
    }
}

impl Named for AdmissionRequest<Pod> {
    fn name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        self.object().map(Named::name).unwrap_or_default()
    }
}

impl MaybeNamespaced for AdmissionRequest<Pod> {
    fn namespace(&self) -> Option<String> {
        self.namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| self.object().and_then(MaybeNamespaced::namespace))
    }
}

impl Annotated for AdmissionRequest<Pod> {
    fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.object().and_then(Annotated::annotations)
    }
}

#[cfg(test)]
mod tests {
    use crate::traits::{Annotated, MaybeNamespaced, Named};
    use k8s_openapi::api::core::v1::{Container, Pod, Volume};
    use sidecar_test_macros::{pod, set_pod_field};
    use std::collections::BTreeMap;

    #[test]
    fn test_pod_traits() {
        let pod = pod!(1, annotations => vec![("a", "b")]);
        assert_eq!(Named::name(&pod), "pod1");
        assert_eq!(MaybeNamespaced::namespace(&pod), Some("ns1".to_string()));
        assert_eq!(pod.annotation("a"), Some(&"b".to_string()));
        assert_eq!(pod.annotation("c"), None);
    }

    #[test]
    fn test_pod_generate_name() {
        let mut pod = pod!(2, containers => vec!["app"], volumes => Vec::<&str>::new());
        pod.metadata.name = None;
        pod.metadata.generate_name = Some("app-7d9f-".to_string());
        assert_eq!(Named::name(&pod), "app-7d9f-");
    }
}
