use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::ByteString;
use kube::api::PostParams;
use kube::core::ObjectMeta;
use kube::Api;
use sidecar_common::annotations::{
    SIDECAR_INJECTION_NAMESPACE_LABEL, SIDECAR_INJECTION_NAMESPACE_LABEL_VALUE,
};
use sidecar_common::constants::{
    MAX_RECONCILE_ATTEMPTS, WEBHOOK_ADMISSION_REVIEW_VERSIONS, WEBHOOK_CONFIGURATION_NAME,
    WEBHOOK_NAME, WEBHOOK_SERVICE_PORT,
};
use sidecar_common::errors::SidecarServiceError;
use sidecar_macros::logger;
use std::collections::BTreeMap;

logger!("WebhookRegistrar");

const FAILURE_POLICY_FAIL: &str = "Fail";
const SIDE_EFFECTS_NONE: &str = "None";
const RULE_SCOPE_ALL: &str = "*";

/// Read/write access to the registration object in the control plane.
#[async_trait]
pub trait WebhookConfigurationStore {
    async fn fetch(&self, name: &str) -> Result<Option<MutatingWebhookConfiguration>, kube::Error>;

    async fn create(
        &self,
        configuration: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error>;

    async fn replace(
        &self,
        name: &str,
        configuration: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error>;
}

#[async_trait]
impl WebhookConfigurationStore for Api<MutatingWebhookConfiguration> {
    async fn fetch(&self, name: &str) -> Result<Option<MutatingWebhookConfiguration>, kube::Error> {
        self.get_opt(name).await
    }

    async fn create(
        &self,
        configuration: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error> {
        Api::create(self, &PostParams::default(), configuration).await
    }

    async fn replace(
        &self,
        name: &str,
        configuration: &MutatingWebhookConfiguration,
    ) -> Result<MutatingWebhookConfiguration, kube::Error> {
        Api::replace(self, name, &PostParams::default(), configuration).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

pub struct WebhookRegistrar {
    pub service_name: String,
    pub service_namespace: String,
    pub inject_path: String,
}

impl WebhookRegistrar {
    /// Desired registration. Fields the API server would default are set
    /// explicitly so a stored object compares equal to it.
    pub fn desired(&self, ca_pem: &str) -> MutatingWebhookConfiguration {
        let webhook = MutatingWebhook {
            name: WEBHOOK_NAME.to_string(),
            admission_review_versions: WEBHOOK_ADMISSION_REVIEW_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            side_effects: SIDE_EFFECTS_NONE.to_string(),
            failure_policy: Some(FAILURE_POLICY_FAIL.to_string()),
            client_config: WebhookClientConfig {
                ca_bundle: Some(ByteString(ca_pem.as_bytes().to_vec())),
                service: Some(ServiceReference {
                    name: self.service_name.clone(),
                    namespace: self.service_namespace.clone(),
                    path: Some(self.inject_path.clone()),
                    port: Some(WEBHOOK_SERVICE_PORT),
                }),
                url: None,
            },
            rules: Some(vec![RuleWithOperations {
                operations: Some(vec!["CREATE".to_string(), "UPDATE".to_string()]),
                api_groups: Some(vec!["".to_string()]),
                api_versions: Some(vec!["v1".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                scope: Some(RULE_SCOPE_ALL.to_string()),
            }]),
            namespace_selector: Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    SIDECAR_INJECTION_NAMESPACE_LABEL.to_string(),
                    SIDECAR_INJECTION_NAMESPACE_LABEL_VALUE.to_string(),
                )])),
                match_expressions: None,
            }),
            ..Default::default()
        };
        MutatingWebhookConfiguration {
            metadata: ObjectMeta {
                name: Some(WEBHOOK_CONFIGURATION_NAME.to_string()),
                ..Default::default()
            },
            webhooks: Some(vec![webhook]),
        }
    }

    pub async fn reconcile<S: WebhookConfigurationStore + Sync>(
        &self,
        store: &S,
        ca_pem: &str,
    ) -> Result<ReconcileOutcome, SidecarServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.reconcile_once(store, ca_pem).await {
                Err(e) if is_conflict(&e) && attempt < MAX_RECONCILE_ATTEMPTS => {
                    warn!(
                        "Conflict reconciling {} [{}/{}], retrying: {}",
                        WEBHOOK_CONFIGURATION_NAME, attempt, MAX_RECONCILE_ATTEMPTS, e
                    );
                }
                result => {
                    return result.map_err(|e| {
                        SidecarServiceError::from_string(format!(
                            "Failed to create or update the mutatingwebhookconfiguration {}: {}",
                            WEBHOOK_CONFIGURATION_NAME, e
                        ))
                        .with_component("WebhookRegistrar")
                    })
                }
            }
        }
    }

    async fn reconcile_once<S: WebhookConfigurationStore + Sync>(
        &self,
        store: &S,
        ca_pem: &str,
    ) -> Result<ReconcileOutcome, kube::Error> {
        info!(
            "Creating or updating the mutatingwebhookconfiguration: {}",
            WEBHOOK_CONFIGURATION_NAME
        );
        let mut desired = self.desired(ca_pem);
        match store.fetch(WEBHOOK_CONFIGURATION_NAME).await? {
            None => {
                store.create(&desired).await?;
                info!(
                    "Created mutatingwebhookconfiguration: {}",
                    WEBHOOK_CONFIGURATION_NAME
                );
                Ok(ReconcileOutcome::Created)
            }
            Some(existing) if !configuration_differs(&existing, &desired) => {
                info!(
                    "The mutatingwebhookconfiguration: {} already exists and has no change",
                    WEBHOOK_CONFIGURATION_NAME
                );
                Ok(ReconcileOutcome::Unchanged)
            }
            Some(existing) => {
                desired.metadata.resource_version = existing.metadata.resource_version.clone();
                store.replace(WEBHOOK_CONFIGURATION_NAME, &desired).await?;
                info!(
                    "Updated the mutatingwebhookconfiguration: {}",
                    WEBHOOK_CONFIGURATION_NAME
                );
                Ok(ReconcileOutcome::Updated)
            }
        }
    }
}

fn is_conflict(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(response) if response.code == 409)
}

/// Compares the webhook fields this service owns. Anything else on the
/// stored object is left to whoever set it.
pub fn webhook_differs(existing: &MutatingWebhook, desired: &MutatingWebhook) -> bool {
    existing.name != desired.name
        || existing.admission_review_versions != desired.admission_review_versions
        || existing.side_effects != desired.side_effects
        || existing.failure_policy != desired.failure_policy
        || existing.rules != desired.rules
        || existing.namespace_selector != desired.namespace_selector
        || existing.client_config.ca_bundle != desired.client_config.ca_bundle
        || existing.client_config.service != desired.client_config.service
}

pub fn configuration_differs(
    existing: &MutatingWebhookConfiguration,
    desired: &MutatingWebhookConfiguration,
) -> bool {
    let existing = existing.webhooks.as_deref().unwrap_or(&[]);
    let desired = desired.webhooks.as_deref().unwrap_or(&[]);
    existing.len() != desired.len()
        || existing
            .iter()
            .zip(desired.iter())
            .any(|(e, d)| webhook_differs(e, d))
}
