pub const SIDECAR_PORT_ENV: &str = "SIDECAR_PORT";
pub const SIDECAR_PORT: u16 = 8443;
pub const SIDECAR_SERVICE_NAME_ENV: &str = "SIDECAR_SERVICE_NAME";
pub const SIDECAR_SERVICE_NAME: &str = "sidecar-injector";
pub const SIDECAR_NAMESPACE_ENV: &str = "POD_NAMESPACE";
pub const SIDECAR_NAMESPACE: &str = "default";
pub const SIDECAR_POLICY_FILE_ENV: &str = "SIDECAR_POLICY_FILE";
pub const SIDECAR_POLICY_FILE: &str = "/etc/webhook/config/sidecarconfig.yaml";
pub const SIDECAR_INJECT_PATH_ENV: &str = "SIDECAR_INJECT_PATH";
pub const SIDECAR_INJECT_PATH: &str = "/inject";
pub const SIDECAR_CERT_ORGANIZATION_ENV: &str = "SIDECAR_CERT_ORGANIZATION";
pub const SIDECAR_CERT_ORGANIZATION: &str = "sidecar-injector";
pub const SIDECAR_SHUTDOWN_GRACE_SECONDS_ENV: &str = "SIDECAR_SHUTDOWN_GRACE_SECONDS";
pub const SIDECAR_SHUTDOWN_GRACE_SECONDS: u64 = 30;
pub const SIDECAR_REQUEST_TIMEOUT_SECONDS_ENV: &str = "SIDECAR_REQUEST_TIMEOUT_SECONDS";
pub const SIDECAR_REQUEST_TIMEOUT_SECONDS: u64 = 10;
pub const SIDECAR_LOG_CONFIG_FILE_ENV: &str = "SIDECAR_LOG_CONFIG_FILE";
pub const SIDECAR_LOG_CONFIG_FILE: &str = "/opt/sidecar-injector/log4rs.yaml";

pub const WEBHOOK_CONFIGURATION_NAME: &str = "sidecar-injector-webhook";
pub const WEBHOOK_NAME: &str = "sidecar-injector.sidecar-injector-webhook.io";
pub const WEBHOOK_ADMISSION_REVIEW_VERSIONS: [&str; 2] = ["v1", "v1beta1"];
pub const WEBHOOK_SERVICE_PORT: i32 = 443;
pub const MAX_RECONCILE_ATTEMPTS: u8 = 3;

pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
pub const KUBE_PUBLIC_NAMESPACE: &str = "kube-public";
pub const IGNORED_NAMESPACES: [&str; 2] = [KUBE_SYSTEM_NAMESPACE, KUBE_PUBLIC_NAMESPACE];
