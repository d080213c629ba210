use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, Container, Volume, VolumeMount};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sidecar_macros::logger;

use crate::errors::SidecarServiceError;

logger!("SidecarPolicy");

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMountPolicy {
    pub name: String,
    pub mount_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPolicy {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub image_pull_policy: Option<String>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMountPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigMapReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePolicy {
    pub name: String,
    #[serde(default)]
    pub config_map: Option<ConfigMapReference>,
}

/// What gets merged into every admitted Pod. Loaded once at startup and
/// shared read-only between requests.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SidecarPolicy {
    pub containers: Vec<ContainerPolicy>,
    pub volumes: Vec<VolumePolicy>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl From<&ContainerPolicy> for Container {
    fn from(policy: &ContainerPolicy) -> Self {
        let volume_mounts: Vec<VolumeMount> = policy
            .volume_mounts
            .iter()
            .map(|vm| VolumeMount {
                name: vm.name.clone(),
                mount_path: vm.mount_path.clone(),
                ..Default::default()
            })
            .collect();
        Container {
            name: policy.name.clone(),
            image: Some(policy.image.clone()),
            image_pull_policy: policy
                .image_pull_policy
                .clone()
                .filter(|p| !p.is_empty()),
            volume_mounts: (!volume_mounts.is_empty()).then_some(volume_mounts),
            ..Default::default()
        }
    }
}

impl From<&VolumePolicy> for Volume {
    fn from(policy: &VolumePolicy) -> Self {
        let config_map = policy
            .config_map
            .as_ref()
            .filter(|cm| !cm.name.is_empty())
            .map(|cm| ConfigMapVolumeSource {
                name: Some(cm.name.clone()),
                ..Default::default()
            });
        Volume {
            name: policy.name.clone(),
            config_map,
            ..Default::default()
        }
    }
}

impl SidecarPolicy {
    pub fn containers(&self) -> Vec<Container> {
        self.containers.iter().map(Container::from).collect()
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.volumes.iter().map(Volume::from).collect()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SidecarServiceError> {
        serde_yaml::from_slice(data)
            .map_err(SidecarServiceError::from_error("Unable to parse sidecar policy"))
    }
}

pub fn policy_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn load_policy<P: AsRef<Path>>(path: P) -> Result<SidecarPolicy, SidecarServiceError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(SidecarServiceError::from_error(&format!(
        "Unable to read sidecar policy file {}",
        path.display()
    )))?;
    info!("New configuration: sha256sum {}", policy_digest(&data));
    info!("New configuration: {}", String::from_utf8_lossy(&data));
    let policy = SidecarPolicy::from_bytes(&data)?;
    debug!("New configuration object: {:?}", policy);
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::{load_policy, policy_digest, SidecarPolicy};
    use k8s_openapi::api::core::v1::{Container, Volume};
    use std::io::Write;

    const POLICY: &str = r#"
containers:
  - name: sidecar-nginx
    image: nginx:1.12.2
    imagePullPolicy: IfNotPresent
    volumeMounts:
      - name: nginx-conf
        mountPath: /etc/nginx
volumes:
  - name: nginx-conf
    configMap:
      name: nginx-configmap
labels:
  app: sidecar
annotations:
  example.io/owner: platform
"#;

    #[test]
    fn test_parse_policy() {
        let policy = SidecarPolicy::from_bytes(POLICY.as_bytes()).expect("Unable to parse");
        assert_eq!(policy.containers.len(), 1);
        assert_eq!(policy.containers[0].name, "sidecar-nginx");
        assert_eq!(policy.containers[0].volume_mounts[0].mount_path, "/etc/nginx");
        assert_eq!(policy.volumes[0].config_map.as_ref().unwrap().name, "nginx-configmap");
        assert_eq!(policy.labels.get("app"), Some(&"sidecar".to_string()));
        assert_eq!(
            policy.annotations.get("example.io/owner"),
            Some(&"platform".to_string())
        );
    }

    #[test]
    fn test_parse_partial_policy() {
        let policy = SidecarPolicy::from_bytes(b"labels:\n  team: a\n").expect("Unable to parse");
        assert!(policy.containers.is_empty());
        assert!(policy.volumes.is_empty());
        assert!(policy.annotations.is_empty());
        assert_eq!(policy.labels.len(), 1);
    }

    #[test]
    fn test_parse_json_policy() {
        let policy =
            SidecarPolicy::from_bytes(br#"{"containers": [{"name": "proxy", "image": "img:v1"}]}"#)
                .expect("Unable to parse");
        assert_eq!(policy.containers[0].image, "img:v1");
    }

    #[test]
    fn test_parse_invalid_policy() {
        assert!(SidecarPolicy::from_bytes(b"containers: 7").is_err());
    }

    #[test]
    fn test_container_conversion() {
        let policy = SidecarPolicy::from_bytes(POLICY.as_bytes()).expect("Unable to parse");
        let c = Container::from(&policy.containers[0]);
        assert_eq!(c.image, Some("nginx:1.12.2".to_string()));
        assert_eq!(c.image_pull_policy, Some("IfNotPresent".to_string()));
        let mounts = c.volume_mounts.expect("Missing volume mounts");
        assert_eq!(mounts[0].name, "nginx-conf");

        let policy =
            SidecarPolicy::from_bytes(b"containers:\n  - name: a\n    image: b\n").unwrap();
        let c = Container::from(&policy.containers[0]);
        assert_eq!(c.image_pull_policy, None);
        assert_eq!(c.volume_mounts, None);
    }

    #[test]
    fn test_volume_conversion() {
        let policy = SidecarPolicy::from_bytes(POLICY.as_bytes()).expect("Unable to parse");
        let v = Volume::from(&policy.volumes[0]);
        assert_eq!(
            v.config_map.and_then(|cm| cm.name),
            Some("nginx-configmap".to_string())
        );

        let policy = SidecarPolicy::from_bytes(b"volumes:\n  - name: scratch\n").unwrap();
        let v = Volume::from(&policy.volumes[0]);
        assert_eq!(v.name, "scratch");
        assert!(v.config_map.is_none());
    }

    #[test]
    fn test_load_policy_file() {
        let mut file = tempfile::NamedTempFile::new().expect("Unable to create temp file");
        file.write_all(POLICY.as_bytes()).unwrap();
        let policy = load_policy(file.path()).expect("Unable to load policy");
        assert_eq!(policy.containers().len(), 1);
        assert_eq!(policy.volumes().len(), 1);
    }

    #[test]
    fn test_load_missing_policy_file() {
        let e = load_policy("/does/not/exist.yaml").expect_err("Expected an error");
        assert!(e.error.starts_with("Unable to read sidecar policy file"));
    }

    #[test]
    fn test_policy_digest() {
        assert_eq!(
            policy_digest(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
