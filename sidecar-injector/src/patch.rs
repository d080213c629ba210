use json_patch::PatchOperation::{Add, Replace};
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::{Container, Pod, Volume};
use serde::Serialize;
use serde_json::Value;
use sidecar_common::annotations::{
    SIDECAR_INJECTOR_ANNOTATION_STATUS, SIDECAR_INJECTOR_STATUS_INJECTED,
};
use sidecar_common::errors::SidecarServiceError;
use sidecar_common::policy::SidecarPolicy;
use sidecar_common::traits::{Annotated, Labeled};
use std::collections::BTreeMap;

pub const SPEC_PATH: &str = "/spec";
pub const CONTAINERS_PATH: &str = "/spec/containers";
pub const VOLUMES_PATH: &str = "/spec/volumes";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetadataMap {
    Labels,
    Annotations,
}

impl MetadataMap {
    pub fn base_path(&self) -> &'static str {
        match self {
            MetadataMap::Labels => "/metadata/labels",
            MetadataMap::Annotations => "/metadata/annotations",
        }
    }
}

/// Escapes a map key so it can be used as a single JSON pointer token (RFC 6901).
pub fn escape_json_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

fn add(path: String, value: Value) -> PatchOperation {
    Add(AddOperation { path, value })
}

// An empty target array does not exist yet in the object, so the first
// operation has to create it with the whole list.
fn add_to_array<T: Serialize>(
    n_existing: usize,
    to_add: &[T],
    base_path: &str,
) -> Result<Vec<PatchOperation>, SidecarServiceError> {
    if to_add.is_empty() {
        return Ok(vec![]);
    }
    if n_existing == 0 {
        return Ok(vec![add(base_path.to_string(), serde_json::to_value(to_add)?)]);
    }
    to_add
        .iter()
        .map(|x| {
            serde_json::to_value(x)
                .map(|v| add(format!("{}/-", base_path), v))
                .map_err(SidecarServiceError::from)
        })
        .collect()
}

pub fn add_containers(
    existing: &[Container],
    to_add: &[Container],
    base_path: &str,
) -> Result<Vec<PatchOperation>, SidecarServiceError> {
    add_to_array(existing.len(), to_add, base_path)
}

pub fn add_volumes(
    existing: &[Volume],
    to_add: &[Volume],
    base_path: &str,
) -> Result<Vec<PatchOperation>, SidecarServiceError> {
    add_to_array(existing.len(), to_add, base_path)
}

pub fn update_metadata_map(
    mode: MetadataMap,
    existing: &BTreeMap<String, String>,
    to_add: &BTreeMap<String, String>,
) -> Vec<PatchOperation> {
    let base_path = mode.base_path();
    let mut first = existing.is_empty();
    let mut patches = vec![];
    for (key, value) in to_add {
        let path = format!("{}/{}", base_path, escape_json_pointer(key));
        if first {
            first = false;
            let mut m = serde_json::Map::new();
            m.insert(key.clone(), Value::String(value.clone()));
            patches.push(add(base_path.to_string(), Value::Object(m)));
        } else if existing.contains_key(key) {
            patches.push(Replace(ReplaceOperation {
                path,
                value: Value::String(value.clone()),
            }));
        } else {
            patches.push(add(path, Value::String(value.clone())));
        }
    }
    patches
}

/// Policy annotations with the injection status marker merged in last, so
/// the policy can never override it.
pub fn injected_annotations(policy: &SidecarPolicy) -> BTreeMap<String, String> {
    let mut annotations = policy.annotations.clone();
    annotations.insert(
        SIDECAR_INJECTOR_ANNOTATION_STATUS.to_string(),
        SIDECAR_INJECTOR_STATUS_INJECTED.to_string(),
    );
    annotations
}

/// Computes the patch that merges `policy` into `pod`.
///
/// Stages run in a fixed order: containers, volumes, annotations, labels.
/// Every stage reads the original Pod and none of them sees the output of
/// another, so each one must run exactly once per request.
pub fn create_patch(pod: &Pod, policy: &SidecarPolicy) -> Result<Patch, SidecarServiceError> {
    let empty = BTreeMap::new();
    let containers: &[Container] = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or(&[]);
    let volumes: &[Volume] = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or(&[]);

    let mut patches = vec![];
    patches.extend(add_containers(
        containers,
        &policy.containers(),
        CONTAINERS_PATH,
    )?);
    patches.extend(add_volumes(volumes, &policy.volumes(), VOLUMES_PATH)?);
    // Array adds need /spec to exist
    if pod.spec.is_none() && !patches.is_empty() {
        patches.insert(0, add(SPEC_PATH.to_string(), Value::Object(Default::default())));
    }
    patches.extend(update_metadata_map(
        MetadataMap::Annotations,
        pod.annotations().unwrap_or(&empty),
        &injected_annotations(policy),
    ));
    patches.extend(update_metadata_map(
        MetadataMap::Labels,
        pod.labels().unwrap_or(&empty),
        &policy.labels,
    ));
    Ok(Patch(patches))
}

#[cfg(test)]
mod tests {
    use super::{
        add_containers, add_volumes, create_patch, escape_json_pointer, injected_annotations,
        update_metadata_map, MetadataMap, CONTAINERS_PATH, VOLUMES_PATH,
    };
    use json_patch::PatchOperation::{Add, Replace};
    use json_patch::{AddOperation, PatchOperation, ReplaceOperation};
    use k8s_openapi::api::core::v1::{Container, Pod, Volume};
    use serde_json::json;
    use sidecar_common::annotations::SIDECAR_INJECTOR_ANNOTATION_STATUS;
    use sidecar_common::policy::SidecarPolicy;
    use sidecar_test_macros::{pod, set_pod_field};
    use std::collections::BTreeMap;

    fn containers(names: &[&str]) -> Vec<Container> {
        names
            .iter()
            .map(|n| Container {
                name: n.to_string(),
                image: Some(format!("{}:latest", n)),
                ..Default::default()
            })
            .collect()
    }

    fn map(xs: &[(&str, &str)]) -> BTreeMap<String, String> {
        xs.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ops(patches: &[PatchOperation]) -> Vec<(&'static str, String)> {
        patches
            .iter()
            .map(|p| match p {
                Add(AddOperation { path, .. }) => ("add", path.clone()),
                Replace(ReplaceOperation { path, .. }) => ("replace", path.clone()),
                _ => ("other", String::new()),
            })
            .collect()
    }

    #[test]
    fn test_escape_json_pointer() {
        assert_eq!(escape_json_pointer("app"), "app");
        assert_eq!(escape_json_pointer("example.io/owner"), "example.io~1owner");
        assert_eq!(escape_json_pointer("a~b/c"), "a~0b~1c");
        assert_eq!(escape_json_pointer("~1"), "~01");
    }

    #[test]
    fn test_add_containers_to_empty_list() {
        let to_add = containers(&["proxy", "logger", "loader"]);
        let patches = add_containers(&[], &to_add, CONTAINERS_PATH).unwrap();
        assert_eq!(patches.len(), 1);
        match &patches[0] {
            Add(AddOperation { path, value }) => {
                assert_eq!(path, CONTAINERS_PATH);
                let names: Vec<&str> = value
                    .as_array()
                    .expect("Expected an array")
                    .iter()
                    .map(|c| c["name"].as_str().unwrap())
                    .collect();
                assert_eq!(names, vec!["proxy", "logger", "loader"]);
            }
            p => panic!("Unexpected patch {:?}", p),
        }
    }

    #[test]
    fn test_add_containers_to_existing_list() {
        let to_add = containers(&["proxy", "logger"]);
        let patches = add_containers(&containers(&["app"]), &to_add, CONTAINERS_PATH).unwrap();
        assert_eq!(
            ops(&patches),
            vec![
                ("add", "/spec/containers/-".to_string()),
                ("add", "/spec/containers/-".to_string()),
            ]
        );
        match &patches[1] {
            Add(AddOperation { value, .. }) => assert_eq!(value["name"], "logger"),
            p => panic!("Unexpected patch {:?}", p),
        }
    }

    #[test]
    fn test_add_nothing() {
        assert!(add_containers(&[], &[], CONTAINERS_PATH).unwrap().is_empty());
        assert!(add_volumes(&[], &[], VOLUMES_PATH).unwrap().is_empty());
        assert!(update_metadata_map(MetadataMap::Labels, &map(&[]), &map(&[])).is_empty());
    }

    #[test]
    fn test_add_volumes() {
        let volume = |n: &str| Volume {
            name: n.to_string(),
            ..Default::default()
        };
        let patches = add_volumes(&[], &[volume("a"), volume("b")], VOLUMES_PATH).unwrap();
        assert_eq!(ops(&patches), vec![("add", "/spec/volumes".to_string())]);
        let patches = add_volumes(&[volume("x")], &[volume("a")], VOLUMES_PATH).unwrap();
        assert_eq!(ops(&patches), vec![("add", "/spec/volumes/-".to_string())]);
    }

    #[test]
    fn test_update_labels_on_empty_map() {
        let patches = update_metadata_map(
            MetadataMap::Labels,
            &map(&[]),
            &map(&[("app", "x"), ("team", "y")]),
        );
        assert_eq!(
            ops(&patches),
            vec![
                ("add", "/metadata/labels".to_string()),
                ("add", "/metadata/labels/team".to_string()),
            ]
        );
        match &patches[0] {
            Add(AddOperation { value, .. }) => assert_eq!(value, &json!({"app": "x"})),
            p => panic!("Unexpected patch {:?}", p),
        }
    }

    #[test]
    fn test_update_annotations_on_existing_map() {
        let patches = update_metadata_map(
            MetadataMap::Annotations,
            &map(&[("example.io/owner", "a")]),
            &map(&[("example.io/owner", "b"), ("example.io/team", "c")]),
        );
        assert_eq!(
            ops(&patches),
            vec![
                ("replace", "/metadata/annotations/example.io~1owner".to_string()),
                ("add", "/metadata/annotations/example.io~1team".to_string()),
            ]
        );
    }

    #[test]
    fn test_status_annotation_wins_over_policy() {
        let mut policy = SidecarPolicy::default();
        policy.annotations.insert(
            SIDECAR_INJECTOR_ANNOTATION_STATUS.to_string(),
            "pending".to_string(),
        );
        let annotations = injected_annotations(&policy);
        assert_eq!(
            annotations.get(SIDECAR_INJECTOR_ANNOTATION_STATUS),
            Some(&"injected".to_string())
        );
    }

    #[test]
    fn test_create_patch_end_to_end() {
        let policy = SidecarPolicy::from_bytes(
            br#"{"containers": [{"name": "proxy", "image": "img:v1"}], "labels": {"app": "x"}}"#,
        )
        .unwrap();
        let pod = pod!(0, labels => vec![("app", "old")]);
        let patch = create_patch(&pod, &policy).unwrap();
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            value,
            json!([
                {"op": "add", "path": "/spec/containers", "value": [{"name": "proxy", "image": "img:v1"}]},
                {"op": "add", "path": "/metadata/annotations", "value": {"sidecar-injector-webhook.io/status": "injected"}},
                {"op": "replace", "path": "/metadata/labels/app", "value": "x"},
            ])
        );
    }

    #[test]
    fn test_create_patch_applies_cleanly() {
        let policy = SidecarPolicy::from_bytes(
            br#"
containers:
  - name: proxy
    image: img:v1
volumes:
  - name: conf
    configMap:
      name: proxy-conf
labels:
  app: x
  team/name: y
annotations:
  example.io/owner: platform
"#,
        )
        .unwrap();
        let pod = pod!(1,
            containers => vec!["app"],
            annotations => vec![("keep", "me")],
            labels => vec![("app", "old")]
        );
        let patch = create_patch(&pod, &policy).unwrap();
        let mut doc = serde_json::to_value(&pod).unwrap();
        json_patch::patch(&mut doc, &patch).expect("Patch does not apply");
        let patched: Pod = serde_json::from_value(doc).unwrap();
        let spec = patched.spec.unwrap();
        let names: Vec<String> = spec.containers.iter().map(|c| c.name.clone()).collect();
        assert_eq!(names, vec!["app", "proxy"]);
        assert_eq!(spec.volumes.unwrap()[0].name, "conf");
        let labels = patched.metadata.labels.unwrap();
        assert_eq!(labels.get("app"), Some(&"x".to_string()));
        assert_eq!(labels.get("team/name"), Some(&"y".to_string()));
        let annotations = patched.metadata.annotations.unwrap();
        assert_eq!(annotations.get("keep"), Some(&"me".to_string()));
        assert_eq!(annotations.get("example.io/owner"), Some(&"platform".to_string()));
        assert_eq!(
            annotations.get(SIDECAR_INJECTOR_ANNOTATION_STATUS),
            Some(&"injected".to_string())
        );
    }

    #[test]
    fn test_create_patch_without_spec() {
        let mut pod = pod!(2);
        pod.spec = None;
        let policy = SidecarPolicy::from_bytes(b"volumes:\n  - name: v\n").unwrap();
        let patch = create_patch(&pod, &policy).unwrap();
        assert_eq!(
            ops(&patch.0),
            vec![
                ("add", "/spec".to_string()),
                ("add", "/spec/volumes".to_string()),
                ("add", "/metadata/annotations".to_string()),
            ]
        );

        let mut doc = serde_json::to_value(&pod).unwrap();
        json_patch::patch(&mut doc, &patch).expect("Patch does not apply");
        assert_eq!(doc["spec"]["volumes"][0]["name"], "v");
        assert_eq!(
            doc["metadata"]["annotations"][SIDECAR_INJECTOR_ANNOTATION_STATUS],
            "injected"
        );
    }

    #[test]
    fn test_create_patch_without_spec_and_no_workloads() {
        let mut pod = pod!(3);
        pod.spec = None;
        let patch = create_patch(&pod, &SidecarPolicy::default()).unwrap();
        assert_eq!(
            ops(&patch.0),
            vec![("add", "/metadata/annotations".to_string())]
        );
    }
}
