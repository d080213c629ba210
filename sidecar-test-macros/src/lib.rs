/// Sets a field on a test Pod. Callers need `Container`, `Volume` and `BTreeMap` in scope.
#[macro_export]
macro_rules! set_pod_field {
    ($pod:expr, containers => $cs:expr) => {
        let test_cs: Vec<Container> = $cs
            .iter()
            .map(|x| {
                let mut c: Container = Default::default();
                c.name = x.to_string();
                c
            })
            .collect();
        if let Some(spec) = $pod.spec.as_mut() {
            spec.containers = test_cs;
        }
    };
    ($pod:expr, volumes => $vs:expr) => {
        let volumes: Vec<Volume> = $vs
            .iter()
            .map(|x| {
                let mut v: Volume = Default::default();
                v.name = x.to_string();
                v
            })
            .collect();
        if volumes.len() > 0 {
            if let Some(spec) = $pod.spec.as_mut() {
                spec.volumes = Some(volumes);
            }
        }
    };
    ($pod:expr, annotations => $cs:expr) => {
        let mut bm = BTreeMap::new();
        for (k, v) in $cs {
            bm.insert(k.to_string(), v.to_string());
        }
        $pod.metadata.annotations = Some(bm);
    };
    ($pod:expr, labels => $cs:expr) => {
        let mut bm = BTreeMap::new();
        for (k, v) in $cs {
            bm.insert(k.to_string(), v.to_string());
        }
        $pod.metadata.labels = Some(bm);
    };
    ($pod:expr, namespace => $ns:expr) => {
        $pod.metadata.namespace = Some($ns.to_string());
    };
}

/// Builds a Pod named `pod<n>` in namespace `ns<n>`, optionally setting extra fields.
///
/// ```ignore
/// let pod = pod!(1, containers => vec!["app"], labels => vec![("app", "old")]);
/// ```
#[macro_export]
macro_rules! pod {
    ($n:tt) => {{
        let mut pod: Pod = Default::default();
        pod.metadata.name = Some(format!("pod{}", $n));
        pod.metadata.namespace = Some(format!("ns{}", $n));
        pod.spec = Some(Default::default());
        pod
    }};
    ($n:tt, $($fs:ident => $es:expr),*) => {{
        let mut pod = $crate::pod!($n);
        $(
            $crate::set_pod_field!(pod, $fs => $es);
        )*
        pod
    }};
}

/// Wraps a JSON object in an admission review request envelope.
#[macro_export]
macro_rules! admission_review {
    ($api_version:expr, $uid:expr, $namespace:expr, $object:expr) => {
        json!({
            "apiVersion": $api_version,
            "kind": "AdmissionReview",
            "request": {
                "uid": $uid,
                "kind": {"group": "", "version": "v1", "kind": "Pod"},
                "resource": {"group": "", "version": "v1", "resource": "pods"},
                "requestKind": {"group": "", "version": "v1", "kind": "Pod"},
                "requestResource": {"group": "", "version": "v1", "resource": "pods"},
                "namespace": $namespace,
                "operation": "CREATE",
                "userInfo": {
                    "username": "admin",
                    "uid": "014fbff9a07c",
                    "groups": ["system:authenticated"]
                },
                "object": $object
            }
        })
    };
    ($uid:expr, $namespace:expr, $object:expr) => {
        $crate::admission_review!("admission.k8s.io/v1", $uid, $namespace, $object)
    };
}
