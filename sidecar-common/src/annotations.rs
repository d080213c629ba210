use const_format::formatcp;

const DOMAIN_ANNOTATION: &str = "sidecar-injector-webhook.io";

macro_rules! injector_annotate {
    ($annotation:literal) => {{
        formatcp!("{}/{}", DOMAIN_ANNOTATION, $annotation)
    }};
}

pub const SIDECAR_INJECTOR_ANNOTATION_INJECT: &str = injector_annotate!("inject");
pub const SIDECAR_INJECTOR_ANNOTATION_STATUS: &str = injector_annotate!("status");
pub const SIDECAR_INJECTOR_STATUS_INJECTED: &str = "injected";

/// Values of the inject annotation that opt a Pod out of injection.
pub const SIDECAR_INJECTOR_OPT_OUT_VALUES: [&str; 4] = ["n", "not", "false", "off"];

pub const SIDECAR_INJECTION_NAMESPACE_LABEL: &str = "sidecar-injection";
pub const SIDECAR_INJECTION_NAMESPACE_LABEL_VALUE: &str = "enabled";
