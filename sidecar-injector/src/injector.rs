use crate::errors::InjectorPatchError;
use crate::patch::create_patch;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, StatusCode};
use hyper::{Body, Request, Response};
use k8s_openapi::api::core::v1::Pod;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::{GroupVersionKind, TypeMeta};
use serde::Deserialize;
use sidecar_common::annotations::{
    SIDECAR_INJECTOR_ANNOTATION_INJECT, SIDECAR_INJECTOR_ANNOTATION_STATUS,
    SIDECAR_INJECTOR_OPT_OUT_VALUES, SIDECAR_INJECTOR_STATUS_INJECTED,
};
use sidecar_common::constants::IGNORED_NAMESPACES;
use sidecar_common::errors::SidecarServiceError;
use sidecar_common::policy::SidecarPolicy;
use sidecar_common::traits::{Annotated, MaybeNamespaced, Named, ObjectRequest};
use sidecar_macros::logger;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

logger!("SidecarInjector");

const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
const JSON_CONTENT_TYPE: &str = "application/json";
const HEALTH_PATH: &str = "/healthz";

/// Admission review API versions this service understands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReviewVersion {
    V1,
    V1Beta1,
}

impl ReviewVersion {
    pub fn api_version(&self) -> &'static str {
        match self {
            ReviewVersion::V1 => "admission.k8s.io/v1",
            ReviewVersion::V1Beta1 => "admission.k8s.io/v1beta1",
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version().to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
        }
    }

    /// Denied response in this version's envelope. Used when the request
    /// cannot be decoded into a typed object but its UID is known.
    pub fn error_response(&self, uid: &str) -> AdmissionResponse {
        let mut response = AdmissionResponse::invalid("");
        response.types = self.type_meta();
        response.uid = uid.to_string();
        response
    }
}

#[derive(Deserialize)]
struct ReviewHeader {
    #[serde(flatten)]
    types: TypeMeta,
    request: Option<RequestHeader>,
}

#[derive(Deserialize)]
struct RequestHeader {
    #[serde(default)]
    uid: String,
    kind: GroupVersionKind,
}

#[derive(Debug)]
pub enum ReviewObject {
    Pod(AdmissionRequest<Pod>),
    Other(AdmissionRequest<DynamicObject>),
}

fn admission_request<T>(body: &[u8]) -> Result<AdmissionRequest<T>, SidecarServiceError>
where
    T: kube::Resource + serde::de::DeserializeOwned,
{
    let admission_review: AdmissionReview<T> = serde_json::from_slice(body)
        .map_err(SidecarServiceError::from_error("Unable to parse AdmissionReview"))?;
    admission_review
        .try_into()
        .map_err(SidecarServiceError::from_error("Unable to parse AdmissionRequest"))
}

/// Decodes admission reviews. Built once at startup and shared by every request.
#[derive(Debug, Clone)]
pub struct ReviewDecoder {
    versions: Vec<ReviewVersion>,
}

impl Default for ReviewDecoder {
    fn default() -> Self {
        ReviewDecoder {
            versions: vec![ReviewVersion::V1, ReviewVersion::V1Beta1],
        }
    }
}

impl ReviewDecoder {
    pub fn new(versions: Vec<ReviewVersion>) -> Self {
        ReviewDecoder { versions }
    }

    pub fn decode(&self, body: &[u8]) -> Result<(ReviewVersion, ReviewObject), InjectorPatchError> {
        let header: ReviewHeader = serde_json::from_slice(body)
            .map_err(SidecarServiceError::from_error("Unable to parse AdmissionReview"))?;
        if header.types.kind != ADMISSION_REVIEW_KIND {
            return Err(SidecarServiceError::from_string(format!(
                "Unexpected kind {}, expected {}",
                header.types.kind, ADMISSION_REVIEW_KIND
            ))
            .into());
        }
        let version = self
            .versions
            .iter()
            .find(|v| v.api_version() == header.types.api_version)
            .copied()
            .ok_or_else(|| {
                SidecarServiceError::from_string(format!(
                    "Unsupported AdmissionReview version: {}",
                    header.types.api_version
                ))
            })?;
        let request = header.request.ok_or_else(|| {
            InjectorPatchError::WithResponse(
                Box::new(version.error_response("")),
                SidecarServiceError::from("Not found request in admission review"),
            )
        })?;
        let error_response = version.error_response(&request.uid);
        let object = if request.kind.group.is_empty() && request.kind.kind == "Pod" {
            admission_request::<Pod>(body).map(ReviewObject::Pod)
        } else {
            admission_request::<DynamicObject>(body).map(ReviewObject::Other)
        };
        object
            .map(|object| (version, object))
            .map_err(InjectorPatchError::from_admission_response(&error_response))
    }
}

/// Decides if a Pod needs injection: it must live outside the ignored
/// namespaces, must not opt out with the inject annotation and must not be
/// injected already.
pub fn mutation_required<R>(ignored_namespaces: &[&str], request: &R) -> bool
where
    R: MaybeNamespaced + Named + Annotated,
{
    let namespace = request.namespace().unwrap_or_default();
    let name = request.name();
    if ignored_namespaces.contains(&namespace.as_str()) {
        info!(
            "Skip mutation for {} for it's in special namespace: {}",
            name, namespace
        );
        return false;
    }

    let status = request
        .annotation(SIDECAR_INJECTOR_ANNOTATION_STATUS)
        .map(|s| s.to_lowercase())
        .unwrap_or_default();
    let required = if status == SIDECAR_INJECTOR_STATUS_INJECTED {
        false
    } else {
        request
            .annotation(SIDECAR_INJECTOR_ANNOTATION_INJECT)
            .map(|v| !SIDECAR_INJECTOR_OPT_OUT_VALUES.contains(&v.to_lowercase().as_str()))
            .unwrap_or(true)
    };
    info!(
        "Mutation policy for {}/{}: status: {:?} required: {}",
        namespace, name, status, required
    );
    required
}

fn patch_pod(
    admission_request: AdmissionRequest<Pod>,
    policy: &SidecarPolicy,
) -> Result<AdmissionResponse, InjectorPatchError> {
    let admission_response = AdmissionResponse::from(&admission_request);
    let pod = match admission_request.object() {
        Some(pod) => pod,
        None => {
            info!(
                "No Pod found in {:?} request {}, allowing it",
                admission_request.operation, admission_request.uid
            );
            return Ok(admission_response);
        }
    };
    info!(
        "AdmissionReview for Kind={:?}, Namespace={:?} Name={} UID={} Operation={:?} UserInfo={:?}",
        admission_request.kind,
        admission_request.namespace(),
        Named::name(&admission_request),
        admission_request.uid,
        admission_request.operation,
        admission_request.user_info.username
    );

    if !mutation_required(&IGNORED_NAMESPACES, &admission_request) {
        info!(
            "Skipping mutation for {}/{} due to policy check",
            admission_request.namespace().unwrap_or_default(),
            Named::name(&admission_request)
        );
        return Ok(admission_response);
    }

    let patch = create_patch(pod, policy)
        .map_err(InjectorPatchError::from_admission_response(&admission_response))?;
    debug!(
        "AdmissionResponse: patch={}",
        serde_json::to_string(&patch).unwrap_or_default()
    );
    admission_response
        .clone()
        .with_patch(patch)
        .map_err(SidecarServiceError::from_error("Error serializing JSONPatch"))
        .map_err(InjectorPatchError::from_admission_response(&admission_response))
}

pub struct SidecarInjectorContext {
    pub(crate) policy: Arc<SidecarPolicy>,
    pub(crate) decoder: ReviewDecoder,
    pub(crate) inject_path: String,
    pub(crate) request_timeout: Duration,
}

impl SidecarInjectorContext {
    pub fn new(policy: SidecarPolicy, inject_path: String, request_timeout: Duration) -> Self {
        SidecarInjectorContext {
            policy: Arc::new(policy),
            decoder: ReviewDecoder::default(),
            inject_path,
            request_timeout,
        }
    }

    pub fn mutate(&self, body: &[u8]) -> Result<AdmissionResponse, InjectorPatchError> {
        match self.decoder.decode(body)? {
            (_, ReviewObject::Pod(admission_request)) => patch_pod(admission_request, &self.policy),
            (version, ReviewObject::Other(admission_request)) => {
                info!(
                    "Ignoring {:?} in {} review, only Pods are mutated",
                    admission_request.kind,
                    version.api_version()
                );
                Ok(AdmissionResponse::from(&admission_request))
            }
        }
    }
}

fn text_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}

fn admission_response(response: AdmissionResponse) -> Response<Body> {
    match serde_json::to_vec(&response.into_review()) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            response
        }
        Err(e) => {
            warn!("Can't encode response: {}", e);
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("could not encode response: {}", e),
            )
        }
    }
}

async fn inject(
    req: Request<Body>,
    sidecar_context: Arc<SidecarInjectorContext>,
) -> Result<Response<Body>, hyper::Error> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let body = hyper::body::to_bytes(req.into_body()).await?;
    if body.is_empty() {
        warn!("empty body");
        return Ok(text_response(StatusCode::BAD_REQUEST, "empty body"));
    }
    if content_type.as_deref() != Some(JSON_CONTENT_TYPE) {
        warn!("Content-Type={:?}, expect application/json", content_type);
        return Ok(text_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        ));
    }

    let response = match sidecar_context.mutate(&body) {
        Ok(response) => {
            info!(
                "Resource allowed with {} bytes of patch",
                response.patch.as_ref().map(|xs| xs.len()).unwrap_or(0)
            );
            response
        }
        Err(e) => {
            warn!("Admission failed: {}", e);
            e.into_admission_response()
        }
    };
    Ok(admission_response(response))
}

pub async fn injector_handler(
    req: Request<Body>,
    sidecar_context: Arc<SidecarInjectorContext>,
) -> Result<Response<Body>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, path) if path == sidecar_context.inject_path => {
            inject(req, sidecar_context).await
        }
        (&Method::GET, HEALTH_PATH) => Ok(text_response(StatusCode::OK, "ok")),
        _ => Ok(text_response(StatusCode::NOT_FOUND, "")),
    }
}

/// `injector_handler` bounded by the per request deadline.
pub async fn deadline_handler(
    req: Request<Body>,
    sidecar_context: Arc<SidecarInjectorContext>,
) -> Result<Response<Body>, hyper::Error> {
    let deadline = sidecar_context.request_timeout;
    match timeout(deadline, injector_handler(req, sidecar_context)).await {
        Ok(response) => response,
        Err(_) => {
            warn!("Request exceeded the deadline of {:?}", deadline);
            Ok(text_response(
                StatusCode::REQUEST_TIMEOUT,
                "admission request timed out",
            ))
        }
    }
}
