use crate::injector::ReviewVersion;
use kube::core::admission::AdmissionResponse;
use sidecar_common::errors::SidecarServiceError;
use std::fmt::Display;

/// Failure while turning an admission review into a decision.
/// `WithResponse` is used once the request UID is known, so the error can be
/// reported on a response the control plane can correlate.
#[derive(Debug)]
pub enum InjectorPatchError {
    WithResponse(Box<AdmissionResponse>, SidecarServiceError),
    WithoutResponse(SidecarServiceError),
}

impl InjectorPatchError {
    pub fn from_admission_response(
        response: &AdmissionResponse,
    ) -> impl FnOnce(SidecarServiceError) -> Self + '_ {
        move |e: SidecarServiceError| {
            InjectorPatchError::WithResponse(Box::new(response.clone()), e)
        }
    }

    /// Admission response carrying this error, `allowed` is always false.
    /// Without a decoded request the envelope falls back to v1.
    pub fn into_admission_response(self) -> AdmissionResponse {
        match self {
            InjectorPatchError::WithResponse(response, e) => (*response).deny(e.error),
            InjectorPatchError::WithoutResponse(e) => {
                let mut response = AdmissionResponse::invalid(e.error);
                response.types = ReviewVersion::V1.type_meta();
                response
            }
        }
    }
}

impl Display for InjectorPatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectorPatchError::WithResponse(response, e) => {
                write!(f, "{} (request {})", e, response.uid)
            }
            InjectorPatchError::WithoutResponse(e) => write!(f, "{}", e),
        }
    }
}

impl From<SidecarServiceError> for InjectorPatchError {
    fn from(e: SidecarServiceError) -> Self {
        InjectorPatchError::WithoutResponse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::InjectorPatchError;
    use k8s_openapi::api::core::v1::Pod;
    use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
    use serde_json::json;
    use sidecar_common::errors::SidecarServiceError;
    use sidecar_test_macros::admission_review;

    const UID: &str = "8a3f2c1e-0d4b-4b6e-9c1a-5e7f3a2b1c0d";

    fn request(api_version: &str) -> AdmissionRequest<Pod> {
        let object = json!({"metadata": {"name": "pod0", "namespace": "ns0"}});
        let review: AdmissionReview<Pod> =
            serde_json::from_value(admission_review!(api_version, UID, "ns0", object))
                .expect("Unable to parse review");
        review.try_into().expect("Unable to get request")
    }

    #[test]
    fn test_patch_failure_is_denied_with_uid() {
        let request = request("admission.k8s.io/v1");
        let error = InjectorPatchError::from_admission_response(&AdmissionResponse::from(&request))(
            SidecarServiceError::from("Error serializing JSONPatch"),
        );
        let response = error.into_admission_response();
        assert!(!response.allowed);
        assert_eq!(response.uid, UID);
        assert!(response.patch.is_none());

        let review = serde_json::to_value(response.into_review()).unwrap();
        assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(review["response"]["uid"], UID);
        assert_eq!(review["response"]["allowed"], false);
        assert_eq!(
            review["response"]["status"]["message"],
            "Error serializing JSONPatch"
        );
    }

    #[test]
    fn test_patch_failure_keeps_request_version() {
        let request = request("admission.k8s.io/v1beta1");
        let error = InjectorPatchError::WithResponse(
            Box::new(AdmissionResponse::from(&request)),
            SidecarServiceError::from("boom"),
        );
        let review = serde_json::to_value(error.into_admission_response().into_review()).unwrap();
        assert_eq!(review["apiVersion"], "admission.k8s.io/v1beta1");
        assert_eq!(review["response"]["uid"], UID);
    }

    #[test]
    fn test_undecodable_request_uses_v1_envelope() {
        let error = InjectorPatchError::from(SidecarServiceError::from("Unable to parse"));
        let response = error.into_admission_response();
        assert!(!response.allowed);
        assert_eq!(response.uid, "");
        let review = serde_json::to_value(response.into_review()).unwrap();
        assert_eq!(review["apiVersion"], "admission.k8s.io/v1");
        assert_eq!(review["kind"], "AdmissionReview");
        assert_eq!(review["response"]["status"]["message"], "Unable to parse");
    }
}
