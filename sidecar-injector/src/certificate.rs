use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyUsagePurpose, PKCS_ECDSA_P256_SHA256,
};
use rustls::{PrivateKey, ServerConfig};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sidecar_common::errors::SidecarServiceError;
use sidecar_macros::logger;
use std::io::BufReader;
use time::{Duration, OffsetDateTime};

logger!("CertificateIssuer");

const CERTIFICATE_VALIDITY_DAYS: i64 = 365;

/// In memory CA and serving certificate. Created once per process, a restart
/// rotates it.
#[derive(Clone)]
pub struct CertificateBundle {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("ca_pem", &self.ca_pem)
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

/// DNS names the control plane can use to reach `service` in `namespace`.
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{}.{}", service, namespace),
        format!("{}.{}.svc", service, namespace),
    ]
}

fn distinguished_name(organization: &str, common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, organization);
    dn.push(DnType::CommonName, common_name);
    dn
}

fn validity(params: &mut CertificateParams) {
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::hours(1);
    params.not_after = now + Duration::days(CERTIFICATE_VALIDITY_DAYS);
}

pub fn generate_certificate(
    organization: &str,
    dns_names: &[String],
    common_name: &str,
) -> Result<CertificateBundle, SidecarServiceError> {
    let mut ca_params = CertificateParams::default();
    ca_params.alg = &PKCS_ECDSA_P256_SHA256;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.distinguished_name =
        distinguished_name(organization, &format!("{} CA", organization));
    ca_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
    ];
    validity(&mut ca_params);
    let ca = Certificate::from_params(ca_params)
        .map_err(SidecarServiceError::from_error("Unable to generate CA"))?;
    let ca_pem = ca
        .serialize_pem()
        .map_err(SidecarServiceError::from_error("Unable to serialize CA"))?;

    let mut params = CertificateParams::new(dns_names.to_vec());
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.distinguished_name = distinguished_name(organization, common_name);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    validity(&mut params);
    let cert = Certificate::from_params(params)
        .map_err(SidecarServiceError::from_error("Unable to generate server certificate"))?;
    let cert_pem = cert
        .serialize_pem_with_signer(&ca)
        .map_err(SidecarServiceError::from_error("Unable to sign server certificate"))?;
    let key_pem = cert.serialize_private_key_pem();

    info!(
        "Generated CA and server certificate for {} [{}]",
        common_name,
        dns_names.join(", ")
    );
    Ok(CertificateBundle {
        ca_pem,
        cert_pem,
        key_pem,
    })
}

impl CertificateBundle {
    pub fn server_config(&self) -> Result<ServerConfig, SidecarServiceError> {
        let mut cert_reader = BufReader::new(self.cert_pem.as_bytes());
        let mut key_reader = BufReader::new(self.key_pem.as_bytes());

        let raw_certs = certs(&mut cert_reader)
            .map_err(|e| format!("Unable to load certificates: {}", e))?;
        let certs: Vec<rustls::Certificate> =
            raw_certs.into_iter().map(rustls::Certificate).collect();
        let key = pkcs8_private_keys(&mut key_reader)
            .map_err(|e| format!("Unable to load keys: {}", e))?
            .into_iter()
            .map(PrivateKey)
            .next()
            .ok_or("No private key found in certificate bundle")?;

        Ok(ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| format!("Unable to create ServerConfig with TLS certificate: {}", e))?)
    }
}
