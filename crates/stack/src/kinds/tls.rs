//! TLS lookups.

use serde::Serialize;
use tic_graph::Value;

/// Certificate chain served at a URL; used for the OIDC issuer thumbprint.
#[derive(Debug, Clone, Serialize)]
pub struct GetCertificate {
    pub url: Value,
}

impl_kind!(GetCertificate => "tls:index:getCertificate",
    outputs: ["url", "sha1_fingerprint"],
    role: Data,
);
