//! Checks for selecting a client certificate.

use log::{debug, trace};
use openssl::x509::{X509, X509Name};
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};

/// Returns whether the certificate was issued by one of the given names.
///
/// An empty list accepts any issuer. Names are compared by their DER
/// encoding.
pub fn issuer_matches(issuers: &[X509Name], cert: &X509) -> bool {
    if issuers.is_empty() {
        return true;
    }
    let Ok(issuer) = cert.issuer_name().to_der() else {
        return false;
    };
    issuers
        .iter()
        .any(|name| name.to_der().is_ok_and(|der| der == issuer))
}

/// Returns whether the certificate may be used for TLS client auth.
///
/// If the certificate restricts its extended key usage, the usage must
/// include client authentication. If it restricts its key usage, the
/// usage must allow digital signatures or key agreement. Certificates
/// that can't be parsed are never permitted.
pub fn permits_client_auth(cert: &X509) -> bool {
    let der = match cert.to_der() {
        Ok(der) => der,
        Err(err) => {
            debug!("PKCS#11: cannot encode certificate: {}", err);
            return false;
        }
    };
    let cert = match X509Certificate::from_der(&der) {
        Ok((_, cert)) => cert,
        Err(err) => {
            debug!("PKCS#11: cannot parse certificate: {}", err);
            return false;
        }
    };

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::ExtendedKeyUsage(eku) => {
                if !(eku.client_auth || eku.any) {
                    trace!("PKCS#11: extended key usage excludes client auth");
                    return false;
                }
            }
            ParsedExtension::KeyUsage(ku) => {
                if !(ku.digital_signature() || ku.key_agreement()) {
                    trace!("PKCS#11: key usage excludes client auth");
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}


//============ Tests =========================================================
