//! One typed function per ACME protocol operation.
//!
//! Each validates the resource tag (and the absence of server-only
//! fields) before transmitting, and decodes the response body according
//! to its `Content-Type`. Higher-level status handling belongs to
//! [`ClientAccount`](crate::ClientAccount).

use bytes::Bytes;
use http::{Response, header};
use serde::de::DeserializeOwned;

use crate::challenge::{Challenge, ChallengeResponse};
use crate::codec::{self, MediaType};
use crate::transport::Transport;
use crate::types::{
    Authorization, AuthorizationUris, CertificateIssuance, CertificateRevocation, CertificateUris,
    Directory, Error, Recovery, Registration, ResourceType,
};

/// Look up the directory at the given location.
pub async fn get_directory(
    transport: &Transport,
    uri: &str,
) -> Result<(Directory, Response<Bytes>), Error> {
    let rsp = transport.get(uri, MediaType::Json.as_str()).await?;
    let dir = decode_json_response(&rsp)?;
    Ok((dir, rsp))
}

/// Fetch the authorization URI index advertised by a registration.
pub async fn get_authorization_uris(
    transport: &Transport,
    uri: &str,
) -> Result<(AuthorizationUris, Response<Bytes>), Error> {
    let rsp = transport.get(uri, MediaType::Json.as_str()).await?;
    let uris = decode_json_response(&rsp)?;
    Ok((uris, rsp))
}

/// Fetch the certificate URI index advertised by a registration.
pub async fn get_certificate_uris(
    transport: &Transport,
    uri: &str,
) -> Result<(CertificateUris, Response<Bytes>), Error> {
    let rsp = transport.get(uri, MediaType::Json.as_str()).await?;
    let uris = decode_json_response(&rsp)?;
    Ok((uris, rsp))
}

/// Send a new-reg or reg request.
pub async fn post_registration(
    transport: &Transport,
    uri: &str,
    req: &Registration,
) -> Result<(Registration, Response<Bytes>), Error> {
    if req.resource != ResourceType::NewReg && req.resource != ResourceType::Reg {
        return Err(Error::InvalidResource {
            kind: "registration",
            resource: req.resource,
        });
    }
    if req.key.is_some() {
        return Err(Error::FieldNotAllowed("key"));
    }
    if req.authorizations_uri.is_some() {
        return Err(Error::FieldNotAllowed("authorizations URI"));
    }
    if req.certificates_uri.is_some() {
        return Err(Error::FieldNotAllowed("certificates URI"));
    }

    let rsp = transport
        .post(uri, MediaType::Json.as_str(), Some(req))
        .await?;
    let reg = decode_json_response(&rsp)?;
    Ok((reg, rsp))
}

/// Send a recover-reg request.
pub async fn post_account_recovery(
    transport: &Transport,
    uri: &str,
    req: &Recovery,
) -> Result<(Registration, Response<Bytes>), Error> {
    if req.resource != ResourceType::RecoverReg {
        return Err(Error::InvalidResource {
            kind: "account recovery",
            resource: req.resource,
        });
    }

    let rsp = transport
        .post(uri, MediaType::Json.as_str(), Some(req))
        .await?;
    let reg = decode_json_response(&rsp)?;
    Ok((reg, rsp))
}

/// Send a new-authz or authz request.
pub async fn post_authorization(
    transport: &Transport,
    uri: &str,
    req: &Authorization,
) -> Result<(Authorization, Response<Bytes>), Error> {
    if req.resource != ResourceType::NewAuthz && req.resource != ResourceType::Authz {
        return Err(Error::InvalidResource {
            kind: "authorization",
            resource: req.resource,
        });
    }
    if req.status.is_some() {
        return Err(Error::FieldNotAllowed("status"));
    }
    if req.expires.is_some() {
        return Err(Error::FieldNotAllowed("expires"));
    }
    if !req.challenges.is_empty() {
        return Err(Error::FieldNotAllowed("challenges"));
    }
    if !req.combinations.is_empty() {
        return Err(Error::FieldNotAllowed("combinations"));
    }

    let rsp = transport
        .post(uri, MediaType::Json.as_str(), Some(req))
        .await?;
    let authz = decode_json_response(&rsp)?;
    Ok((authz, rsp))
}

/// Request information about an authz resource.
pub async fn get_authorization(
    transport: &Transport,
    uri: &str,
) -> Result<(Authorization, Response<Bytes>), Error> {
    let rsp = transport.get(uri, MediaType::Json.as_str()).await?;
    let authz = decode_json_response(&rsp)?;
    Ok((authz, rsp))
}

/// Send a response to a challenge.
pub async fn post_response(
    transport: &Transport,
    uri: &str,
    req: &ChallengeResponse,
) -> Result<(Challenge, Response<Bytes>), Error> {
    match req.resource() {
        Some(ResourceType::Challenge) => {}
        Some(resource) => {
            return Err(Error::InvalidResource {
                kind: "response",
                resource,
            });
        }
        None => return Err(Error::Str("response carries no resource tag")),
    }

    let rsp = transport
        .post(uri, MediaType::Json.as_str(), Some(req))
        .await?;
    let challenge = decode_json_response(&rsp)?;
    Ok((challenge, rsp))
}

/// Send a new-cert request. The response body, when non-empty, is the
/// issued certificate in DER.
pub async fn post_certificate_issuance(
    transport: &Transport,
    uri: &str,
    req: &CertificateIssuance,
) -> Result<(Vec<u8>, Response<Bytes>), Error> {
    if req.resource != ResourceType::NewCert {
        return Err(Error::InvalidResource {
            kind: "certificate issuance",
            resource: req.resource,
        });
    }

    let rsp = transport
        .post(uri, MediaType::PkixCert.as_str(), Some(req))
        .await?;
    let der = decode_der_response(&rsp)?;
    Ok((der, rsp))
}

/// Request an existing cert resource.
pub async fn get_certificate(
    transport: &Transport,
    uri: &str,
) -> Result<(Vec<u8>, Response<Bytes>), Error> {
    let rsp = transport.get(uri, MediaType::PkixCert.as_str()).await?;
    let der = decode_der_response(&rsp)?;
    Ok((der, rsp))
}

/// Send a revoke-cert request.
pub async fn post_certificate_revocation(
    transport: &Transport,
    uri: &str,
    req: &CertificateRevocation,
) -> Result<Response<Bytes>, Error> {
    if req.resource != ResourceType::RevokeCert {
        return Err(Error::InvalidResource {
            kind: "certificate revocation",
            resource: req.resource,
        });
    }

    transport.post(uri, "*/*", Some(req)).await
}

fn response_media(rsp: &Response<Bytes>) -> Result<MediaType, Error> {
    let content_type = rsp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    MediaType::parse(content_type)
}

fn decode_json_response<T: DeserializeOwned>(rsp: &Response<Bytes>) -> Result<T, Error> {
    codec::decode_json(response_media(rsp)?, rsp.body())
}

fn decode_der_response(rsp: &Response<Bytes>) -> Result<Vec<u8>, Error> {
    // Pending (202) polls come back empty, possibly with no content type.
    if rsp.body().is_empty() {
        return Ok(Vec::new());
    }
    codec::decode_der(response_media(rsp)?, rsp.body())
}
