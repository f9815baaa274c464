//! Content-type negotiated body encoding.
//!
//! ACME v1 exchanges three media types: JSON resources, problem documents
//! (which serialize like JSON under their own content type) and raw DER
//! certificates. Anything else is rejected with
//! [`Error::UnhandledContentType`].

use base64::prelude::{BASE64_URL_SAFE_NO_PAD, Engine};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::types::Error;

/// A recognized ACME content type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
    /// `application/json`
    Json,
    /// `application/problem+json`
    ProblemJson,
    /// `application/pkix-cert`
    PkixCert,
}

impl MediaType {
    /// The wire form of the content type.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::ProblemJson => "application/problem+json",
            MediaType::PkixCert => "application/pkix-cert",
        }
    }

    /// Parse a `Content-Type`/`Accept` value. Unknown types are an error.
    pub fn parse(s: &str) -> Result<MediaType, Error> {
        match s {
            "application/json" => Ok(MediaType::Json),
            "application/problem+json" => Ok(MediaType::ProblemJson),
            "application/pkix-cert" => Ok(MediaType::PkixCert),
            _ => Err(Error::UnhandledContentType(s.to_owned())),
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a JSON-representable resource under the given media type.
pub(crate) fn encode_json<T: Serialize>(media: MediaType, value: &T) -> Result<Vec<u8>, Error> {
    match media {
        MediaType::Json | MediaType::ProblemJson => Ok(serde_json::to_vec(value)?),
        MediaType::PkixCert => Err(Error::UnhandledContentType(media.as_str().to_owned())),
    }
}

/// Decode a JSON-representable resource under the given media type.
pub(crate) fn decode_json<T: DeserializeOwned>(media: MediaType, body: &[u8]) -> Result<T, Error> {
    match media {
        MediaType::Json | MediaType::ProblemJson => Ok(serde_json::from_slice(body)?),
        MediaType::PkixCert => Err(Error::UnhandledContentType(media.as_str().to_owned())),
    }
}

/// Encode a DER blob. Only `application/pkix-cert` carries raw bytes.
pub(crate) fn encode_der(media: MediaType, der: &[u8]) -> Result<Vec<u8>, Error> {
    match media {
        MediaType::PkixCert => Ok(der.to_vec()),
        _ => Err(Error::UnhandledContentType(media.as_str().to_owned())),
    }
}

/// Decode a DER blob. Byte-identical to the body.
pub(crate) fn decode_der(media: MediaType, body: &[u8]) -> Result<Vec<u8>, Error> {
    match media {
        MediaType::PkixCert => Ok(body.to_vec()),
        _ => Err(Error::UnhandledContentType(media.as_str().to_owned())),
    }
}

/// A response body paired with the encoding it supports, used by the
/// server dispatcher where the body shape is decided per endpoint.
#[derive(Clone, Debug)]
pub(crate) enum Payload {
    Json(serde_json::Value),
    Der(Vec<u8>),
}

impl Payload {
    pub(crate) fn json<T: Serialize>(value: &T) -> Result<Payload, Error> {
        Ok(Payload::Json(serde_json::to_value(value)?))
    }

    pub(crate) fn encode(&self, media: MediaType) -> Result<Vec<u8>, Error> {
        match self {
            Payload::Json(value) => encode_json(media, value),
            Payload::Der(der) => encode_der(media, der),
        }
    }
}

/// Base64url without padding, as used for JWS segments and DER blobs.
pub(crate) fn base64url(data: &[u8]) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(data)
}

/// Base64url decode accepting input with or without `=` padding.
pub(crate) fn base64url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))
}
