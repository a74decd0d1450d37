//! Request plumbing shared by the HTTP services: bearer auth and lenient JSON
//! bodies that report the first missing field.
use actix_web::{
    FromRequest,
    HttpRequest,
    HttpResponse,
    dev::Payload,
    error::{
        ErrorForbidden,
        ErrorInternalServerError,
        ErrorUnauthorized,
    },
    http::header::AUTHORIZATION,
    web,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::{
    Digest,
    Sha256,
};
use std::future::{
    Ready,
    ready,
};

/// Shared secret every caller must present as `Authorization: Bearer <key>`.
/// Only its digest is kept.
#[derive(Clone)]
pub struct ApiKey([u8; 32]);

impl ApiKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(digest(key.as_ref()))
    }

    /// Compares digests in full so timing does not depend on the matching prefix.
    pub fn matches(&self, token: &str) -> bool {
        digest(token)
            .iter()
            .zip(self.0.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }
}

fn digest(value: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().into()
}

/// Extractor that rejects the request unless it carries the service's key.
/// List it first among handler arguments so auth fails before body parsing.
pub struct Authorized;

impl FromRequest for Authorized {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(check_bearer(req))
    }
}

fn check_bearer(req: &HttpRequest) -> actix_web::Result<Authorized> {
    let key = req
        .app_data::<web::Data<ApiKey>>()
        .ok_or_else(|| ErrorInternalServerError("api key not configured"))?;
    let provided = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ErrorUnauthorized("missing bearer token"))?;
    match provided.strip_prefix("Bearer ") {
        Some(token) if key.matches(token) => Ok(Authorized),
        Some(_) => Err(ErrorForbidden("invalid bearer token")),
        None => Err(ErrorUnauthorized("missing bearer token")),
    }
}

/// A JSON object body. Anything unparsable is treated as `{}`.
pub struct LenientBody(Value);

impl LenientBody {
    pub fn parse(bytes: &[u8]) -> Self {
        let value = serde_json::from_slice::<Value>(bytes)
            .ok()
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Default::default()));
        Self(value)
    }

    /// Reads `name`, answering 400 naming the field when absent, null or of
    /// the wrong shape.
    pub fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T, HttpResponse> {
        match self.0.get(name) {
            None | Some(Value::Null) => Err(bad_request(format!("{name} is required"))),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| bad_request(format!("{name} is malformed: {e}"))),
        }
    }

    /// Like [`Self::required`] for identifiers: blank strings are rejected too.
    pub fn required_id(&self, name: &str) -> Result<String, HttpResponse> {
        let id: String = self.required(name)?;
        if id.trim().is_empty() {
            return Err(bad_request(format!("{name} is required")));
        }
        Ok(id)
    }

    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HttpResponse> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(_) => self.required(name).map(Some),
        }
    }
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    HttpResponse::BadRequest().body(message.into())
}

/// Lenient integer query parameter: garbage and zero fall back to `default`.
pub fn parse_int_or(raw: Option<&String>, default: i64) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| *value != 0)
        .unwrap_or(default)
}
