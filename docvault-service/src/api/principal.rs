//! Principal extraction from authentication-provider headers.
//!
//! The service sits behind an authenticating proxy that resolves the caller
//! and forwards their identity, department and role as request headers.

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};

use crate::access::{Principal, Role};
use crate::error::ErrorResponse;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_DEPARTMENT_HEADER: &str = "x-principal-department";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

/// Why a request carried no usable principal
#[derive(Debug, thiserror::Error)]
pub enum PrincipalRejection {
    #[error("Missing x-principal-id header")]
    Missing,

    #[error("Invalid {header} header")]
    Invalid { header: &'static str },
}

impl IntoResponse for PrincipalRejection {
    fn into_response(self) -> Response {
        let (status, code) = match self {
            PrincipalRejection::Missing => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            PrincipalRejection::Invalid { .. } => (StatusCode::BAD_REQUEST, "invalid_principal"),
        };
        let body = ErrorResponse {
            message: self.to_string(),
            code: Some(code.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

fn header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, PrincipalRejection> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()).filter(|v| !v.is_empty()))
            .map_err(|_| PrincipalRejection::Invalid { header: name }),
    }
}

pub(crate) fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, PrincipalRejection> {
    let id = header(headers, PRINCIPAL_ID_HEADER)?.ok_or(PrincipalRejection::Missing)?;
    let department = header(headers, PRINCIPAL_DEPARTMENT_HEADER)?;
    let role = match header(headers, PRINCIPAL_ROLE_HEADER)? {
        Some(role) => role
            .parse::<Role>()
            .map_err(|_| PrincipalRejection::Invalid {
                header: PRINCIPAL_ROLE_HEADER,
            })?,
        None => Role::default(),
    };

    Ok(Principal::new(id, department, role))
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = PrincipalRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers)
    }
}
