use std::borrow::Cow;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::Json;

use crate::error::Error;

pub(crate) trait ApiResponse: erased_serde::Serialize {}
erased_serde::serialize_trait_object!(ApiResponse);

/// Every endpoint returns this envelope: either a boxed payload or a typed
/// error.
#[derive(serde::Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub(crate) enum Response<'a> {
    Ok(Box<dyn erased_serde::Serialize + Send + Sync + 'static>),
    Error(EndpointError<'a>),
}

impl<T: ApiResponse + Send + Sync + 'static> From<T> for Response<'static> {
    fn from(value: T) -> Self {
        Self::Ok(Box::new(value))
    }
}

#[derive(serde::Serialize, PartialEq, Eq, Debug)]
pub struct EndpointError<'a> {
    /// The kind of this error
    kind: ErrorKind,

    /// A context aware message describing the error
    message: Cow<'a, str>,
}

#[derive(serde::Serialize, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Configuration,
    Internal,
}

pub(crate) fn json<'a, T>(val: T) -> Json<Response<'a>>
where
    Response<'a>: From<T>,
{
    Json(Response::from(val))
}

/// Library errors carried across the HTTP boundary.
pub(crate) struct WebError(pub Error);

impl From<Error> for WebError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> AxumResponse {
        let (status, kind) = match &self.0 {
            Error::NotFound(_) => (StatusCode::NOT_FOUND, ErrorKind::NotFound),
            Error::Validation(_) => (StatusCode::BAD_REQUEST, ErrorKind::Validation),
            Error::Conflict(_) => (StatusCode::CONFLICT, ErrorKind::Conflict),
            Error::NoStorage | Error::NoProvider(_) | Error::ProviderNotCapable(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Configuration)
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
        };

        let body = Json(Response::Error(EndpointError {
            kind,
            message: Cow::Owned(self.0.to_string()),
        }));

        (status, body).into_response()
    }
}

pub(crate) type Result<T> = std::result::Result<T, WebError>;
