use super::ApiError;
use crate::error::Error;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};

/// Name of the multipart field carrying the PDF.
pub const FILE_FIELD: &str = "file";

/// The uploaded PDF, taken from multipart field `file` when the request is a
/// form upload and from the raw body otherwise.
///
/// A form without a `file` upload (a field with a filename) yields an empty
/// payload; the converter rejects that as an input error.
#[derive(Debug)]
pub struct PdfPayload(pub Bytes);

impl<S> FromRequest<S> for PdfPayload
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        if !is_multipart(&req) {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(IntoResponse::into_response)?;
            return Ok(PdfPayload(body));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|rej| multipart_error(rej.status(), rej.body_text()))?;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| multipart_error(err.status(), err.body_text()))?
        {
            // Plain form values named `file` are not uploads.
            if field.name() != Some(FILE_FIELD) || field.file_name().is_none() {
                continue;
            }
            let bytes = field
                .bytes()
                .await
                .map_err(|err| multipart_error(err.status(), err.body_text()))?;
            return Ok(PdfPayload(bytes));
        }

        Ok(PdfPayload(Bytes::new()))
    }
}

fn multipart_error(status: StatusCode, text: String) -> Response {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return (status, text).into_response();
    }
    ApiError(Error::Multipart(text)).into_response()
}

fn is_multipart(req: &Request) -> bool {
    req.headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}
