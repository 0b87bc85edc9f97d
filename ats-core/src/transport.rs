//! HTTP plumbing shared by the public and authorized request paths
//!
//! Requests are described by [`RequestOptions`] rather than a live
//! `reqwest::RequestBuilder` so the gateway can rebuild and resend the same
//! request after a refresh.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;

/// One part of a multipart form upload
#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub name: String,
    pub content: Vec<u8>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl MultipartPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: value.into().into_bytes(),
            file_name: None,
            mime_type: None,
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            content,
            file_name: Some(file_name.into()),
            mime_type: Some(mime_type.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Multipart(Vec<MultipartPart>),
}

/// Method, body and extra headers for one request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: RequestBody::Empty,
            headers: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn post(body: &impl Serialize) -> Result<Self, ApiError> {
        Self::new(Method::POST).json(body)
    }

    pub fn put(body: &impl Serialize) -> Result<Self, ApiError> {
        Self::new(Method::PUT).json(body)
    }

    pub fn patch(body: &impl Serialize) -> Result<Self, ApiError> {
        Self::new(Method::PATCH).json(body)
    }

    pub fn multipart(method: Method, parts: Vec<MultipartPart>) -> Self {
        Self {
            method,
            body: RequestBody::Multipart(parts),
            headers: Vec::new(),
        }
    }

    pub fn json(mut self, body: &impl Serialize) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("body is not serializable: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn is_multipart(&self) -> bool {
        matches!(self.body, RequestBody::Multipart(_))
    }
}

/// Base URL plus a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Send once. Status handling is left to the caller.
    pub async fn send(
        &self,
        path: &str,
        options: &RequestOptions,
        bearer: Option<&str>,
    ) -> Result<Response, ApiError> {
        let mut req = self.client.request(options.method.clone(), self.url(path));

        // multipart gets its boundary content-type from reqwest
        let mut headers = HeaderMap::new();
        req = match &options.body {
            RequestBody::Empty => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                req
            }
            RequestBody::Json(value) => {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                req.body(value.to_string())
            }
            RequestBody::Multipart(parts) => req.multipart(build_form(parts)?),
        };

        // caller headers replace the defaults
        for (name, value) in &options.headers {
            let name = HeaderName::try_from(name.as_str())
                .map_err(|e| ApiError::InvalidRequest(format!("header name {}: {}", name, e)))?;
            let value = HeaderValue::try_from(value.as_str())
                .map_err(|e| ApiError::InvalidRequest(format!("header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        req = req.headers(headers);

        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        Ok(req.send().await?)
    }

    /// Unauthenticated request, used for login and register
    pub async fn public_request<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let response = self.send(path, options, None).await?;
        read_response(response).await
    }
}

fn build_form(parts: &[MultipartPart]) -> Result<reqwest::multipart::Form, ApiError> {
    let mut form = reqwest::multipart::Form::new();
    for part in parts {
        let mut p = reqwest::multipart::Part::bytes(part.content.clone());
        if let Some(ref file_name) = part.file_name {
            p = p.file_name(file_name.clone());
        }
        if let Some(ref mime) = part.mime_type {
            p = p
                .mime_str(mime)
                .map_err(|e| ApiError::InvalidRequest(format!("mime type {}: {}", mime, e)))?;
        }
        form = form.part(part.name.clone(), p);
    }
    Ok(form)
}

/// Turn a response into `T`, or into the typed error for its status.
///
/// 204 (or an empty 2xx body) deserializes `T` from JSON `null`, so `()`
/// and `Option<_>` work.
pub async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();

    if !status.is_success() {
        return Err(error_from_response(response).await);
    }

    if status == StatusCode::NO_CONTENT {
        return serde_json::from_value(Value::Null)
            .map_err(|e| ApiError::InvalidResponse(format!("empty response: {}", e)));
    }

    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return serde_json::from_value(Value::Null)
            .map_err(|e| ApiError::InvalidResponse(format!("empty response: {}", e)));
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

/// Build the typed error for a non-2xx response, using the body's
/// `message` field when there is one.
pub async fn error_from_response(response: Response) -> ApiError {
    let status = response.status();
    let message = response
        .bytes()
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|body| body.get("message").and_then(Value::as_str).map(String::from));

    error_for_status(status, message)
}

pub fn error_for_status(status: StatusCode, message: Option<String>) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized {
            message: message.unwrap_or_else(|| generic_message(status)),
        },
        StatusCode::FORBIDDEN => ApiError::Forbidden {
            message: message
                .unwrap_or_else(|| "You do not have permission to perform this action".to_string()),
        },
        StatusCode::NOT_FOUND => ApiError::NotFound {
            message: message.unwrap_or_else(|| "Resource not found".to_string()),
        },
        s => ApiError::Api {
            status: s.as_u16(),
            message: message.unwrap_or_else(|| generic_message(s)),
        },
    }
}

fn generic_message(status: StatusCode) -> String {
    format!(
        "API Error: {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    )
}
