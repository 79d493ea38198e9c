use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use uuid::Uuid;

use super::ApiError;
use crate::auth::AccessCredential;

/// Header carrying the per-call correlation id. A replay reuses the id of
/// the attempt it repeats.
pub const CORRELATION_HEADER: &str = "X-Correlation-Id";

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    /// Sent as multipart/form-data; reqwest writes the content type.
    Multipart(Vec<MultipartField>),
}

#[derive(Debug, Clone)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        file_name: String,
        mime: Option<String>,
        bytes: Vec<u8>,
    },
}

/// Owned description of an outbound call, rebuilt for every attempt so the
/// gateway can replay it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    target: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: RequestBody,
    renewal_exempt: bool,
    correlation_id: String,
}

impl ApiRequest {
    /// `target` is either a path below the API base URL or an absolute URL.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            renewal_exempt: false,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn patch(target: impl Into<String>) -> Self {
        Self::new(Method::PATCH, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to encode body: {}", e)))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, fields: Vec<MultipartField>) -> Self {
        self.body = RequestBody::Multipart(fields);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Never answer a 401 on this call with a renewal (renewal, sign-out
    /// and the sign-in calls themselves).
    pub fn exempt_from_renewal(mut self) -> Self {
        self.renewal_exempt = true;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn is_renewal_exempt(&self) -> bool {
        self.renewal_exempt
    }

    /// Path component of the target, for matching against endpoint paths.
    pub(crate) fn path(&self) -> String {
        if is_absolute(&self.target) {
            reqwest::Url::parse(&self.target)
                .map(|url| url.path().to_string())
                .unwrap_or_else(|_| self.target.clone())
        } else {
            self.target.split('?').next().unwrap_or_default().to_string()
        }
    }

    pub(crate) fn url(&self, base_url: &str) -> String {
        if is_absolute(&self.target) {
            self.target.clone()
        } else {
            format!(
                "{}/{}",
                base_url.trim_end_matches('/'),
                self.target.trim_start_matches('/')
            )
        }
    }

    /// Build one attempt of this request with `credential` attached.
    pub(crate) fn build(
        &self,
        client: &Client,
        base_url: &str,
        credential: Option<&AccessCredential>,
    ) -> Result<RequestBuilder, ApiError> {
        let mut builder = client
            .request(self.method.clone(), self.url(base_url))
            .header(CORRELATION_HEADER, self.correlation_id.as_str());

        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        if let Some(credential) = credential {
            builder = builder.bearer_auth(credential.token());
        }

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(fields) => builder.multipart(build_form(fields)?),
        };
        Ok(builder)
    }
}

fn is_absolute(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

fn build_form(fields: &[MultipartField]) -> Result<Form, ApiError> {
    let mut form = Form::new();
    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name.clone(), value.clone()),
            MultipartField::File {
                name,
                file_name,
                mime,
                bytes,
            } => {
                let mut part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                if let Some(mime) = mime {
                    part = part.mime_str(mime).map_err(|e| {
                        ApiError::InvalidRequest(format!("Bad mime type {}: {}", mime, e))
                    })?;
                }
                form.part(name.clone(), part)
            }
        };
    }
    Ok(form)
}
