//! HTTP client for the Face API v1.0 REST surface.

use crate::gateway::{FaceService, GatewayError, ResourceKind};
use crate::types::{DetectedFace, FaceId, IdentifyResult, ImageSource, PersonId, TrainingStatus};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
pub const DEFAULT_API_ROOT: &str = "https://westcentralus.api.cognitive.microsoft.com/face/v1.0";

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePersonResponse {
    person_id: PersonId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFaceResponse {
    persisted_face_id: FaceId,
}

#[derive(Debug, Deserialize)]
struct TrainingStatusResponse {
    status: TrainingStatus,
}

/// Face API client authenticated with a subscription key.
pub struct FaceApiClient {
    http: reqwest::Client,
    api_root: String,
    key: String,
}

impl FaceApiClient {
    pub fn new(api_root: &str, key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Unknown(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_root: api_root.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path)
    }

    fn group_path(group_id: &str) -> String {
        format!("/persongroups/{group_id}")
    }

    async fn execute(
        &self,
        request: RequestBuilder,
        hint: ResourceKind,
    ) -> Result<Response, GatewayError> {
        let response = request
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body, hint))
    }

    async fn execute_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        hint: ResourceKind,
    ) -> Result<T, GatewayError> {
        self.execute(request, hint)
            .await?
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Unknown(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl FaceService for FaceApiClient {
    async fn get_group(&self, group_id: &str) -> Result<(), GatewayError> {
        let req = self.http.get(self.url(&Self::group_path(group_id)));
        self.execute(req, ResourceKind::PersonGroup).await.map(|_| ())
    }

    async fn create_group(&self, group_id: &str, name: &str) -> Result<(), GatewayError> {
        let req = self
            .http
            .put(self.url(&Self::group_path(group_id)))
            .json(&json!({ "name": name }));
        self.execute(req, ResourceKind::PersonGroup).await.map(|_| ())
    }

    async fn delete_group(&self, group_id: &str) -> Result<(), GatewayError> {
        let req = self.http.delete(self.url(&Self::group_path(group_id)));
        self.execute(req, ResourceKind::PersonGroup).await.map(|_| ())
    }

    async fn create_person(&self, group_id: &str, name: &str) -> Result<PersonId, GatewayError> {
        let req = self
            .http
            .post(self.url(&format!("{}/persons", Self::group_path(group_id))))
            .json(&json!({ "name": name }));
        let created: CreatePersonResponse = self.execute_json(req, ResourceKind::PersonGroup).await?;
        Ok(created.person_id)
    }

    async fn delete_person(
        &self,
        group_id: &str,
        person_id: PersonId,
    ) -> Result<(), GatewayError> {
        let req = self.http.delete(self.url(&format!(
            "{}/persons/{person_id}",
            Self::group_path(group_id)
        )));
        self.execute(req, ResourceKind::Person).await.map(|_| ())
    }

    async fn detect(&self, image: &ImageSource) -> Result<Vec<DetectedFace>, GatewayError> {
        let req = self
            .http
            .post(self.url("/detect"))
            .query(&[("returnFaceId", "true"), ("returnFaceLandmarks", "false")]);
        let req = match image {
            ImageSource::Url(url) => req.json(&json!({ "url": url })),
            ImageSource::Bytes(bytes) => req
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes.clone()),
        };
        self.execute_json(req, ResourceKind::Other).await
    }

    async fn add_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        image_url: &str,
    ) -> Result<FaceId, GatewayError> {
        let req = self
            .http
            .post(self.url(&format!(
                "{}/persons/{person_id}/persistedFaces",
                Self::group_path(group_id)
            )))
            .json(&json!({ "url": image_url }));
        let added: AddFaceResponse = self.execute_json(req, ResourceKind::Person).await?;
        Ok(added.persisted_face_id)
    }

    async fn delete_face(
        &self,
        group_id: &str,
        person_id: PersonId,
        face_id: FaceId,
    ) -> Result<(), GatewayError> {
        let req = self.http.delete(self.url(&format!(
            "{}/persons/{person_id}/persistedFaces/{face_id}",
            Self::group_path(group_id)
        )));
        self.execute(req, ResourceKind::Face).await.map(|_| ())
    }

    async fn train(&self, group_id: &str) -> Result<(), GatewayError> {
        let req = self
            .http
            .post(self.url(&format!("{}/train", Self::group_path(group_id))));
        self.execute(req, ResourceKind::PersonGroup).await.map(|_| ())
    }

    async fn training_status(&self, group_id: &str) -> Result<TrainingStatus, GatewayError> {
        let req = self
            .http
            .get(self.url(&format!("{}/training", Self::group_path(group_id))));
        let status: TrainingStatusResponse =
            self.execute_json(req, ResourceKind::PersonGroup).await?;
        Ok(status.status)
    }

    async fn identify(
        &self,
        group_id: &str,
        face_ids: &[FaceId],
    ) -> Result<Vec<IdentifyResult>, GatewayError> {
        let req = self.http.post(self.url("/identify")).json(&json!({
            "personGroupId": group_id,
            "faceIds": face_ids,
        }));
        self.execute_json(req, ResourceKind::PersonGroup).await
    }
}

fn classify_transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        GatewayError::ThrottledOrTransient(err.to_string())
    } else {
        GatewayError::Unknown(err.to_string())
    }
}

/// Map a non-success response onto the gateway error taxonomy.
///
/// `hint` names the resource the request addressed; it is used for 404s whose
/// error code does not say which resource was missing.
pub(crate) fn classify_response(status: StatusCode, body: &str, hint: ResourceKind) -> GatewayError {
    let (code, message) = match serde_json::from_str::<ErrorBody>(body) {
        Ok(b) => (b.error.code, b.error.message),
        Err(_) => (String::new(), body.trim().to_string()),
    };
    let detail = if code.is_empty() {
        format!("HTTP {}: {message}", status.as_u16())
    } else {
        format!("{code}: {message}")
    };

    // Identify and training status against a group that was never trained.
    // The group exists, so this is neither a missing resource nor a bad image.
    if code == "PersonGroupNotTrained" || code == "LargePersonGroupNotTrained" {
        return GatewayError::Unknown(detail);
    }

    if code.ends_with("NotFound") || status == StatusCode::NOT_FOUND {
        let kind = match code.as_str() {
            "PersonGroupNotFound" | "LargePersonGroupNotFound" => ResourceKind::PersonGroup,
            "PersonNotFound" => ResourceKind::Person,
            "PersistedFaceNotFound" | "FaceNotFound" => ResourceKind::Face,
            _ => hint,
        };
        return GatewayError::NotFound(kind);
    }

    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || code == "RateLimitExceeded"
    {
        return GatewayError::ThrottledOrTransient(detail);
    }

    if status == StatusCode::BAD_REQUEST || status == StatusCode::UNSUPPORTED_MEDIA_TYPE {
        return GatewayError::InvalidInput(detail);
    }

    GatewayError::Unknown(detail)
}
