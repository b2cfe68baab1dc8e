use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::model::TaskPayload;
use crate::remote::{Gateway, RemoteFile, RemoteTask};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `Gateway` implementation over the task REST API
/// (`GET/POST/PATCH/DELETE /tasks` plus the file endpoints).
#[derive(Debug, Clone)]
pub struct HttpGateway {
    base: url::Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct FilesEnvelope {
    files: Vec<RemoteFile>,
}

#[derive(Debug, Deserialize)]
struct AttachResponse {
    file_id: i64,
}

impl HttpGateway {
    /// Build a gateway for the given API base URL,
    /// e.g. `http://localhost:3000/api/v1`.
    pub fn new(base_url: &str) -> Result<Self> {
        // Trailing slash matters to Url::join: without it the last path
        // segment gets replaced instead of appended.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = url::Url::parse(&normalized)
            .map_err(|e| Error::Config(format!("invalid API base URL '{base_url}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<url::Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint '{path}': {e}")))
    }

    /// Send a request and decode the response. Returns `Ok(None)` for a
    /// 204 No Content; 4xx/5xx become `Error::Http` with the message
    /// extracted from the server's error body.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<Option<T>> {
        let response = req.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                message: extract_error_message(&body, &status),
            });
        }

        let parsed = serde_json::from_str(&body).map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Some(parsed))
    }

    /// Like `send`, but for endpoints where a body is always expected.
    async fn send_expecting<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        self.send(req)
            .await?
            .ok_or_else(|| Error::Parse("expected a response body, got 204 No Content".into()))
    }
}

/// Pull a human-readable message out of the server's error body:
/// `{"error": "..."}` (400s), `{"errors": [...]}` (422 validation),
/// or the HTTP status text as a fallback.
fn extract_error_message(body: &str, status: &reqwest::StatusCode) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
            return message.to_string();
        }
        if let Some(errors) = value.get("errors").and_then(|v| v.as_array()) {
            let messages: Vec<&str> = errors.iter().filter_map(|e| e.as_str()).collect();
            if !messages.is_empty() {
                return messages.join(", ");
            }
        }
        if let Some(message) = value.get("message").and_then(|v| v.as_str()) {
            return message.to_string();
        }
    }
    status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string()
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn list_tasks(&self) -> Result<Vec<RemoteTask>> {
        let url = self.endpoint("tasks")?;
        Ok(self.send(self.client.get(url)).await?.unwrap_or_default())
    }

    async fn get_task(&self, id: &str) -> Result<Option<RemoteTask>> {
        let url = self.endpoint(&format!("tasks/{id}"))?;
        self.send(self.client.get(url)).await
    }

    async fn create_task(&self, payload: &TaskPayload) -> Result<Option<RemoteTask>> {
        let url = self.endpoint("tasks")?;
        self.send(self.client.post(url).json(&json!({ "task": payload })))
            .await
    }

    async fn update_task(&self, id: &str, payload: &TaskPayload) -> Result<Option<RemoteTask>> {
        let url = self.endpoint(&format!("tasks/{id}"))?;
        self.send(self.client.patch(url).json(&json!({ "task": payload })))
            .await
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("tasks/{id}"))?;
        self.send::<serde_json::Value>(self.client.delete(url))
            .await?;
        Ok(())
    }

    async fn upload_file(&self, task_id: &str, filename: &str, bytes: Vec<u8>) -> Result<i64> {
        let url = self.endpoint(&format!("tasks/{task_id}/attach_file"))?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let response: AttachResponse = self
            .send_expecting(self.client.post(url).multipart(form))
            .await?;
        Ok(response.file_id)
    }

    async fn list_files(&self, task_id: &str) -> Result<Vec<RemoteFile>> {
        let url = self.endpoint(&format!("tasks/{task_id}/list_files"))?;
        let envelope: FilesEnvelope = self.send_expecting(self.client.get(url)).await?;
        Ok(envelope.files)
    }

    async fn delete_file(&self, task_id: &str, file_id: i64) -> Result<()> {
        let url = self.endpoint(&format!("tasks/{task_id}/files/{file_id}"))?;
        self.send::<serde_json::Value>(self.client.delete(url))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn task_body(id: i64, title: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "description": null,
            "status": status,
            "due_date": null,
            "files_count": 0,
            "created_at": "2025-01-01T00:00:00Z",
            "updated_at": "2025-01-01T00:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_create_task_posts_wrapped_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks"))
            .and(body_json(json!({"task": {"title": "Buy milk"}})))
            .respond_with(ResponseTemplate::new(201).set_body_json(task_body(5, "Buy milk", "pending")))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        let created = gateway
            .create_task(&TaskPayload::new("Buy milk"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.id, 5);
        assert_eq!(created.status, TaskStatus::Pending);

        let task = created.into_task(Some("local-x".into()));
        assert_eq!(task.id, "5");
        assert!(task.synced);
        assert_eq!(task.local_id.as_deref(), Some("local-x"));
    }

    #[tokio::test]
    async fn test_validation_rejection_is_http_422() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks"))
            .respond_with(
                ResponseTemplate::new(422).set_body_json(json!({"errors": ["Title can't be blank"]})),
            )
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        let err = gateway
            .create_task(&TaskPayload::default())
            .await
            .unwrap_err();
        match err {
            Error::Http { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "Title can't be blank");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
        assert!(!Error::Http {
            status: 422,
            message: String::new()
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_delete_204_is_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/tasks/5"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        gateway.delete_task("5").await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        let err = gateway.list_tasks().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Nothing listens on this port.
        let gateway = HttpGateway::new("http://127.0.0.1:1/api/v1").unwrap();
        let err = gateway.list_tasks().await.unwrap_err();
        assert!(matches!(err, Error::Network(_)), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_list_files_unwraps_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/5/list_files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{"id": 9, "filename": "notes.txt", "content_type": "text/plain",
                           "byte_size": 12, "url": "http://example.test/f/9",
                           "created_at": "2025-01-01T00:00:00Z"}]
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        let files = gateway.list_files("5").await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id, 9);
        assert_eq!(files[0].filename, "notes.txt");
    }

    #[tokio::test]
    async fn test_upload_file_returns_file_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/tasks/5/attach_file"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": "File attached successfully",
                "file_id": 9
            })))
            .mount(&server)
            .await;

        let gateway = HttpGateway::new(&format!("{}/api/v1", server.uri())).unwrap();
        let file_id = gateway
            .upload_file("5", "notes.txt", b"hello router".to_vec())
            .await
            .unwrap();
        assert_eq!(file_id, 9);
    }
}
