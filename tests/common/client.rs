//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all tagtrain-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use super::server::TestServer;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client sending a session token on every request
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    token: Option<String>,
}

impl TestClient {
    /// Creates a new unauthenticated client
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            token: None,
        }
    }

    /// Creates a client that authenticates with the given token
    pub fn with_token(base_url: String, token: &str) -> Self {
        let mut client = Self::new(base_url);
        client.token = Some(token.to_string());
        client
    }

    /// Creates a client authenticated as [`TEST_USER`]
    pub fn authenticated(server: &TestServer) -> Self {
        Self::with_token(server.base_url.clone(), &server.test_token)
    }

    /// Creates a client authenticated as [`OTHER_USER`]
    pub fn authenticated_other(server: &TestServer) -> Self {
        Self::with_token(server.base_url.clone(), &server.other_token)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }

    // ========================================================================
    // Home
    // ========================================================================

    /// GET /
    pub async fn home(&self) -> Response {
        self.request(reqwest::Method::GET, "/")
            .send()
            .await
            .expect("Home request failed")
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// POST /v1/tracks with the default test audio
    pub async fn upload_track(&self, title: &str) -> Response {
        self.upload_track_with(
            Some(title),
            "song.mp3",
            TEST_AUDIO_MIME,
            TEST_AUDIO_BYTES.to_vec(),
        )
        .await
    }

    /// POST /v1/tracks with full control over the audio part
    pub async fn upload_track_with(
        &self,
        title: Option<&str>,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Response {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .expect("Invalid mime type");
        let mut form = Form::new().part("audio", part);
        if let Some(title) = title {
            form = form.text("title", title.to_string());
        }
        self.request(reqwest::Method::POST, "/v1/tracks")
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// POST /v1/tracks with only a title, no audio
    pub async fn upload_without_audio(&self, title: &str) -> Response {
        let form = Form::new().text("title", title.to_string());
        self.request(reqwest::Method::POST, "/v1/tracks")
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// Uploads a track and returns its id, asserting success
    pub async fn upload_track_id(&self, title: &str) -> String {
        let response = self.upload_track(title).await;
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.expect("Invalid upload response");
        body["track"]["id"]
            .as_str()
            .expect("Upload response has no track id")
            .to_string()
    }

    /// GET /v1/tracks
    pub async fn get_tracks(&self) -> Response {
        self.request(reqwest::Method::GET, "/v1/tracks")
            .send()
            .await
            .expect("Get tracks request failed")
    }

    /// DELETE /v1/tracks/{id}
    pub async fn delete_track(&self, track_id: &str) -> Response {
        self.request(reqwest::Method::DELETE, &format!("/v1/tracks/{}", track_id))
            .send()
            .await
            .expect("Delete track request failed")
    }

    /// POST /v1/tracks/{id}/tags
    pub async fn add_tags(&self, track_id: &str, tags: &[&str]) -> Response {
        self.request(
            reqwest::Method::POST,
            &format!("/v1/tracks/{}/tags", track_id),
        )
        .json(&json!({ "tags": tags }))
        .send()
        .await
        .expect("Add tags request failed")
    }

    /// DELETE /v1/tracks/{id}/tags/{tag}
    pub async fn remove_tag(&self, track_id: &str, tag: &str) -> Response {
        self.request(
            reqwest::Method::DELETE,
            &format!("/v1/tracks/{}/tags/{}", track_id, tag),
        )
        .send()
        .await
        .expect("Remove tag request failed")
    }

    // ========================================================================
    // Tags
    // ========================================================================

    /// GET /v1/tags
    pub async fn get_tags(&self) -> Response {
        self.request(reqwest::Method::GET, "/v1/tags")
            .send()
            .await
            .expect("Get tags request failed")
    }

    /// POST /v1/tags
    pub async fn create_tag(&self, name: &str) -> Response {
        self.request(reqwest::Method::POST, "/v1/tags")
            .json(&json!({ "name": name }))
            .send()
            .await
            .expect("Create tag request failed")
    }

    /// DELETE /v1/tags/{id}
    pub async fn delete_tag(&self, tag_id: usize) -> Response {
        self.request(reqwest::Method::DELETE, &format!("/v1/tags/{}", tag_id))
            .send()
            .await
            .expect("Delete tag request failed")
    }

    // ========================================================================
    // User
    // ========================================================================

    /// GET /v1/user/stats
    pub async fn get_stats(&self) -> Response {
        self.request(reqwest::Method::GET, "/v1/user/stats")
            .send()
            .await
            .expect("Get stats request failed")
    }

    // ========================================================================
    // Personal Model
    // ========================================================================

    /// GET /v1/model
    pub async fn get_model(&self) -> Response {
        self.request(reqwest::Method::GET, "/v1/model")
            .send()
            .await
            .expect("Get model request failed")
    }

    /// POST /v1/model/train
    pub async fn train_model(&self) -> Response {
        self.request(reqwest::Method::POST, "/v1/model/train")
            .send()
            .await
            .expect("Train request failed")
    }

    /// Uploads `count` tracks and tags each by hand, making them training material
    pub async fn create_labelled_tracks(&self, count: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let id = self.upload_track_id(&format!("Labelled {}", i)).await;
            let response = self.add_tags(&id, &["jazz", "chill"]).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            ids.push(id);
        }
        ids
    }
}
