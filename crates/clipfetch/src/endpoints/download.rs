use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use clipfetch_service::producer::is_supported_url;
use clipfetch_service::types::FetchKey;
use serde::Deserialize;
use url::Url;

use crate::endpoints::ResponseError;
use crate::service::{DownloadResponse, RequestService};

/// The body of a `/download` request.
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    /// The page of the video.
    url: String,
    /// Whether to remove the watermark from the video.
    #[serde(default)]
    remove_watermark: bool,
}

pub async fn download_video(
    State(service): State<RequestService>,
    Json(request): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ResponseError> {
    sentry::configure_scope(|scope| {
        scope.set_tag("remove_watermark", request.remove_watermark);
    });

    let url = Url::parse(request.url.trim())
        .ok()
        .filter(is_supported_url)
        .ok_or((StatusCode::BAD_REQUEST, "url must be an http(s) link to a video page"))?;

    let key = FetchKey::new(url, request.remove_watermark);
    let response = service.download(key).await?;

    Ok(Json(response))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use clipfetch_service::coordinator::FetchCoordinator;
    use clipfetch_service::producer::FetchError;
    use clipfetch_service::test::{TestProducer, TestStore};
    use clipfetch_test::Server;
    use reqwest::StatusCode;
    use serde_json::{Value, json};

    use crate::endpoints::auth::API_KEY_HEADER;
    use crate::endpoints::create_app;
    use crate::service::RequestService;

    const API_KEY: &str = "secret";

    fn server(producer: &Arc<TestProducer>, producer_timeout: Option<Duration>) -> Server {
        let coordinator = FetchCoordinator::new(
            TestStore::new(),
            producer.clone(),
            Duration::from_secs(60),
            producer_timeout,
        );
        Server::with_router(create_app(RequestService::new(coordinator, API_KEY)))
    }

    async fn download(server: &Server, api_key: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = reqwest::Client::new()
            .post(server.url("/download"))
            .json(&body);
        if let Some(api_key) = api_key {
            request = request.header(API_KEY_HEADER, api_key);
        }

        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    fn body() -> Value {
        json!({ "url": "https://example.com/@someone/video/1" })
    }

    #[tokio::test]
    async fn test_download_and_cache() {
        clipfetch_test::setup();
        let producer = TestProducer::succeeding(Duration::ZERO);
        let server = server(&producer, None);

        let (status, response) = download(&server, Some(API_KEY), body()).await;
        assert_eq!(status, StatusCode::OK);
        insta::with_settings!({ sort_maps => true }, {
            insta::assert_json_snapshot!(response, {
                ".data.video_url" => "[video_url]",
            }, @r###"
            {
              "data": {
                "author": "someone",
                "title": "video #1",
                "video_url": "[video_url]"
              },
              "status": "success"
            }
            "###);
        });

        let (status, cached) = download(&server, Some(API_KEY), body()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cached["status"], "cached");
        assert_eq!(cached["data"], response["data"]);
        assert_eq!(producer.calls(), 1);
    }

    #[tokio::test]
    async fn test_watermark_flag_is_separate() {
        clipfetch_test::setup();
        let producer = TestProducer::succeeding(Duration::ZERO);
        let server = server(&producer, None);

        let (_, plain) = download(&server, Some(API_KEY), body()).await;
        let clean_body = json!({
            "url": "https://example.com/@someone/video/1",
            "remove_watermark": true,
        });
        let (status, clean) = download(&server, Some(API_KEY), clean_body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(clean["status"], "success");
        assert_ne!(plain["data"]["video_url"], clean["data"]["video_url"]);
        assert_eq!(producer.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_api_key() {
        clipfetch_test::setup();
        let producer = TestProducer::succeeding(Duration::ZERO);
        let server = server(&producer, None);

        for api_key in [None, Some("wrong")] {
            let (status, response) = download(&server, api_key, body()).await;
            assert_eq!(status, StatusCode::FORBIDDEN);
            assert_eq!(response, json!({ "detail": "Invalid API Key" }));
        }
        assert_eq!(producer.calls(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_url() {
        clipfetch_test::setup();
        let producer = TestProducer::succeeding(Duration::ZERO);
        let server = server(&producer, None);

        for url in ["file:///etc/passwd", "not a url"] {
            let (status, response) = download(&server, Some(API_KEY), json!({ "url": url })).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(
                response,
                json!({ "detail": "url must be an http(s) link to a video page" })
            );
        }
        assert_eq!(producer.calls(), 0);
    }

    #[tokio::test]
    async fn test_producer_failure() {
        clipfetch_test::setup();
        let producer =
            TestProducer::failing(Duration::ZERO, FetchError::MissingContent("video"));
        let server = server(&producer, None);

        let (status, response) = download(&server, Some(API_KEY), body()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response, json!({ "detail": "video page has no video" }));
    }

    #[tokio::test]
    async fn test_producer_timeout() {
        clipfetch_test::setup();
        let producer = TestProducer::succeeding(Duration::from_secs(5));
        let server = server(&producer, Some(Duration::from_millis(50)));

        let (status, response) = download(&server, Some(API_KEY), body()).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response,
            json!({ "detail": "fetching timed out after 50ms" })
        );
    }
}
