use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::post_store::{Post, PostStore};
use crate::presigned_urls::{PresignedUpload, UploadIssuer};
use anyhow::{Context, Result};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub posts: Arc<dyn PostStore>,
    pub uploads: Arc<UploadIssuer>,
    pub service_name: String,
}

/// Body of `POST /posts`
#[derive(Debug, Deserialize)]
pub struct NewPost {
    pub title: String,
    pub body: String,
}

/// Query parameters for `GET /posts`
#[derive(Debug, Deserialize)]
pub struct PostListQuery {
    pub user: Option<String>,
}

/// Query parameters for `GET /signedUrlPut`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlQuery {
    pub filename: String,
    pub filetype: String,
    pub post_id: String,
}

/// Success envelope: `{"status": "success", "data": ...}`
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    pub data: T,
}

impl<T> Envelope<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            status: "success",
            data,
        })
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/posts", get(list_posts).post(create_post))
        .route("/posts/:post_id", delete(delete_post))
        .route("/signedUrlPut", get(signed_url_put))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
    }))
}

/// Store a new post owned by the `Authorization` caller
#[instrument(skip(state, headers, payload))]
async fn create_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewPost>, JsonRejection>,
) -> Result<Json<Envelope<Post>>, ApiError> {
    let Json(new_post) = payload.map_err(|rejection| validation_error(rejection.body_text()))?;
    let post = Post::new(new_post.title, new_post.body, caller(&headers));

    info!(
        post_id = %post.id,
        title = %post.title,
        user = ?post.user,
        "Creating post"
    );

    state.posts.put(&post).await.map_err(|e| {
        error!(error = %e, "Error creating post");
        e
    })?;

    metrics::counter!("posts.created").increment(1);
    Ok(Envelope::success(post))
}

/// List posts, optionally only those of one user
#[instrument(skip(state, params))]
async fn list_posts(
    State(state): State<AppState>,
    params: Result<Query<PostListQuery>, QueryRejection>,
) -> Result<Json<Envelope<Vec<Post>>>, ApiError> {
    let Query(params) = params.map_err(|rejection| validation_error(rejection.body_text()))?;

    // An empty `?user=` lists everything
    let user = params.user.as_deref().filter(|u| !u.is_empty());

    let posts = state.posts.scan(user).await.map_err(|e| {
        error!(error = %e, "Error getting posts");
        e
    })?;

    Ok(Envelope::success(posts))
}

/// Delete a post, returning what was stored
#[instrument(skip(state))]
async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Json<Envelope<Post>>, ApiError> {
    let deleted = state.posts.delete(&post_id).await.map_err(|e| {
        error!(error = %e, "Error deleting post");
        e
    })?;

    match deleted {
        Some(post) => {
            metrics::counter!("posts.deleted").increment(1);
            Ok(Envelope::success(post))
        }
        None => Err(ApiError::NotFound("Post not found".to_string())),
    }
}

/// Issue a presigned PUT URL for an upload attached to a post
#[instrument(skip(state, headers, params))]
async fn signed_url_put(
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<SignedUrlQuery>, QueryRejection>,
) -> Result<Json<PresignedUpload>, ApiError> {
    let Query(params) = params.map_err(|rejection| validation_error(rejection.body_text()))?;
    let user = caller(&headers);

    let upload = state
        .uploads
        .issue(
            &params.filename,
            &params.filetype,
            &params.post_id,
            user.as_deref(),
        )
        .await?;

    Ok(Json(upload))
}

/// Caller identity, taken verbatim from the `Authorization` header
fn caller(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?;
    match value.to_str() {
        Ok(user) => Some(user.to_string()),
        Err(_) => {
            warn!(
                header_len = value.len(),
                "Ignoring Authorization header that is not valid UTF-8"
            );
            None
        }
    }
}

fn validation_error(message: String) -> ApiError {
    let message = message.replace('\n', " ");
    error!(message = %message, "Request validation failed");
    ApiError::Validation(message)
}

/// Start the API server, serving until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_store::InMemoryPostStore;
    use crate::presigned_urls::fake::FakePresigner;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_router(presigner: FakePresigner) -> Router {
        let state = AppState {
            posts: Arc::new(InMemoryPostStore::new()),
            uploads: Arc::new(UploadIssuer::new(
                Arc::new(presigner),
                Duration::from_secs(3600),
            )),
            service_name: "postboard-api".to_string(),
        };
        create_router(state, &ApiConfig::default())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn create_request(title: &str, user: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/posts").header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("authorization", user);
        }
        builder
            .body(Body::from(json!({ "title": title, "body": "text" }).to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let router = test_router(FakePresigner::default());

        let (status, created) = send(&router, create_request("Hello", Some("alice"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["status"], "success");
        assert_eq!(created["data"]["title"], "Hello");
        assert_eq!(created["data"]["user"], "alice");
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let (status, listed) = send(&router, get("/posts")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = listed["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|p| p["id"].as_str())
            .collect();
        assert_eq!(ids, vec![id.as_str()]);

        let (_, mine) = send(&router, get("/posts?user=alice")).await;
        assert_eq!(mine["data"].as_array().unwrap().len(), 1);

        let (_, theirs) = send(&router, get("/posts?user=bob")).await;
        assert!(theirs["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_without_authorization_has_null_user() {
        let router = test_router(FakePresigner::default());
        let (status, created) = send(&router, create_request("Hello", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(created["data"]["user"].is_null());
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_body() {
        let router = test_router(FakePresigner::default());
        let request = Request::post("/posts")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"title": "no body"}"#))
            .unwrap();

        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status_code"], 10422);
        assert!(body["data"].is_null());
        assert!(body["message"].as_str().unwrap().contains("body"));
    }

    #[tokio::test]
    async fn test_delete_existing_and_missing() {
        let router = test_router(FakePresigner::default());
        let (_, created) = send(&router, create_request("Bye", Some("alice"))).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let delete_request = |id: &str| {
            Request::delete(format!("/posts/{id}"))
                .body(Body::empty())
                .unwrap()
        };

        let (status, deleted) = send(&router, delete_request(&id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["data"], created["data"]);

        let (status, missing) = send(&router, delete_request(&id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(missing["status"], "error");
        assert_eq!(missing["message"], "Post not found");

        let (_, listed) = send(&router, get("/posts")).await;
        assert!(listed["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signed_url_put() {
        let router = test_router(FakePresigner::default());
        let request = Request::get("/signedUrlPut?filename=..%2F..%2Fetc%2Fpasswd&filetype=image%2Fpng&postId=task1")
            .header("authorization", "alice")
            .body(Body::empty())
            .unwrap();

        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);

        let object_name = body["objectName"].as_str().unwrap();
        assert!(object_name.starts_with("alice/task1/"));
        assert!(object_name.ends_with("passwd"));
        assert!(!object_name.contains(".."));
        assert!(body["uploadURL"].as_str().unwrap().contains(object_name));
    }

    #[tokio::test]
    async fn test_signed_url_put_failure_is_500() {
        let router = test_router(FakePresigner::failing());
        let request = get("/signedUrlPut?filename=a.png&filetype=image%2Fpng&postId=task1");

        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_signed_url_put_requires_parameters() {
        let router = test_router(FakePresigner::default());
        let (status, body) = send(&router, get("/signedUrlPut?filename=a.png")).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["status_code"], 10422);
    }

    #[test]
    fn test_caller_from_authorization_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(caller(&headers), None);

        headers.insert(AUTHORIZATION, "alice".parse().unwrap());
        assert_eq!(caller(&headers).as_deref(), Some("alice"));

        headers.insert(
            AUTHORIZATION,
            axum::http::HeaderValue::from_bytes(b"al\xffice").unwrap(),
        );
        assert_eq!(caller(&headers), None);
    }

    #[tokio::test]
    async fn test_create_with_non_utf8_authorization_is_anonymous() {
        let router = test_router(FakePresigner::default());
        let request = Request::post("/posts")
            .header("content-type", "application/json")
            .header(
                "authorization",
                axum::http::HeaderValue::from_bytes(b"al\xffice").unwrap(),
            )
            .body(Body::from(json!({ "title": "Hi", "body": "text" }).to_string()))
            .unwrap();

        let (status, created) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert!(created["data"]["user"].is_null());
    }

    #[tokio::test]
    async fn test_health_check() {
        let router = test_router(FakePresigner::default());
        let (status, body) = send(&router, get("/health")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }
}
