//! Postboard API Service
//!
//! REST backend for posts. Post records live in a DynamoDB table keyed by
//! `id`; attachments are uploaded by clients straight to S3 using presigned
//! PUT URLs issued here.
//!
//! ## Endpoints
//!
//! - `POST /posts`: create a post owned by the `Authorization` caller
//! - `GET /posts?user=`: scan posts, optionally filtered by user
//! - `DELETE /posts/{post_id}`: delete a post, returning its prior fields
//! - `GET /signedUrlPut?filename=&filetype=&postId=`: presigned upload URL
//!
//! ## Architecture
//!
//! ```text
//!   Client ──────────────▶ API ──────────────▶ DynamoDB
//!     │                     │                  (posts)
//!     │                     │ presign PUT
//!     │                     ▼
//!     └── PUT {user}/{postId}/{file} ──▶ S3 ──▶ upload event ──▶ labeler
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod post_store;
pub mod presigned_urls;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::ApiError;
pub use post_store::{DynamoPostStore, InMemoryPostStore, Post, PostStore, StoreError};
pub use presigned_urls::{PresignedUpload, S3Presigner, UploadError, UploadIssuer, UploadPresigner};
