use crate::config::DynamoConfig;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Builder as DynamoConfigBuilder;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde::{Deserialize, Serialize};
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_item};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// A post record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post ID, the table's partition key. New posts get a UUID v4.
    pub id: String,
    pub title: String,
    pub body: String,
    /// Caller identity taken from the `Authorization` header, if any
    pub user: Option<String>,
}

impl Post {
    pub fn new(title: String, body: String, user: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            body,
            user,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
    #[error("malformed post record: {0}")]
    Codec(#[from] serde_dynamo::Error),
}

impl StoreError {
    fn request(operation: &'static str, err: impl std::error::Error) -> Self {
        StoreError::Request {
            operation,
            message: DisplayErrorContext(err).to_string(),
        }
    }
}

/// Key-value table holding post records
#[async_trait]
pub trait PostStore: Send + Sync + 'static {
    /// Store a post, replacing any record with the same id
    async fn put(&self, post: &Post) -> Result<(), StoreError>;

    /// Return the posts one scan yields, optionally filtered on `user`
    async fn scan(&self, user: Option<&str>) -> Result<Vec<Post>, StoreError>;

    /// Delete by id, returning the record that was there
    async fn delete(&self, id: &str) -> Result<Option<Post>, StoreError>;
}

/// DynamoDB-backed post store
pub struct DynamoPostStore {
    client: DynamoClient,
    table: String,
}

impl DynamoPostStore {
    pub async fn new(config: &DynamoConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = DynamoConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(
            table = %config.table,
            region = %config.region,
            "DynamoDB post store initialized"
        );

        Self::with_client(DynamoClient::from_conf(builder.build()), &config.table)
    }

    pub fn with_client(client: DynamoClient, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl PostStore for DynamoPostStore {
    #[instrument(skip(self, post), fields(post_id = %post.id))]
    async fn put(&self, post: &Post) -> Result<(), StoreError> {
        let item = to_item(post)?;

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(|e| StoreError::request("PutItem", e))?;

        debug!(post_id = %post.id, "Post stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn scan(&self, user: Option<&str>) -> Result<Vec<Post>, StoreError> {
        let mut request = self.client.scan().table_name(&self.table);

        // `user` is a reserved word in DynamoDB expressions
        if let Some(user) = user {
            request = request
                .filter_expression("#user = :user")
                .expression_attribute_names("#user", "user")
                .expression_attribute_values(":user", AttributeValue::S(user.to_string()));
        }

        let output = request
            .send()
            .await
            .map_err(|e| StoreError::request("Scan", e))?;

        let posts: Vec<Post> = from_items(output.items.unwrap_or_default())?;
        Ok(posts)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<Option<Post>, StoreError> {
        let output = self
            .client
            .delete_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(id.to_string()))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(|e| StoreError::request("DeleteItem", e))?;

        match output.attributes {
            Some(attributes) if !attributes.is_empty() => Ok(Some(from_item(attributes)?)),
            _ => Ok(None),
        }
    }
}

/// Process-local post store, for running the API without AWS and for tests
#[derive(Default)]
pub struct InMemoryPostStore {
    posts: RwLock<HashMap<String, Post>>,
}

impl InMemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for InMemoryPostStore {
    async fn put(&self, post: &Post) -> Result<(), StoreError> {
        let mut posts = self.posts.write().await;
        posts.insert(post.id.clone(), post.clone());
        Ok(())
    }

    async fn scan(&self, user: Option<&str>) -> Result<Vec<Post>, StoreError> {
        let posts = self.posts.read().await;
        Ok(posts
            .values()
            .filter(|post| user.map_or(true, |u| post.user.as_deref() == Some(u)))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<Option<Post>, StoreError> {
        let mut posts = self.posts.write().await;
        Ok(posts.remove(id))
    }
}
