//! Gateway bootstrap and routing

use crate::s3;
use crate::service::ObjectService;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use replistore_common::{Config, NodeId, Result, ThirdPartyKind};
use replistore_meta_store::MetaStore;
use replistore_queue::{StorageTaskHandler, TaskQueue, WorkerPool};
use replistore_storage::{
    FileStorageNode, HttpThirdPartySource, MockThirdPartySource, ReplicationManager,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// A fully wired gateway: storage, metadata, queue and the service over them
pub struct Gateway {
    service: Arc<ObjectService>,
    pool: Arc<WorkerPool>,
    max_object_size: usize,
}

impl Gateway {
    /// Build every component described by `config`
    ///
    /// The worker pool is created but not started.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;

        let metadata = Arc::new(MetaStore::open(&config.metadata.path)?);
        info!("Metadata store opened at {:?}", config.metadata.path);

        let manager = Arc::new(build_manager(config).await?);

        let queue = Arc::new(TaskQueue::new(config.queue.capacity)?);
        let handler = Arc::new(StorageTaskHandler::new(Arc::clone(&manager)));
        let pool = Arc::new(WorkerPool::new(queue, handler, config.queue.workers));

        let service = Arc::new(ObjectService::new(manager, metadata, Arc::clone(&pool)));
        Ok(Self {
            service,
            pool,
            max_object_size: config.server.max_object_size,
        })
    }

    /// Start the background workers
    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    /// Drain queued tasks and stop the workers
    pub async fn stop(&self) {
        self.pool.stop().await;
    }

    #[must_use]
    pub const fn service(&self) -> &Arc<ObjectService> {
        &self.service
    }

    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.service), self.max_object_size)
    }
}

async fn build_manager(config: &Config) -> Result<ReplicationManager> {
    let timeout = (config.storage.node_timeout_ms > 0)
        .then(|| Duration::from_millis(config.storage.node_timeout_ms));
    let mut builder = ReplicationManager::builder()
        .primary(config.storage.primary.clone().map(NodeId::from))
        .node_timeout(timeout);

    for node in &config.storage.nodes {
        let storage = FileStorageNode::open(node.id.as_str(), node.path.clone()).await?;
        info!("Storage node {} at {:?}", node.id, node.path);
        builder = builder.node(Arc::new(storage));
    }

    let tp = &config.third_party;
    builder = match tp.kind {
        ThirdPartyKind::Mock => builder.third_party(Arc::new(
            MockThirdPartySource::new(tp.name.clone(), tp.endpoint.clone())
                .with_latency(Duration::from_millis(tp.latency_ms)),
        )),
        ThirdPartyKind::Http => builder.third_party(Arc::new(HttpThirdPartySource::new(
            tp.name.clone(),
            tp.endpoint.clone(),
        )?)),
        ThirdPartyKind::None => builder,
    };

    builder.build()
}

/// HTTP routes over `service`
pub fn router(service: Arc<ObjectService>, max_object_size: usize) -> Router {
    Router::new()
        .route("/health", get(s3::health_check))
        .route("/api/v1/stats", get(s3::get_stats))
        .route("/api/v1/search", get(s3::search_objects))
        .route("/api/v1/objects", get(s3::list_records))
        .route("/api/v1/export", get(s3::export_metadata))
        .route("/api/v1/import", post(s3::import_metadata))
        .route("/{bucket}", get(s3::list_objects))
        .route(
            "/{bucket}/{*key}",
            put(s3::put_object)
                .get(s3::get_object)
                .head(s3::head_object)
                .delete(s3::delete_object),
        )
        .layer(DefaultBodyLimit::max(max_object_size))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::{CONTENT_MD5_HEX, ImportResponse, ListBucketResult, READ_SOURCE, S3Error, UploadResponse};
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use axum::response::Response;
    use replistore_common::{ContentHash, NodeConfig, ObjectRecord};
    use replistore_storage::StorageNode;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.path().to_path_buf();
        config.storage.nodes = ["stg1", "stg2", "stg3"]
            .into_iter()
            .map(|id| NodeConfig {
                id: id.to_string(),
                path: dir.path().join(id),
            })
            .collect();
        config.metadata.path = dir.path().join("metadata.redb");
        config.third_party.latency_ms = 0;
        config.queue.capacity = 16;
        config
    }

    async fn started(dir: &TempDir) -> Gateway {
        let gateway = Gateway::from_config(&test_config(dir)).await.unwrap();
        gateway.start().unwrap();
        gateway
    }

    async fn send(router: &Router, method: Method, uri: &str, body: impl Into<Body>) -> Response {
        router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(body.into())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.storage.nodes.clear();
        assert!(Gateway::from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_put_get_head_delete() {
        let dir = TempDir::new().unwrap();
        let gateway = started(&dir).await;
        let app = gateway.router();

        let put = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/photos/2024/cat.txt")
                    .header(header::CONTENT_TYPE, "text/plain")
                    .body(Body::from("meow"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);
        let hash = ContentHash::compute(b"meow").to_hex();
        assert_eq!(
            put.headers().get(header::ETAG).unwrap(),
            format!("\"{hash}\"").as_str()
        );
        let uploaded: UploadResponse = serde_json::from_slice(&body_bytes(put).await).unwrap();
        assert!(uploaded.success);
        assert_eq!(uploaded.key, "photos/2024/cat.txt");
        assert_eq!(uploaded.size, 4);
        assert_eq!(uploaded.md5_hash, hash);

        let get = send(&app, Method::GET, "/photos/2024/cat.txt", Body::empty()).await;
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(get.headers().get(header::CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(get.headers().get(READ_SOURCE).unwrap(), "primary");
        assert_eq!(body_bytes(get).await, b"meow");

        let head = send(&app, Method::HEAD, "/photos/2024/cat.txt", Body::empty()).await;
        assert_eq!(head.status(), StatusCode::OK);
        assert_eq!(head.headers().get(header::CONTENT_LENGTH).unwrap(), "4");

        let delete = send(&app, Method::DELETE, "/photos/2024/cat.txt", Body::empty()).await;
        assert_eq!(delete.status(), StatusCode::NO_CONTENT);

        let missing = send(&app, Method::GET, "/photos/2024/cat.txt", Body::empty()).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        let err: S3Error = serde_json::from_slice(&body_bytes(missing).await).unwrap();
        assert_eq!(err.code, "NoSuchKey");

        let again = send(&app, Method::DELETE, "/photos/2024/cat.txt", Body::empty()).await;
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        gateway.stop().await;
        for node in gateway.service().manager().nodes() {
            assert!(node.read("photos/2024/cat.txt").await.is_err());
        }
    }

    #[tokio::test]
    async fn test_put_with_mismatched_md5_is_bad_digest() {
        let dir = TempDir::new().unwrap();
        let gateway = started(&dir).await;
        let app = gateway.router();

        let wrong = ContentHash::compute(b"something else").to_hex();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/b/obj1")
                    .header(CONTENT_MD5_HEX, wrong)
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let err: S3Error = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(err.code, "BadDigest");

        let malformed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::PUT)
                    .uri("/b/obj1")
                    .header(CONTENT_MD5_HEX, "not-hex")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

        let get = send(&app, Method::GET, "/b/obj1", Body::empty()).await;
        assert_eq!(get.status(), StatusCode::NOT_FOUND);
        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_get_falls_back_to_third_party_and_heals() {
        let dir = TempDir::new().unwrap();
        let gateway = started(&dir).await;
        let app = gateway.router();

        send(&app, Method::PUT, "/b/obj1", "hello").await;
        let primary = Arc::clone(gateway.service().manager().primary().unwrap());
        primary.delete("b/obj1").await.unwrap();

        let get = send(&app, Method::GET, "/b/obj1", Body::empty()).await;
        assert_eq!(get.status(), StatusCode::OK);
        assert_eq!(get.headers().get(READ_SOURCE).unwrap(), "third-party");
        assert_eq!(
            get.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/octet-stream"
        );
        assert_eq!(
            body_bytes(get).await,
            MockThirdPartySource::payload_for("b/obj1").as_bytes()
        );

        assert!(primary.read("b/obj1").await.is_ok());
        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_list_bucket_strips_prefix() {
        let dir = TempDir::new().unwrap();
        let gateway = started(&dir).await;
        let app = gateway.router();

        for key in ["b/a.txt", "b/docs/x.txt", "b/docs/y.txt", "other/z.txt"] {
            let put = send(&app, Method::PUT, &format!("/{key}"), "data").await;
            assert_eq!(put.status(), StatusCode::OK);
        }

        let all = send(&app, Method::GET, "/b", Body::empty()).await;
        let list: ListBucketResult = serde_json::from_slice(&body_bytes(all).await).unwrap();
        let keys: Vec<_> = list.contents.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["a.txt", "docs/x.txt", "docs/y.txt"]);
        assert!(list.contents.iter().all(|e| e.storage_class == "STANDARD"));

        let page = send(&app, Method::GET, "/b?prefix=docs/&max-keys=1", Body::empty()).await;
        let list: ListBucketResult = serde_json::from_slice(&body_bytes(page).await).unwrap();
        assert_eq!(list.key_count, 1);
        assert_eq!(list.contents[0].key, "docs/x.txt");
        gateway.stop().await;
    }

    #[tokio::test]
    async fn test_management_api() {
        let dir = TempDir::new().unwrap();
        let gateway = started(&dir).await;
        let app = gateway.router();

        send(&app, Method::PUT, "/b/report.pdf", "pdf").await;
        send(&app, Method::PUT, "/b/notes.txt", "txt").await;

        let health = send(&app, Method::GET, "/health", Body::empty()).await;
        assert_eq!(health.status(), StatusCode::OK);

        let stats = send(&app, Method::GET, "/api/v1/stats", Body::empty()).await;
        let stats: serde_json::Value = serde_json::from_slice(&body_bytes(stats).await).unwrap();
        assert_eq!(stats["metadata"]["total_objects"], 2);
        assert_eq!(stats["primary"], "stg1");
        assert_eq!(stats["queue"]["worker_count"], 2);

        let search = send(&app, Method::GET, "/api/v1/search?q=REPORT", Body::empty()).await;
        let found: Vec<ObjectRecord> = serde_json::from_slice(&body_bytes(search).await).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "b/report.pdf");

        let empty_query = send(&app, Method::GET, "/api/v1/search", Body::empty()).await;
        assert_eq!(empty_query.status(), StatusCode::BAD_REQUEST);

        let pattern = send(&app, Method::GET, "/api/v1/objects?pattern=*.txt", Body::empty()).await;
        let matched: Vec<ObjectRecord> = serde_json::from_slice(&body_bytes(pattern).await).unwrap();
        assert_eq!(matched.len(), 1);

        let export = send(&app, Method::GET, "/api/v1/export", Body::empty()).await;
        let exported = body_bytes(export).await;
        let records: Vec<ObjectRecord> = serde_json::from_slice(&exported).unwrap();
        assert_eq!(records.len(), 2);

        // Import into a fresh gateway
        let other_dir = TempDir::new().unwrap();
        let other = started(&other_dir).await;
        let import = send(&other.router(), Method::POST, "/api/v1/import", exported).await;
        assert_eq!(import.status(), StatusCode::OK);
        let imported: ImportResponse = serde_json::from_slice(&body_bytes(import).await).unwrap();
        assert_eq!(imported.imported, 2);
        assert!(other.service().head_object("b/notes.txt").is_ok());

        gateway.stop().await;
        other.stop().await;
    }

    #[tokio::test]
    async fn test_body_limit() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.server.max_object_size = 8;
        let gateway = Gateway::from_config(&config).await.unwrap();
        gateway.start().unwrap();

        let response = send(&gateway.router(), Method::PUT, "/b/big", vec![0u8; 64]).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        gateway.stop().await;
    }
}
