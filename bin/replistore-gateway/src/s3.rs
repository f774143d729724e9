//! S3-style API handlers
//!
//! Object routes follow the S3 path layout (`/{bucket}/{*key}`); management
//! routes live under `/api/v1`. Errors are rendered as JSON bodies carrying
//! the S3 error code.

use crate::service::ObjectService;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use replistore_common::{BlobObject, ContentHash, Error, ObjectKey, ObjectRecord};
use replistore_meta_store::MetadataStats;
use replistore_queue::PoolStats;
use replistore_storage::ReadSource;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Header carrying the client's hex MD5 of the request body
pub const CONTENT_MD5_HEX: &str = "x-amz-content-md5hex";

/// Header reporting where a GET was served from
pub const READ_SOURCE: &str = "x-replistore-read-source";

const DEFAULT_MAX_KEYS: usize = 1000;
const DEFAULT_PAGE_SIZE: usize = 100;

pub type AppState = Arc<ObjectService>;

// ============================================================================
// Response types
// ============================================================================

/// Error body
#[derive(Debug, Serialize, Deserialize)]
pub struct S3Error {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    pub request_id: String,
}

impl S3Error {
    fn json_response(err: &Error, resource: Option<&str>) -> Response {
        let status =
            StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request for {} failed: {}", resource.unwrap_or("-"), err);
        } else {
            debug!("Request for {} rejected: {}", resource.unwrap_or("-"), err);
        }

        let body = S3Error {
            code: err.s3_error_code().to_string(),
            message: err.to_string(),
            resource: resource.map(str::to_string),
            request_id: Uuid::new_v4().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Successful PUT body
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub object_id: String,
    pub key: String,
    pub size: u64,
    pub md5_hash: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    #[serde(rename = "max-keys")]
    pub max_keys: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub max_keys: usize,
    pub key_count: usize,
    pub contents: Vec<ObjectEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub storage_class: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RecordListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    /// Comma separated keys; all records when absent
    pub keys: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    pub imported: usize,
}

#[derive(Debug, Serialize)]
pub struct GatewayStats {
    pub nodes: Vec<String>,
    pub primary: Option<String>,
    pub third_party: Option<String>,
    pub queue: PoolStats,
    pub metadata: MetadataStats,
}

fn etag(hash: &ContentHash) -> String {
    format!("\"{}\"", hash.to_hex())
}

fn http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn object_headers(record: &ObjectRecord) -> [(HeaderName, String); 4] {
    [
        (header::CONTENT_TYPE, record.content_type.clone()),
        (header::CONTENT_LENGTH, record.size.to_string()),
        (header::ETAG, etag(&record.content_hash)),
        (header::LAST_MODIFIED, http_date(&record.updated_at)),
    ]
}

// ============================================================================
// Object operations
// ============================================================================

/// PUT object
pub async fn put_object(
    State(service): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let key = match ObjectKey::in_bucket(&bucket, &key) {
        Ok(key) => key,
        Err(e) => return S3Error::json_response(&Error::from(e), Some(&format!("{bucket}/{key}"))),
    };
    let resource = key.as_str().to_string();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let object = match headers.get(CONTENT_MD5_HEX) {
        Some(value) => {
            let declared = value
                .to_str()
                .map_err(|e| Error::InvalidHash(e.to_string()))
                .and_then(|v| v.parse::<ContentHash>().map_err(|e| Error::InvalidHash(e.to_string())));
            match declared {
                Ok(hash) => BlobObject::with_declared_hash(key.as_str(), content_type, body, hash),
                Err(e) => return S3Error::json_response(&e, Some(&resource)),
            }
        }
        None => BlobObject::new(key.as_str(), content_type, body),
    };

    match service.execute_upload_flow(&object).await {
        Ok(outcome) => {
            let md5_hash = outcome.record.content_hash.to_hex();
            let response = UploadResponse {
                success: true,
                object_id: outcome.record.id.to_string(),
                key: outcome.record.key.clone(),
                size: outcome.record.size,
                md5_hash,
                message: "Object uploaded successfully".to_string(),
            };
            (
                StatusCode::OK,
                [(header::ETAG, etag(&outcome.record.content_hash))],
                Json(response),
            )
                .into_response()
        }
        // Every node rejecting the payload is a bad digest, not a server fault
        Err(Error::AllNodesFailed { last, .. }) if matches!(*last, Error::Integrity { .. }) => {
            S3Error::json_response(&last, Some(&resource))
        }
        Err(e) => S3Error::json_response(&e, Some(&resource)),
    }
}

/// GET object
pub async fn get_object(
    State(service): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let key = format!("{bucket}/{key}");
    match service.read_object(&key).await {
        Ok(read) => {
            let source = match read.source {
                ReadSource::Primary => "primary",
                ReadSource::ThirdParty => "third-party",
            };
            let object = read.object;
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, object.content_type().to_string()),
                    (header::ETAG, etag(&object.content_hash())),
                    (header::LAST_MODIFIED, http_date(&read.record.updated_at)),
                    (HeaderName::from_static(READ_SOURCE), source.to_string()),
                ],
                Body::from(object.payload().clone()),
            )
                .into_response()
        }
        Err(e) => S3Error::json_response(&e, Some(&key)),
    }
}

/// HEAD object, answered from metadata alone
pub async fn head_object(
    State(service): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let key = format!("{bucket}/{key}");
    match service.head_object(&key) {
        Ok(record) => (StatusCode::OK, object_headers(&record)).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            status.into_response()
        }
    }
}

/// DELETE object
pub async fn delete_object(
    State(service): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let key = format!("{bucket}/{key}");
    match service.delete_object(&key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => S3Error::json_response(&e, Some(&key)),
    }
}

// ============================================================================
// Bucket operations
// ============================================================================

/// GET bucket: list objects under the bucket in key order
pub async fn list_objects(
    State(service): State<AppState>,
    Path(bucket): Path<String>,
    Query(params): Query<ListObjectsParams>,
) -> Response {
    let prefix = params.prefix.unwrap_or_default();
    let max_keys = params.max_keys.unwrap_or(DEFAULT_MAX_KEYS);
    let bucket_prefix = format!("{bucket}/");

    let records = match service
        .metadata()
        .list_prefix(&format!("{bucket_prefix}{prefix}"), max_keys)
    {
        Ok(records) => records,
        Err(e) => return S3Error::json_response(&e, Some(&bucket)),
    };

    let contents: Vec<ObjectEntry> = records
        .into_iter()
        .map(|record| ObjectEntry {
            key: record
                .key
                .strip_prefix(&bucket_prefix)
                .unwrap_or(&record.key)
                .to_string(),
            size: record.size,
            last_modified: record.updated_at,
            etag: etag(&record.content_hash),
            storage_class: "STANDARD".to_string(),
        })
        .collect();

    Json(ListBucketResult {
        name: bucket,
        prefix,
        max_keys,
        key_count: contents.len(),
        contents,
    })
    .into_response()
}

// ============================================================================
// Management API
// ============================================================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Queue, metadata and topology statistics
pub async fn get_stats(State(service): State<AppState>) -> Response {
    let metadata = match service.metadata().stats() {
        Ok(stats) => stats,
        Err(e) => return S3Error::json_response(&e, None),
    };
    let manager = service.manager();
    Json(GatewayStats {
        nodes: manager.node_ids().iter().map(ToString::to_string).collect(),
        primary: manager.primary().map(|n| n.id().to_string()),
        third_party: manager.third_party_name().map(str::to_string),
        queue: service.queue_stats(),
        metadata,
    })
    .into_response()
}

pub async fn search_objects(
    State(service): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    if params.q.trim().is_empty() {
        return S3Error::json_response(&Error::invalid_argument("query parameter 'q' is required"), None);
    }
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    match service.metadata().search(&params.q, limit) {
        Ok(records) => Json(records).into_response(),
        Err(e) => S3Error::json_response(&e, None),
    }
}

/// Records newest first, or every record matching `pattern`
pub async fn list_records(
    State(service): State<AppState>,
    Query(params): Query<RecordListParams>,
) -> Response {
    let result = match params.pattern.as_deref() {
        Some(pattern) => service.metadata().find_by_pattern(pattern),
        None => service.metadata().list(
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            params.offset.unwrap_or(0),
        ),
    };
    match result {
        Ok(records) => Json(records).into_response(),
        Err(e) => S3Error::json_response(&e, None),
    }
}

pub async fn export_metadata(
    State(service): State<AppState>,
    Query(params): Query<ExportParams>,
) -> Response {
    let keys: Vec<String> = params
        .keys
        .as_deref()
        .map(|keys| {
            keys.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match service.metadata().export_json(&keys) {
        Ok(data) => ([(header::CONTENT_TYPE, "application/json")], data).into_response(),
        Err(e) => S3Error::json_response(&e, None),
    }
}

pub async fn import_metadata(State(service): State<AppState>, body: Bytes) -> Response {
    match service.metadata().import_json(&body) {
        Ok(imported) => Json(ImportResponse { imported }).into_response(),
        Err(e) => {
            warn!("Metadata import rejected: {}", e);
            S3Error::json_response(&e, None)
        }
    }
}
