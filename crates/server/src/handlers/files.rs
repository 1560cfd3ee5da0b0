//! Control endpoints: list, upload, download, and namespace mutations.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Query, Request, State};
use axum::http::header::{
    ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, RANGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use hyperfs_core::{ConflictStrategy, MAX_CONTROL_BODY_SIZE};
use hyperfs_metadata::NodeRow;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Percent-encoding set for header values and hrefs: everything except
/// unreserved characters. Spaces become `%20`, never `+`.
pub(crate) const ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'_')
    .remove(b'~');

/// Fallback name when the upload query omits `filename`.
const DEFAULT_FILENAME: &str = "unknown";

/// Wire representation of a catalog node.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub id: i64,
    pub parent_id: i64,
    pub name: String,
    pub is_folder: u8,
    pub hash: Option<String>,
    pub size: i64,
    pub upload_time: i64,
    pub download_count: i64,
}

impl From<NodeRow> for NodeDto {
    fn from(node: NodeRow) -> Self {
        Self {
            id: node.id,
            parent_id: node.parent_id,
            name: node.name,
            is_folder: node.is_folder as u8,
            hash: node.digest,
            size: node.size,
            upload_time: node.upload_time,
            download_count: node.download_count,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    parent_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct IdParams {
    id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    parent_id: Option<i64>,
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderParams {
    parent_id: Option<i64>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveRequest {
    id: i64,
    target_parent_id: i64,
    strategy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameRequest {
    id: i64,
    name: String,
}

/// Aggregate and parse a JSON request body, bounded by the control-body cap.
async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_CONTROL_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

fn parse_strategy(raw: Option<&str>) -> ApiResult<ConflictStrategy> {
    match raw {
        None => Ok(ConflictStrategy::Fail),
        Some(s) => Ok(s.parse()?),
    }
}

/// GET /list?parentId=N - JSON array of children.
pub async fn list_children(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<NodeDto>>> {
    let parent_id = params.parent_id.unwrap_or(hyperfs_core::ROOT_ID);
    let children = state.files.list(parent_id).await?;
    Ok(Json(children.into_iter().map(NodeDto::from).collect()))
}

/// GET|HEAD /download?id=N - file bytes, honoring `Range`.
pub async fn download(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
    method: Method,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = params
        .id
        .ok_or_else(|| ApiError::BadRequest("Missing id parameter".to_string()))?;
    send_download(&state, id, &headers, &method, true).await
}

/// POST /upload?parentId=N&filename=X - raw body streamed into a session,
/// then committed.
pub async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    req: Request,
) -> ApiResult<Response> {
    let parent_id = params.parent_id.unwrap_or(hyperfs_core::ROOT_ID);
    let filename = params.filename.as_deref().unwrap_or(DEFAULT_FILENAME);

    let mut session = state.files.start_upload().await?;
    let mut body = req.into_body().into_data_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                session.abort().await;
                return Err(ApiError::Internal(format!("failed to read body: {e}")));
            }
        };
        if let Err(e) = session.process_chunk(&chunk).await {
            session.abort().await;
            return Err(e.into());
        }
    }

    state.files.finish_upload(session, parent_id, filename).await?;
    Ok((StatusCode::CREATED, "").into_response())
}

/// POST /delete?id=N - delete a node and its subtree.
pub async fn delete_node(
    State(state): State<AppState>,
    Query(params): Query<IdParams>,
) -> ApiResult<Response> {
    let id = params
        .id
        .ok_or_else(|| ApiError::BadRequest("Missing id parameter".to_string()))?;
    state.files.delete(id).await?;
    Ok((StatusCode::OK, "Deletion successful").into_response())
}

/// POST /folder?parentId=N&name=X - create a folder, returning its id.
pub async fn create_folder(
    State(state): State<AppState>,
    Query(params): Query<FolderParams>,
) -> ApiResult<Response> {
    let parent_id = params.parent_id.unwrap_or(hyperfs_core::ROOT_ID);
    let name = params.name.as_deref().unwrap_or("New Folder");
    let id = state.files.create_folder(parent_id, name).await?;
    Ok((StatusCode::OK, id.to_string()).into_response())
}

/// POST /move - JSON `{id, targetParentId, strategy?}`.
pub async fn move_node(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let body: MoveRequest = read_json(req).await?;
    let strategy = parse_strategy(body.strategy.as_deref())?;
    tracing::info!(id = body.id, target = body.target_parent_id, %strategy, "move request");
    state
        .files
        .move_node(body.id, body.target_parent_id, None, strategy)
        .await?;
    Ok((StatusCode::OK, "Move successful").into_response())
}

/// POST /rename - JSON `{id, name}`.
pub async fn rename_node(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let body: RenameRequest = read_json(req).await?;
    tracing::info!(id = body.id, name = %body.name, "rename request");
    state.files.rename(body.id, &body.name).await?;
    Ok((StatusCode::OK, "Rename successful").into_response())
}

/// POST /copy - JSON `{id, targetParentId, strategy?}`.
pub async fn copy_node(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let body: MoveRequest = read_json(req).await?;
    let strategy = parse_strategy(body.strategy.as_deref())?;
    tracing::info!(id = body.id, target = body.target_parent_id, %strategy, "copy request");
    state
        .files
        .copy_node(body.id, body.target_parent_id, strategy)
        .await?;
    Ok((StatusCode::OK, "Copy successful").into_response())
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Error: Not Found").into_response()
}

/// Build a download response for a file node, shared by `/download` and
/// WebDAV `GET`.
pub(crate) async fn send_download(
    state: &AppState,
    id: i64,
    headers: &HeaderMap,
    method: &Method,
    as_attachment: bool,
) -> ApiResult<Response> {
    let download = state.files.prepare_download(id).await?;
    let range = parse_range(headers.get(RANGE), download.size)?;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/octet-stream"));
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if as_attachment {
        let encoded = utf8_percent_encode(&download.name, ENCODE_SET).to_string();
        let value = format!("attachment; filename*=UTF-8''{encoded}");
        response_headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_str(&value)
                .map_err(|_| ApiError::Internal("unencodable filename".to_string()))?,
        );
    }

    let (status, start, length) = match range {
        Some((start, end)) => {
            let value = format!("bytes {start}-{end}/{}", download.size);
            response_headers.insert(
                CONTENT_RANGE,
                HeaderValue::from_str(&value)
                    .map_err(|_| ApiError::Internal("invalid content-range".to_string()))?,
            );
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
        None => (StatusCode::OK, 0, download.size),
    };
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    if *method == Method::HEAD {
        return Ok((status, response_headers).into_response());
    }

    let stream = if status == StatusCode::PARTIAL_CONTENT {
        state.blobs.read_range(&download.digest, start, length).await?
    } else {
        state.blobs.read(&download.digest).await?
    };
    Ok((status, response_headers, Body::from_stream(stream)).into_response())
}

/// Parse a `Range` header against the blob size.
///
/// Returns `None` for absent or unparseable headers (full-body 200), the
/// inclusive byte window for a satisfiable range, and an error mapped to 416
/// for syntactically valid but unsatisfiable ones.
fn parse_range(header: Option<&HeaderValue>, size: u64) -> ApiResult<Option<(u64, u64)>> {
    let Some(value) = header else { return Ok(None) };
    let Ok(value) = value.to_str() else { return Ok(None) };
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Ok(None);
    };
    let spec = spec.trim();
    if spec.is_empty() || spec.contains(',') {
        return Ok(None);
    }

    let (start, explicit_end) = if let Some(suffix) = spec.strip_prefix('-') {
        // bytes=-n: the last n bytes
        let Ok(n) = suffix.parse::<u64>() else {
            return Ok(None);
        };
        (size.saturating_sub(n), None)
    } else {
        let Some((a, b)) = spec.split_once('-') else {
            return Ok(None);
        };
        let Ok(start) = a.parse::<u64>() else {
            return Ok(None);
        };
        let explicit_end = if b.is_empty() {
            None
        } else {
            match b.parse::<u64>() {
                Ok(end) => Some(end),
                Err(_) => return Ok(None),
            }
        };
        (start, explicit_end)
    };

    if start >= size {
        return Err(ApiError::RangeNotSatisfiable { size });
    }
    let end = match explicit_end {
        Some(end) => {
            if end >= size || start > end {
                return Err(ApiError::RangeNotSatisfiable { size });
            }
            end
        }
        None => size - 1,
    };
    Ok(Some((start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(value: &str, size: u64) -> ApiResult<Option<(u64, u64)>> {
        let value = HeaderValue::from_str(value).unwrap();
        parse_range(Some(&value), size)
    }

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(range("bytes=0-99", 1000).unwrap(), Some((0, 99)));
        assert_eq!(range("bytes=500-", 1000).unwrap(), Some((500, 999)));
        assert_eq!(range("bytes=-100", 1000).unwrap(), Some((900, 999)));
        // Suffix longer than the file clamps to the start
        assert_eq!(range("bytes=-5000", 1000).unwrap(), Some((0, 999)));
    }

    #[test]
    fn test_parse_range_unsatisfiable() {
        assert!(matches!(
            range("bytes=1000-", 1000),
            Err(ApiError::RangeNotSatisfiable { size: 1000 })
        ));
        assert!(matches!(
            range("bytes=0-1000", 1000),
            Err(ApiError::RangeNotSatisfiable { .. })
        ));
        assert!(matches!(
            range("bytes=9-5", 1000),
            Err(ApiError::RangeNotSatisfiable { .. })
        ));
        assert!(matches!(
            range("bytes=-0", 1000),
            Err(ApiError::RangeNotSatisfiable { .. })
        ));
        assert!(matches!(
            range("bytes=0-0", 0),
            Err(ApiError::RangeNotSatisfiable { size: 0 })
        ));
    }

    #[test]
    fn test_parse_range_unparseable_falls_back_to_full() {
        assert_eq!(range("bytes=abc-def", 1000).unwrap(), None);
        assert_eq!(range("octets=0-10", 1000).unwrap(), None);
        assert_eq!(range("bytes=0-10,20-30", 1000).unwrap(), None);
        assert_eq!(range("bytes=", 1000).unwrap(), None);
        assert_eq!(parse_range(None, 1000).unwrap(), None);
    }

    #[test]
    fn test_filename_encoding_uses_percent20() {
        let encoded = utf8_percent_encode("my file.txt", ENCODE_SET).to_string();
        assert_eq!(encoded, "my%20file.txt");
        let encoded = utf8_percent_encode("说明.pdf", ENCODE_SET).to_string();
        assert!(!encoded.contains('+'));
        assert!(encoded.ends_with(".pdf"));
    }
}
