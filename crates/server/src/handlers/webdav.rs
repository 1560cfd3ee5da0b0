//! WebDAV endpoints under `/webdav`.
//!
//! Dispatches on the raw method name: PROPFIND, MKCOL, COPY, and MOVE are
//! not expressible as axum method routers, so `/webdav/{*path}` is routed
//! with `any()` to this handler.

use super::files::{ENCODE_SET, send_download};
use crate::error::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use hyperfs_metadata::MetadataError;
use hyperfs_metadata::NodeRow;
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

/// Dispatch a `/webdav/...` request by method name.
pub async fn webdav_dispatch(State(state): State<AppState>, req: Request) -> Response {
    let raw_path = req.uri().path();
    let rel = raw_path.strip_prefix("/webdav").unwrap_or(raw_path);
    let rel = match percent_decode_str(rel).decode_utf8() {
        Ok(decoded) => {
            let s = decoded.to_string();
            if s.is_empty() { "/".to_string() } else { s }
        }
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let (parts, body) = req.into_parts();
    tracing::info!(method = %parts.method, path = %rel, "webdav request");

    match parts.method.as_str() {
        "OPTIONS" => options_response(),
        "PROPFIND" => propfind(&state, &parts.headers, &rel)
            .await
            .unwrap_or_else(dav_error),
        "MKCOL" => mkcol(&state, &rel).await,
        "PUT" => put(&state, &rel, body).await,
        "GET" | "HEAD" => get(&state, &parts.headers, &parts.method, &rel).await,
        "DELETE" => delete(&state, &rel).await,
        "COPY" => copy_or_move(&state, &parts.headers, &rel, false).await,
        "MOVE" => copy_or_move(&state, &parts.headers, &rel, true).await,
        _ => StatusCode::NOT_IMPLEMENTED.into_response(),
    }
}

/// WebDAV error responses carry the mapped status code with an empty body.
fn dav_error(e: ApiError) -> Response {
    e.status_code().into_response()
}

fn options_response() -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        ALLOW,
        HeaderValue::from_static("OPTIONS, PROPFIND, MKCOL, GET, PUT, DELETE, COPY, MOVE"),
    );
    // Class 1 compliance
    headers.insert(HeaderName::from_static("dav"), HeaderValue::from_static("1"));
    (StatusCode::OK, headers).into_response()
}

async fn propfind(
    state: &AppState,
    headers: &HeaderMap,
    rel: &str,
) -> Result<Response, ApiError> {
    // Depth: infinity is not supported and is served as 1.
    let depth = headers
        .get("Depth")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .map(|s| {
            if s.eq_ignore_ascii_case("infinity") {
                1
            } else {
                s.parse::<u32>().unwrap_or(1)
            }
        })
        .unwrap_or(1)
        .min(1);

    let target = state.files.resolve_path(rel).await?;

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<D:multistatus xmlns:D=\"DAV:\">\n",
    );
    push_response(&mut xml, &target, rel);
    if target.is_folder && depth > 0 {
        for child in state.files.list(target.id).await? {
            let child_path = if rel.ends_with('/') {
                format!("{rel}{}", child.name)
            } else {
                format!("{rel}/{}", child.name)
            };
            push_response(&mut xml, &child, &child_path);
        }
    }
    xml.push_str("</D:multistatus>\n");

    Ok((
        StatusCode::MULTI_STATUS,
        [(CONTENT_TYPE, "application/xml; charset=utf-8")],
        xml,
    )
        .into_response())
}

async fn mkcol(state: &AppState, rel: &str) -> Response {
    let (parent, name) = match state.files.resolve_parent(rel).await {
        Ok(resolved) => resolved,
        // A missing intermediate collection is a conflict, not a 404
        Err(ApiError::NotFound(_)) => return StatusCode::CONFLICT.into_response(),
        Err(e) => return dav_error(e),
    };
    match state.files.create_folder(parent.id, &name).await {
        Ok(_) => StatusCode::CREATED.into_response(),
        // MKCOL on an existing resource
        Err(ApiError::Metadata(MetadataError::NameConflict(_))) => {
            StatusCode::METHOD_NOT_ALLOWED.into_response()
        }
        Err(e) => dav_error(e),
    }
}

async fn put(state: &AppState, rel: &str, body: Body) -> Response {
    if rel == "/" || rel.ends_with('/') {
        return StatusCode::BAD_REQUEST.into_response();
    }
    let (parent, filename) = match state.files.resolve_parent(rel).await {
        Ok(resolved) => resolved,
        Err(e) => return dav_error(e),
    };
    if !parent.is_folder {
        return StatusCode::CONFLICT.into_response();
    }

    let mut session = match state.files.start_upload().await {
        Ok(session) => session,
        Err(e) => return dav_error(e),
    };
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(_) => {
                session.abort().await;
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        if let Err(e) = session.process_chunk(&chunk).await {
            session.abort().await;
            return dav_error(e.into());
        }
    }

    match state.files.finish_upload(session, parent.id, &filename).await {
        Ok(_) => StatusCode::CREATED.into_response(),
        // The name is held by a collection
        Err(ApiError::Metadata(MetadataError::NameConflict(_))) => {
            StatusCode::CONFLICT.into_response()
        }
        Err(e) => dav_error(e),
    }
}

async fn get(state: &AppState, headers: &HeaderMap, method: &Method, rel: &str) -> Response {
    let node = match state.files.resolve_path(rel).await {
        Ok(node) => node,
        Err(e) => return dav_error(e),
    };
    if node.is_folder {
        // Clients browse collections with PROPFIND
        return StatusCode::BAD_REQUEST.into_response();
    }
    match send_download(state, node.id, headers, method, false).await {
        Ok(response) => response,
        Err(e) => dav_error(e),
    }
}

async fn delete(state: &AppState, rel: &str) -> Response {
    let node = match state.files.resolve_path(rel).await {
        Ok(node) => node,
        Err(e) => return dav_error(e),
    };
    match state.files.delete(node.id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => dav_error(e),
    }
}

/// COPY and MOVE share destination parsing and conflict mapping. COPY keeps
/// the source name under the destination's parent; MOVE honors the
/// destination leaf as a rename.
async fn copy_or_move(state: &AppState, headers: &HeaderMap, rel: &str, is_move: bool) -> Response {
    let Some(destination) = destination_path(headers) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let overwrite = headers
        .get("Overwrite")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().eq_ignore_ascii_case("T"))
        .unwrap_or(true);
    let strategy = if overwrite {
        hyperfs_core::ConflictStrategy::Overwrite
    } else {
        hyperfs_core::ConflictStrategy::Fail
    };

    if destination == "/" {
        return StatusCode::FORBIDDEN.into_response();
    }
    let destination = destination.trim_end_matches('/');

    let source = match state.files.resolve_path(rel).await {
        Ok(node) => node,
        Err(e) => return dav_error(e),
    };
    let (dest_parent, dest_leaf) = match state.files.resolve_parent(destination).await {
        Ok(resolved) => resolved,
        Err(e) => return dav_error(e),
    };
    if !dest_parent.is_folder {
        return StatusCode::CONFLICT.into_response();
    }

    let result = if is_move {
        state
            .files
            .move_node(source.id, dest_parent.id, Some(&dest_leaf), strategy)
            .await
            .map(|_| ())
    } else {
        state
            .files
            .copy_node(source.id, dest_parent.id, strategy)
            .await
            .map(|_| ())
    };

    match result {
        Ok(()) => {
            if is_move {
                StatusCode::CREATED.into_response()
            } else if overwrite {
                StatusCode::NO_CONTENT.into_response()
            } else {
                StatusCode::CREATED.into_response()
            }
        }
        // Conflict with Overwrite: F
        Err(ApiError::Metadata(MetadataError::NameConflict(_))) => {
            StatusCode::PRECONDITION_FAILED.into_response()
        }
        Err(ApiError::Metadata(MetadataError::BadTarget(_)))
        | Err(ApiError::Metadata(MetadataError::CycleForbidden(_))) => {
            StatusCode::CONFLICT.into_response()
        }
        Err(e) => dav_error(e),
    }
}

/// Parse the `Destination` header into a decoded catalog path: the path
/// component of the URI, URL-decoded, with the `/webdav` prefix stripped.
fn destination_path(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("Destination")?.to_str().ok()?;
    let path = if let Some(scheme_end) = raw.find("://") {
        let after_authority = &raw[scheme_end + 3..];
        match after_authority.find('/') {
            Some(idx) => &after_authority[idx..],
            None => "/",
        }
    } else {
        raw
    };
    let decoded = percent_decode_str(path).decode_utf8().ok()?.to_string();
    let stripped = decoded.strip_prefix("/webdav").unwrap_or(&decoded);
    Some(if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    })
}

/// Percent-encode a catalog path segment by segment for an href.
fn encode_href(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| utf8_percent_encode(segment, ENCODE_SET).to_string())
        .collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// getlastmodified is RFC 1123 in GMT; creationdate is ISO 8601.
fn format_times(upload_time_ms: i64) -> (String, String) {
    let ts = OffsetDateTime::from_unix_timestamp_nanos(upload_time_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let rfc1123 = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    let last_modified = ts.format(&rfc1123).unwrap_or_default();
    let creation_date = ts.format(&Rfc3339).unwrap_or_default();
    (last_modified, creation_date)
}

/// Append one `<D:response>` element for a node.
fn push_response(xml: &mut String, node: &NodeRow, path: &str) {
    let href = format!("/webdav{}", encode_href(path));
    let (last_modified, creation_date) = format_times(node.upload_time);

    xml.push_str("  <D:response>\n");
    xml.push_str(&format!("    <D:href>{}</D:href>\n", xml_escape(&href)));
    xml.push_str("    <D:propstat>\n");
    xml.push_str("      <D:prop>\n");
    xml.push_str(&format!(
        "        <D:displayname>{}</D:displayname>\n",
        xml_escape(&node.name)
    ));
    if node.is_folder {
        xml.push_str("        <D:resourcetype><D:collection/></D:resourcetype>\n");
    } else {
        xml.push_str("        <D:resourcetype/>\n");
        xml.push_str(&format!(
            "        <D:getcontentlength>{}</D:getcontentlength>\n",
            node.size
        ));
    }
    xml.push_str(&format!(
        "        <D:getlastmodified>{last_modified}</D:getlastmodified>\n"
    ));
    xml.push_str(&format!(
        "        <D:creationdate>{creation_date}</D:creationdate>\n"
    ));
    xml.push_str("      </D:prop>\n");
    xml.push_str("      <D:status>HTTP/1.1 200 OK</D:status>\n");
    xml.push_str("    </D:propstat>\n");
    xml.push_str("  </D:response>\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_path_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Destination",
            HeaderValue::from_static("http://localhost:8080/webdav/folder/file.txt"),
        );
        assert_eq!(destination_path(&headers).as_deref(), Some("/folder/file.txt"));

        headers.insert(
            "Destination",
            HeaderValue::from_static("/webdav/a%20b/c.txt"),
        );
        assert_eq!(destination_path(&headers).as_deref(), Some("/a b/c.txt"));

        headers.insert("Destination", HeaderValue::from_static("/webdav"));
        assert_eq!(destination_path(&headers).as_deref(), Some("/"));

        headers.remove("Destination");
        assert_eq!(destination_path(&headers), None);
    }

    #[test]
    fn test_encode_href_per_segment() {
        assert_eq!(encode_href("/a b/c d.txt"), "/a%20b/c%20d.txt");
        assert_eq!(encode_href("/"), "/");
    }

    #[test]
    fn test_format_times() {
        // 2021-01-01T00:00:00Z
        let (last_modified, creation) = format_times(1_609_459_200_000);
        assert_eq!(last_modified, "Fri, 01 Jan 2021 00:00:00 GMT");
        assert_eq!(creation, "2021-01-01T00:00:00Z");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("a<b>&\"c\""), "a&lt;b&gt;&amp;&quot;c&quot;");
    }
}
