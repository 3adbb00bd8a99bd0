//! Auxiliary web view — a small read/delete HTTP surface over the catalog,
//! independent of the FUSE mount and never touching the drive lock.
//!
//! Grounded on `original_source/tapevault.py`'s Flask routes (`index`,
//! `browse`, `delete_tape`, `api_files`), rebuilt with `axum` rather than
//! the teacher's low-level `hyper` 0.14 server, since this surface has no
//! equivalent in the teacher repo to imitate directly and axum is the
//! modern idiomatic choice other repos in the pack reach for on top of the
//! same `tokio` runtime the teacher already depends on.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use log::info;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::catalog::CatalogStore;

#[derive(Clone)]
struct AppState {
    catalog: Arc<Mutex<CatalogStore>>,
}

#[derive(Deserialize)]
struct PrefixQuery {
    #[serde(default)]
    prefix: String,
}

/// Build the router, given shared access to the catalog.
pub fn router(catalog: Arc<Mutex<CatalogStore>>) -> Router {
    let state = AppState { catalog };
    Router::new()
        .route("/", get(index))
        .route("/browse/:volume_tag", get(browse))
        .route("/api/tapes/:volume_tag/files", get(api_files))
        .route("/tapes/:volume_tag/delete", post(delete_tape))
        .with_state(state)
}

/// Serve the web view on `port` until the process exits.
pub async fn serve(catalog: Arc<Mutex<CatalogStore>>, port: u16) -> std::io::Result<()> {
    let app = router(catalog);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("web view listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.catalog.lock().await;
    let tapes = match catalog.list_tapes() {
        Ok(tapes) => tapes,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("<p>catalog error: {err}</p>")),
            )
        }
    };

    let mut body = String::from("<h1>TapeVault</h1><ul>");
    for tape in tapes {
        body.push_str(&format!(
            "<li><a href=\"/browse/{tag}\">{tag}</a> — {free} / {total} bytes free</li>",
            tag = tape.volume_tag,
            free = tape.free_space,
            total = tape.total_space,
        ));
    }
    body.push_str("</ul>");
    (StatusCode::OK, Html(body))
}

async fn browse(
    State(state): State<AppState>,
    AxumPath(volume_tag): AxumPath<String>,
    Query(query): Query<PrefixQuery>,
) -> impl IntoResponse {
    let catalog = state.catalog.lock().await;
    match catalog.files_for_tape(&volume_tag, &query.prefix) {
        Ok(files) => {
            let mut body = format!("<h1>{volume_tag}</h1><ul>");
            for file in files {
                body.push_str(&format!("<li>{} ({} bytes)</li>", file.path, file.size));
            }
            body.push_str("</ul>");
            (StatusCode::OK, Html(body))
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(format!("<p>catalog error: {err}</p>")),
        ),
    }
}

async fn api_files(
    State(state): State<AppState>,
    AxumPath(volume_tag): AxumPath<String>,
    Query(query): Query<PrefixQuery>,
) -> impl IntoResponse {
    let catalog = state.catalog.lock().await;
    match catalog.files_for_tape(&volume_tag, &query.prefix) {
        Ok(files) => Json(files).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn delete_tape(
    State(state): State<AppState>,
    AxumPath(volume_tag): AxumPath<String>,
) -> impl IntoResponse {
    let mut catalog = state.catalog.lock().await;
    match catalog.drop_tape(&volume_tag) {
        Ok(()) => {
            info!("dropped tape {volume_tag} from catalog via web view");
            StatusCode::NO_CONTENT
        }
        Err(err) => {
            log::error!("failed to drop tape {volume_tag}: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn seeded_catalog() -> Arc<Mutex<CatalogStore>> {
        let mut store = CatalogStore::open_in_memory().unwrap();
        store
            .replace_tape_contents(
                "VOL001",
                1,
                1000,
                400,
                vec![("data/a.bin".to_string(), 100, 1)],
            )
            .unwrap();
        Arc::new(Mutex::new(store))
    }

    #[tokio::test]
    async fn index_lists_tapes() {
        let app = router(seeded_catalog());
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_files_returns_json() {
        let app = router(seeded_catalog());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/tapes/VOL001/files")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_tape_removes_it() {
        let catalog = seeded_catalog();
        let app = router(catalog.clone());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tapes/VOL001/delete")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(catalog.lock().await.list_volume_tags().unwrap().is_empty());
    }
}
