use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::SharedState;

/// Serve the built operator/viewer app. Unknown paths get `index.html` so client-side
/// routes such as `/viewer` survive a reload.
pub fn router(static_dir: &Path) -> Router<SharedState> {
    Router::new()
        .route_service("/operator", ServeFile::new(static_dir.join("index.html")))
        .fallback_service(web_app_service(static_dir))
}

/// Static files under `static_dir`, falling back to its `index.html`.
pub fn web_app_service(static_dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };

    use super::*;

    async fn get(service: &mut ServeDir<ServeFile>, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = service.try_call(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(Body::new(response.into_body()), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn assets_are_served_and_other_paths_get_the_app_shell() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<div id=\"root\"></div>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log('timing')").unwrap();
        let mut service = web_app_service(dir.path());

        assert_eq!(
            get(&mut service, "/app.js").await,
            (StatusCode::OK, "console.log('timing')".to_string())
        );
        assert_eq!(
            get(&mut service, "/viewer/results").await,
            (StatusCode::OK, "<div id=\"root\"></div>".to_string())
        );
    }
}
