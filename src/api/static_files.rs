use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use mime_guess::from_path;

use crate::assets::Assets;

/// UTF-8 contents of an embedded asset
pub fn embedded_text(path: &str) -> Option<String> {
    let file = Assets::get(path)?;
    String::from_utf8(file.data.into_owned()).ok()
}

/// Serve an embedded asset with a content type guessed from its name
pub fn serve_embedded(path: &str) -> Response {
    match Assets::get(path) {
        Some(content) => {
            let mime = from_path(path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref().to_string())],
                content.data.into_owned(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
    }
}
