use std::path::PathBuf;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_status::SetStatus;

/// Serve a built single-page frontend, falling back to `index.html` so
/// client-side routes such as `/view/:id` resolve.
pub fn spa_service(dist: &str) -> ServeDir<SetStatus<ServeFile>> {
    let dist = PathBuf::from(dist);
    let index = dist.join("index.html");
    ServeDir::new(dist).not_found_service(ServeFile::new(index))
}
