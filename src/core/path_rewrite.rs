use crate::config::models::PathRewrite;

/// Compute the path sent to the backend for an inbound path.
///
/// `LastSegment` turns `/api/executor/execute` into `/execute`, and keeps one parent segment
/// when it is listed, so `/api/executor/result/abc123` becomes `/result/abc123`. Paths with
/// fewer than three `/`-separated parts are forwarded unchanged.
pub fn rewrite_path(rule: &PathRewrite, path: &str) -> String {
    let keep_parent = match rule {
        PathRewrite::Passthrough => return path.to_string(),
        PathRewrite::LastSegment { keep_parent } => keep_parent,
    };

    // "/a/b" splits into ["", "a", "b"].
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 3 {
        return path.to_string();
    }

    let last = segments[segments.len() - 1];
    if segments.len() >= 4 {
        let parent = segments[segments.len() - 2];
        if keep_parent.iter().any(|kept| kept == parent) {
            return format!("/{parent}/{last}");
        }
    }
    format!("/{last}")
}
