use axum::{
    body::Body,
    http::{Request, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::Span;

pub async fn enrich_current_span_middleware(req: Request<Body>, next: Next) -> Response {
    let uri: &Uri = req.uri();

    let host = req
        .headers()
        .get("host")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let current_span = Span::current();

    current_span.record("http.uri", uri.path());
    current_span.record("http.host", host);
    if let Some(query) = uri.query() {
        current_span.record("http.query", query);
    }

    next.run(req).await
}

/// Redirect `/api/repos/a/b/pulls/` to `/api/repos/a/b/pulls`, keeping the query.
pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    match without_trailing_slash(req.uri()) {
        Some(target) => Redirect::permanent(&target).into_response(),
        None => next.run(req).await,
    }
}

fn without_trailing_slash(uri: &Uri) -> Option<String> {
    let path = uri.path().strip_suffix('/')?;
    if path.is_empty() {
        return None;
    }
    Some(match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_stripped() {
        let uri: Uri = "/api/repos/alice/widgets/pulls/".parse().unwrap();
        assert_eq!(
            without_trailing_slash(&uri).as_deref(),
            Some("/api/repos/alice/widgets/pulls")
        );
        let uri: Uri = "/health/?verbose=1".parse().unwrap();
        assert_eq!(
            without_trailing_slash(&uri).as_deref(),
            Some("/health?verbose=1")
        );
    }

    #[test]
    fn root_and_clean_paths_pass_through() {
        assert_eq!(without_trailing_slash(&"/".parse().unwrap()), None);
        assert_eq!(without_trailing_slash(&"/health".parse().unwrap()), None);
    }
}
