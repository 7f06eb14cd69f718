use axum::Json;
use axum::http::HeaderMap;
use hyper::StatusCode;
use serde_json::{Value, json};

use crate::store::User;
use crate::store::repository::MetadataStore;

/// Names the acting user. Whatever authenticates the transport sets it.
pub const PRINCIPAL_HEADER: &str = "x-pullreq-user";

/// Look up the user named by [`PRINCIPAL_HEADER`]. Missing or unknown is 401.
pub(crate) async fn principal(
    store: &dyn MetadataStore,
    headers: &HeaderMap,
) -> Result<User, (StatusCode, Json<Value>)> {
    let unauthorized = |msg: &str| (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg })));

    let name = headers
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| unauthorized("missing principal"))?;

    match store.get_user_by_name(name).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => {
            tracing::info!(principal = %name, "unknown principal");
            Err(unauthorized("unknown principal"))
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to look up principal");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("failed to look up principal: {e}") })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pulls::testing::world;

    fn headers(name: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(PRINCIPAL_HEADER, name.parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn resolves_known_user_case_insensitively() {
        let w = world().await;
        let user = principal(&*w.store, &headers("Bob")).await.unwrap();
        assert_eq!(user.id, w.bob.id);
    }

    #[tokio::test]
    async fn missing_or_unknown_is_unauthorized() {
        let w = world().await;
        let (status, _) = principal(&*w.store, &HeaderMap::new()).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, Json(body)) = principal(&*w.store, &headers("ghost")).await.unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unknown principal");
    }
}
