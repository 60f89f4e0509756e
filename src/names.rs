//! Display-name lookups against the internal master service, cached for `NAME_CACHE_TTL`.
//! Best effort: any failure yields `None` and nothing is cached.

use crate::cache::TtlCache;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
struct NamedObject {
    name: Option<String>,
}

pub struct NameResolver {
    http: reqwest::Client,
    base_url: String,
    cache: TtlCache<String>,
}

impl NameResolver {
    pub fn new(base_url: impl Into<String>, timeout: Duration, ttl: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(NameResolver {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: TtlCache::new(ttl),
        })
    }

    /// Name of object `id` of `kind` (e.g. `buildings`, `floors`, `units`, `sites`).
    /// The caller's `Authorization` header is forwarded unchanged.
    pub async fn resolve(&self, kind: &str, id: Option<i64>, authorization: Option<&str>) -> Option<String> {
        let id = id.filter(|id| *id != 0)?;
        let cache_key = format!("name:{}:{}", kind, id);
        if let Some(name) = self.cache.get(&cache_key) {
            return Some(name);
        }

        let url = format!("{}/api/{}/{}/", self.base_url, kind, id);
        let mut request = self.http.get(&url).header(reqwest::header::ACCEPT, "application/json");
        if let Some(auth) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, auth);
        }
        let resp = match request.send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => resp,
            Ok(resp) => {
                tracing::debug!(url = %url, status = resp.status().as_u16(), "name lookup returned non-200");
                return None;
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "name lookup failed");
                return None;
            }
        };
        let name = resp
            .json::<NamedObject>()
            .await
            .ok()?
            .name
            .filter(|n| !n.is_empty())?;
        self.cache.insert(cache_key, name.clone());
        Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, http::HeaderMap, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_master(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new().route(
            "/api/:kind/:id/",
            get(move |Path((kind, id)): Path<(String, i64)>, headers: HeaderMap| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    if headers.get("authorization").map(|v| v.as_bytes()) != Some(b"Bearer t".as_slice()) {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    if id == 404 {
                        return Err(StatusCode::NOT_FOUND);
                    }
                    Ok(Json(json!({ "id": id, "name": format!("{kind}-{id}") })))
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_master(hits.clone()).await;
        let names = NameResolver::new(base, Duration::from_secs(5), Duration::from_secs(600)).unwrap();

        assert_eq!(names.resolve("buildings", Some(7), Some("Bearer t")).await.as_deref(), Some("buildings-7"));
        assert_eq!(names.resolve("buildings", Some(7), Some("Bearer t")).await.as_deref(), Some("buildings-7"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_are_none_and_not_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = spawn_master(hits.clone()).await;
        let names = NameResolver::new(base, Duration::from_secs(5), Duration::from_secs(600)).unwrap();

        assert_eq!(names.resolve("floors", None, Some("Bearer t")).await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert_eq!(names.resolve("floors", Some(404), Some("Bearer t")).await, None);
        assert_eq!(names.resolve("floors", Some(404), Some("Bearer t")).await, None);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert_eq!(names.resolve("floors", Some(1), None).await, None);
    }
}
