//! Subcommand handlers. Each returns a JSON value for printing.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};
use tracing::warn;

use offlinecache_core::{
    CacheConfig, CacheManager, Clock, Deployment, FileStore, HttpClient, Partition, Request,
    Served, SystemClock,
};

use crate::Command;

/// How long a command waits for background revalidations before exiting.
const REVALIDATION_WAIT_SECS: u64 = 10;

/// Poll interval while waiting for background revalidations
const REVALIDATION_POLL_MS: u64 = 50;

pub async fn open_manager(config: CacheConfig, cache_dir: &Path) -> Result<CacheManager> {
    let store = Arc::new(FileStore::new(cache_dir.to_path_buf())?);
    let network = Arc::new(HttpClient::with_timeout(config.request_timeout())?);
    Ok(CacheManager::new(config, store, network, Arc::new(SystemClock)).await?)
}

pub async fn run(manager: &CacheManager, command: Command) -> Result<Value> {
    match command {
        Command::Fetch {
            url,
            method,
            headers,
            data,
        } => {
            let request = build_request(&method, &url, &headers, data)?;
            let served = manager.intercept(&request).await?;
            let output = served_json(&served);
            wait_for_revalidations(manager).await;
            Ok(output)
        }
        Command::Install {
            version,
            static_urls,
            dynamic_urls,
            api_urls,
            manifest,
        } => {
            let deployment = match manifest {
                Some(path) => {
                    let contents = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let mut deployment: Deployment = serde_json::from_str(&contents)
                        .with_context(|| format!("Invalid manifest {}", path.display()))?;
                    deployment.version = version;
                    deployment
                }
                None => {
                    let mut deployment = Deployment::new(&version);
                    for (partition, urls) in [
                        (Partition::Static, static_urls),
                        (Partition::Dynamic, dynamic_urls),
                        (Partition::Api, api_urls),
                    ] {
                        if !urls.is_empty() {
                            deployment.precache.insert(partition, urls);
                        }
                    }
                    deployment
                }
            };
            let state = manager.install(&deployment).await?;
            Ok(json!({
                "state": state,
                "active_generation": manager.active_generation().map(|g| g.0),
                "version": manager.active_version(),
            }))
        }
        Command::Message { json } => {
            let state = manager.handle_raw_message(json.as_bytes()).await?;
            Ok(json!({ "state": state }))
        }
        Command::SkipWaiting => {
            let state = manager.force_update().await?;
            Ok(json!({ "state": state }))
        }
        Command::Clear => {
            manager.clear_all().await?;
            Ok(json!({ "state": manager.lifecycle_state() }))
        }
        Command::Sync => {
            let report = manager.on_connectivity_restored().await?;
            Ok(json!({
                "completed": report.completed,
                "failed": report
                    .failed
                    .iter()
                    .map(|(tag, reason)| json!({ "tag": tag, "reason": reason }))
                    .collect::<Vec<_>>(),
                "pending": manager.pending_sync_tags(),
            }))
        }
        Command::Push { payload, action } => {
            let notification = manager.on_push(payload.as_bytes());
            let intent = action.map(|a| manager.on_notification_action(&a, &notification));
            Ok(json!({
                "notification": notification,
                "intent": intent,
            }))
        }
        Command::Status => {
            let mut partitions = serde_json::Map::new();
            for partition in Partition::ALL {
                let count = manager.cached_keys(partition).await?.len();
                partitions.insert(partition.to_string(), json!(count));
            }
            let generations: Vec<Value> = manager
                .generations()
                .iter()
                .map(|g| {
                    json!({
                        "id": g.id.0,
                        "version": g.version,
                        "status": g.status,
                        "created_at": g.created_at,
                        "activated_at": g.activated_at,
                    })
                })
                .collect();
            let sync: Vec<Value> = manager
                .sync_tasks()
                .iter()
                .map(|t| {
                    json!({
                        "tag": t.tag,
                        "method": t.request.method,
                        "url": t.request.url.as_str(),
                        "attempts": t.attempts,
                        "enqueued_at": t.enqueued_at,
                    })
                })
                .collect();
            Ok(json!({
                "state": manager.lifecycle_state(),
                "cache_name": manager.config().cache_name,
                "active_generation": manager.active_generation().map(|g| g.0),
                "generations": generations,
                "entries": partitions,
                "sync_queue": sync,
            }))
        }
    }
}

fn build_request(method: &str, url: &str, headers: &[String], data: Option<String>) -> Result<Request> {
    let mut request = Request::new(method, url)?;
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| anyhow!("Header must be `name: value`, got '{}'", header))?;
        if name.trim().is_empty() {
            bail!("Empty header name in '{}'", header);
        }
        request = request.with_header(name.trim(), value.trim());
    }
    if let Some(body) = data {
        request.body = body.into_bytes();
    }
    Ok(request)
}

fn served_json(served: &Served) -> Value {
    let body = match std::str::from_utf8(&served.response.body) {
        Ok(text) => json!(text),
        Err(_) => json!({ "binary_bytes": served.response.body.len() }),
    };
    json!({
        "status": served.response.status,
        "source": served.source,
        "class": served.class,
        "stored_at": served.stored_at,
        "age": served.age_display(SystemClock.now()),
        "headers": served.response.headers,
        "body": body,
    })
}

/// Let spawned background refreshes finish before the process exits.
async fn wait_for_revalidations(manager: &CacheManager) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(REVALIDATION_WAIT_SECS);
    while manager.revalidations_in_flight() > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!("Background revalidation still running at exit");
            return;
        }
        tokio::time::sleep(Duration::from_millis(REVALIDATION_POLL_MS)).await;
    }
    for result in manager.drain_revalidations() {
        tracing::debug!(key = %result.key, outcome = ?result.outcome, "Revalidation finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_parses_headers() {
        let request = build_request(
            "post",
            "https://example.com/api/order",
            &["Content-Type: application/json".to_string()],
            Some("{}".to_string()),
        )
        .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, b"{}".to_vec());
    }

    #[test]
    fn test_build_request_rejects_bad_header() {
        assert!(build_request("GET", "https://example.com/", &["nocolon".to_string()], None).is_err());
        assert!(build_request("GET", "https://example.com/", &[": v".to_string()], None).is_err());
    }
}
