//! Model list discovery against an OpenAI-compatible proxy.
//!
//! Proxies disagree on where the list lives and what shape it has, so the
//! lookup probes a few URLs and accepts any JSON that contains a non-empty
//! array.

use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ModelDiscoveryError {
    #[error("no proxy URL configured")]
    MissingBaseUrl,
    #[error("拉取模型失败: {0}")]
    Unreachable(String),
    #[error("返回数据无法解析为 JSON")]
    InvalidJson,
    #[error("未检测到模型列表")]
    NoModels,
}

/// URLs probed in order; the first successful response wins.
pub fn candidate_urls(base: &str) -> Vec<String> {
    let base = base.trim().trim_end_matches('/');
    vec![format!("{}/models", base), format!("{}/v1/models", base), base.to_string()]
}

pub async fn discover_models(
    client: &reqwest::Client,
    base: &str,
    api_key: Option<&str>,
) -> Result<Vec<String>, ModelDiscoveryError> {
    if base.trim().is_empty() {
        return Err(ModelDiscoveryError::MissingBaseUrl);
    }
    let api_key = api_key.map(str::trim).filter(|k| !k.is_empty());

    let mut last_error = String::new();
    let mut response = None;
    for url in candidate_urls(base) {
        let mut request = client.get(&url);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                response = Some(resp);
                break;
            }
            Ok(resp) => {
                tracing::debug!("Model list probe {} returned {}", url, resp.status());
                last_error = format!("请求 {} 返回 {}", url, resp.status().as_u16());
            }
            Err(e) => {
                tracing::debug!("Model list probe {} failed: {}", url, e);
                last_error = e.to_string();
            }
        }
    }

    let response = response.ok_or(ModelDiscoveryError::Unreachable(last_error))?;
    let body: Value = response
        .json()
        .await
        .map_err(|_| ModelDiscoveryError::InvalidJson)?;

    let models: Vec<String> = find_model_array(&body)
        .map(|items| items.iter().map(model_name).collect())
        .unwrap_or_default();
    if models.is_empty() {
        tracing::warn!("Model list response had no usable array: {}", body);
        return Err(ModelDiscoveryError::NoModels);
    }
    Ok(models)
}

/// Top-level `data`, then `models`, then the first non-empty array found
/// depth-first with keys visited in sorted order.
pub fn find_model_array(value: &Value) -> Option<&Vec<Value>> {
    if let Some(object) = value.as_object() {
        for key in ["data", "models"] {
            if let Some(items) = object.get(key).and_then(Value::as_array) {
                if !items.is_empty() {
                    return Some(items);
                }
            }
        }
    }
    first_non_empty_array(value)
}

fn first_non_empty_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) if !items.is_empty() => Some(items),
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            keys.into_iter()
                .filter_map(|key| object.get(key))
                .find_map(first_non_empty_array)
        }
        _ => None,
    }
}

/// A list entry as a display name: strings as-is, objects by their first
/// non-empty `id`/`name`/`model`/`title`, anything else as JSON text.
pub fn model_name(item: &Value) -> String {
    match item {
        Value::String(name) => name.clone(),
        Value::Object(object) => ["id", "name", "model", "title"]
            .iter()
            .filter_map(|key| object.get(*key).and_then(Value::as_str))
            .find(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| item.to_string()),
        other => other.to_string(),
    }
}
