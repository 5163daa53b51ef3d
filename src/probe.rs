//! Probe Runner (component I): one-shot HTTP call with variable expansion,
//! per §4.4.

use crate::clock::Clock;
use crate::error::Result;
use crate::expand;
use crate::notifier::Notifier;
use crate::store::{ApiDebugConfig, ApiDebugLog, NotifyCondition, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const AUTO_CONTENT_LENGTH_SENTINEL: &str = "自动计算";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ProbeRunner {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
}

impl ProbeRunner {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            notifier,
            clock,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
        }
    }

    pub async fn run(&self, probe_id: &str) -> Result<()> {
        let Some(probe) = self.store.get_probe(probe_id).await? else {
            tracing::warn!(probe_id, "probe not found, skipping firing");
            return Ok(());
        };

        let env: HashMap<String, String> = self
            .store
            .list_env_vars()
            .await?
            .into_iter()
            .map(|v| (v.name, v.value))
            .collect();

        let now_millis = self.clock.unix_millis();
        let url = expand::expand(&probe.url, &env, now_millis);
        let mut headers = expand::expand_headers(&probe.headers, &env, now_millis);
        let payload = expand::expand(&probe.payload, &env, now_millis);

        let method_upper = probe.method.to_uppercase();
        let has_body = matches!(method_upper.as_str(), "POST" | "PUT" | "PATCH");
        if has_body && !payload.is_empty() {
            let explicit = headers.get("Content-Length").map(|s| s.as_str());
            if explicit.is_none() || explicit == Some(AUTO_CONTENT_LENGTH_SENTINEL) {
                headers.insert(
                    "Content-Length".to_string(),
                    payload.as_bytes().len().to_string(),
                );
            }
        }
        if let Ok(parsed) = reqwest::Url::parse(&url) {
            if let Some(host) = parsed.host_str() {
                headers.insert("Host".to_string(), host.to_string());
            }
        }

        let start_time = self.clock.now().naive_local();
        let start_instant = Instant::now();

        let method = reqwest::Method::from_bytes(method_upper.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut request = self.http.request(method, &url);
        for (k, v) in &headers {
            request = request.header(k, v);
        }
        if has_body {
            request = request.body(payload.clone().into_bytes());
        }

        let log = match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let response_headers: HashMap<String, String> = response
                    .headers()
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                    .collect();
                let body = response.text().await.unwrap_or_default();
                ApiDebugLog {
                    id: uuid::Uuid::new_v4().to_string(),
                    config_id: probe.id.clone(),
                    config_name: probe.name.clone(),
                    method: method_upper.clone(),
                    url: url.clone(),
                    request_headers: headers.clone(),
                    request_payload: payload.clone(),
                    status_code: Some(status),
                    response_headers,
                    response_body: body,
                    error_message: None,
                    response_time_ms: start_instant.elapsed().as_millis() as i64,
                    start_time,
                }
            }
            Err(e) => ApiDebugLog {
                id: uuid::Uuid::new_v4().to_string(),
                config_id: probe.id.clone(),
                config_name: probe.name.clone(),
                method: method_upper.clone(),
                url: url.clone(),
                request_headers: headers.clone(),
                request_payload: payload.clone(),
                status_code: None,
                response_headers: HashMap::new(),
                response_body: String::new(),
                error_message: Some(e.to_string()),
                response_time_ms: start_instant.elapsed().as_millis() as i64,
                start_time,
            },
        };

        self.store.create_probe_log(log.clone()).await?;
        self.maybe_notify(&probe, &log).await;
        Ok(())
    }

    async fn maybe_notify(&self, probe: &ApiDebugConfig, log: &ApiDebugLog) {
        if !probe.notify_enabled {
            return;
        }
        let Some(channel) = &probe.notify_channel else {
            return;
        };
        let is_error = log.error_message.is_some() || log.status_code.unwrap_or(0) >= 400;
        let matches = match probe.notify_condition {
            NotifyCondition::Always => true,
            NotifyCondition::Success => !is_error,
            NotifyCondition::Error => is_error,
        };
        if !matches {
            return;
        }

        let title = format!("{} probe {}", probe.name, if is_error { "failed" } else { "ok" });
        let body = match &log.error_message {
            Some(err) => format!("error: {err}"),
            None => format!(
                "status: {}\nresponse_time: {}ms\nbody: {}",
                log.status_code.unwrap_or(0),
                log.response_time_ms,
                log.response_body
            ),
        };
        if let Err(e) = self.notifier.send(channel, &title, &body).await {
            tracing::warn!(probe_id = %probe.id, error = %e, "notifier send failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_is_utf8_byte_length_not_char_count() {
        let payload = r#"{"n":"世界"}"#;
        assert_eq!(payload.as_bytes().len(), 13);
        assert_eq!(payload.chars().count(), 9);
    }

    #[test]
    fn auto_content_length_sentinel_triggers_override() {
        let mut headers = HashMap::new();
        headers.insert("Content-Length".to_string(), AUTO_CONTENT_LENGTH_SENTINEL.to_string());
        let explicit = headers.get("Content-Length").map(|s| s.as_str());
        assert!(explicit.is_none() || explicit == Some(AUTO_CONTENT_LENGTH_SENTINEL));
    }
}
