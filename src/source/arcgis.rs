use std::thread;

use anyhow::{Context, Result};
use geo::Rect;
use reqwest::{blocking::Client, redirect::Policy, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::common::envelope_json;
use crate::config::{Config, FetchConfig, LayerTable};
use crate::error::SourceError;
use crate::source::{feature::parse_features, EventSource, FetchOutcome, Layer, RateLimiter, RetryPolicy};

/// ArcGIS error codes worth retrying.
const RETRYABLE_CODES: [i64; 4] = [429, 500, 503, 504];

/// Result of a single HTTP attempt that did not produce a usable body.
#[derive(Debug)]
enum Attempt {
    Retryable(String),
    Fatal(String),
}

/// A query that failed for good.
#[derive(Debug, Clone)]
pub(crate) struct QueryFailure {
    pub attempts: u32,
    pub reason: String,
}

/// Blocking client for ArcGIS FeatureServer/MapServer `query` endpoints.
///
/// Every request, retries included, first waits on one rate limiter shared
/// by all threads using the client.
pub struct ArcGisClient {
    http: Client,
    layers: LayerTable,
    page_size: u32,
    max_pages: u32,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl ArcGisClient {
    pub fn new(fetch: &FetchConfig, layers: &LayerTable) -> Result<Self> {
        let http = Client::builder()
            .user_agent(fetch.user_agent.clone())
            .redirect(Policy::limited(10))
            .timeout(fetch.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            layers: layers.clone(),
            page_size: fetch.page_size,
            max_pages: fetch.max_pages,
            retry: fetch.retry.clone(),
            limiter: RateLimiter::new(fetch.rate_limit()),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> { Self::new(&config.fetch, &config.layers) }

    /// Fetch every page of a query. Paging stops at the first short page or
    /// after the configured page limit.
    pub(crate) fn query_paged(&self, url: &str, params: &[(&str, String)]) -> Result<Vec<Value>, QueryFailure> {
        let mut features = Vec::new();
        let mut attempts = 0;

        for page in 0..self.max_pages {
            let mut page_params = params.to_vec();
            page_params.push(("resultOffset", (page * self.page_size).to_string()));
            page_params.push(("resultRecordCount", self.page_size.to_string()));

            let (body, used) = self.get_json(url, &page_params)?;
            attempts += used;

            let batch = body["features"].as_array()
                .ok_or_else(|| QueryFailure { attempts, reason: "response has no features array".into() })?;
            let n = batch.len();
            features.extend(batch.iter().cloned());
            debug!(url, page, n, "fetched page");

            if n < self.page_size as usize {
                return Ok(features);
            }
        }

        warn!(url, pages = self.max_pages, "page limit reached; results may be truncated");
        Ok(features)
    }

    /// GET with retries on throttling-class failures. Returns the body and
    /// the number of attempts used.
    fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<(Value, u32), QueryFailure> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.limiter.wait();
            match self.attempt(url, params) {
                Ok(body) => return Ok((body, attempt)),
                Err(Attempt::Retryable(reason)) if self.retry.allows_retry(attempt) => {
                    let delay = self.retry.backoff(attempt);
                    warn!(url, attempt, %reason, delay_ms = delay.as_millis() as u64, "request throttled or failed; retrying");
                    thread::sleep(delay);
                }
                Err(Attempt::Retryable(reason)) | Err(Attempt::Fatal(reason)) => {
                    return Err(QueryFailure { attempts: attempt, reason });
                }
            }
        }
    }

    fn attempt(&self, url: &str, params: &[(&str, String)]) -> Result<Value, Attempt> {
        let resp = match self.http.get(url).query(params).send() {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                return Err(Attempt::Retryable(e.to_string()));
            }
            Err(e) => return Err(Attempt::Fatal(e.to_string())),
        };

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Attempt::Retryable(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(Attempt::Fatal(format!("HTTP {status}")));
        }

        let bytes = resp.bytes().map_err(|e| Attempt::Retryable(format!("read body: {e}")))?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| Attempt::Fatal(format!("invalid JSON: {e}")))?;

        // ArcGIS reports service errors inside a 200 response.
        if let Some(err) = body.get("error") {
            let code = err["code"].as_i64();
            let message = err["message"].as_str().unwrap_or("unknown error");
            let reason = format!("ArcGIS error {}: {message}", code.map_or("?".to_string(), |c| c.to_string()));
            return Err(match code {
                Some(c) if RETRYABLE_CODES.contains(&c) => Attempt::Retryable(reason),
                _ => Attempt::Fatal(reason),
            });
        }
        Ok(body)
    }
}

/// Query parameters for one layer over an envelope.
fn layer_params(extent: &Rect<f64>) -> Vec<(&'static str, String)> {
    vec![
        ("where", "1=1".to_string()),
        ("outFields", "*".to_string()),
        ("outSR", "4326".to_string()),
        ("f", "geojson".to_string()),
        ("returnGeometry", "true".to_string()),
        ("geometry", envelope_json(extent).to_string()),
        ("geometryType", "esriGeometryEnvelope".to_string()),
        ("spatialRel", "esriSpatialRelIntersects".to_string()),
        ("inSR", "4326".to_string()),
    ]
}

impl EventSource for ArcGisClient {
    fn fetch(&self, layer: Layer, extent: &Rect<f64>) -> Result<FetchOutcome, SourceError> {
        let cfg = self.layers.get(layer);
        let params = layer_params(extent);

        let mut attempts = 0;
        let mut reasons = Vec::new();
        for url in std::iter::once(&cfg.url).chain(cfg.fallback_urls.iter()) {
            match self.query_paged(url, &params) {
                Ok(features) => return Ok(parse_features(layer, &features).into()),
                Err(failure) => {
                    warn!(%layer, url, reason = %failure.reason, "layer endpoint unavailable");
                    attempts += failure.attempts;
                    reasons.push(failure.reason);
                }
            }
        }

        Err(SourceError::Unavailable { layer, attempts, reason: reasons.join("; ") })
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};
    use std::thread;

    use geo::{Rect, coord};
    use serde_json::json;

    use super::{layer_params, ArcGisClient};
    use crate::config::{Config, FetchConfig, LayerConfig, LayerTable};
    use crate::error::SourceError;
    use crate::source::{EventSource, FetchOutcome, Layer, RetryPolicy};

    /// Serve one scripted `(status, body)` per connection, in order, and record
    /// each request target (`/path?query`).
    fn serve(responses: Vec<(u16, String)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);

        thread::spawn(move || {
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() == 0 || header == "\r\n" {
                        break;
                    }
                }
                let target = request_line.split_whitespace().nth(1).unwrap_or_default().to_string();
                log.lock().unwrap().push(target);

                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len(),
                );
                stream.write_all(reply.as_bytes()).unwrap();
            }
        });
        (base, seen)
    }

    fn ok(features: usize) -> (u16, String) {
        let features: Vec<_> = (0..features).map(|_| json!({ "type": "Feature", "geometry": null, "properties": {} })).collect();
        (200, json!({ "type": "FeatureCollection", "features": features }).to_string())
    }

    fn arcgis_error(code: i64) -> (u16, String) {
        (200, json!({ "error": { "code": code, "message": "scripted" } }).to_string())
    }

    fn status(code: u16) -> (u16, String) { (code, "{}".to_string()) }

    /// A client with millisecond backoff, no rate limit, 2-record pages and at
    /// most 3 pages. The closure layer queries `urls[0]` then the rest in order.
    fn client(urls: &[String]) -> ArcGisClient {
        let fetch = FetchConfig {
            rate_limit_ms: 0,
            page_size: 2,
            max_pages: 3,
            timeout_secs: 5,
            retry: RetryPolicy { max_attempts: 3, initial_backoff_ms: 1, multiplier: 2.0, max_backoff_ms: 5 },
            ..FetchConfig::default()
        };
        let layers = LayerTable {
            closure: LayerConfig { url: urls[0].clone(), fallback_urls: urls[1..].to_vec(), ..LayerConfig::default() },
            ..LayerTable::default()
        };
        ArcGisClient::new(&fetch, &layers).unwrap()
    }

    fn extent() -> Rect<f64> { Rect::new(coord! { x: -88.0, y: 41.0 }, coord! { x: -87.5, y: 42.0 }) }

    fn paths(seen: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        seen.lock().unwrap().iter().map(|t| t.split('?').next().unwrap_or_default().to_string()).collect()
    }

    fn offsets(seen: &Arc<Mutex<Vec<String>>>) -> Vec<u32> {
        seen.lock().unwrap().iter()
            .filter_map(|t| t.split(['?', '&']).find_map(|kv| kv.strip_prefix("resultOffset=")))
            .map(|v| v.parse().unwrap())
            .collect()
    }

    #[test]
    fn envelope_query_parameters() {
        let params = layer_params(&extent());
        let get = |name: &str| params.iter().find(|(k, _)| *k == name).map(|(_, v)| v.as_str());
        assert_eq!(get("f"), Some("geojson"));
        assert_eq!(get("outSR"), Some("4326"));
        assert_eq!(get("geometryType"), Some("esriGeometryEnvelope"));
        assert_eq!(get("spatialRel"), Some("esriSpatialRelIntersects"));
        assert!(get("geometry").unwrap().contains("\"xmin\":-88.0"));
    }

    #[test]
    fn builds_from_default_config() {
        assert!(ArcGisClient::from_config(&Config::default()).is_ok());
    }

    #[test]
    fn throttling_failures_are_retried_until_success() {
        let (base, seen) = serve(vec![status(503), arcgis_error(429), ok(0)]);
        let outcome = client(&[format!("{base}/closures")]).fetch(Layer::Closure, &extent()).unwrap();
        assert!(matches!(outcome, FetchOutcome::Empty));
        assert_eq!(paths(&seen), vec!["/closures"; 3]);
    }

    #[test]
    fn retries_stop_at_max_attempts() {
        let (base, seen) = serve(vec![status(500), arcgis_error(504), status(429)]);
        let err = client(&[format!("{base}/closures")]).fetch(Layer::Closure, &extent()).unwrap_err();
        let SourceError::Unavailable { layer, attempts, reason } = err;
        assert_eq!(layer, Layer::Closure);
        assert_eq!(attempts, 3);
        assert!(reason.contains("429"), "{reason}");
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (base, seen) = serve(vec![status(404)]);
        let err = client(&[format!("{base}/closures")]).fetch(Layer::Closure, &extent()).unwrap_err();
        let SourceError::Unavailable { attempts, .. } = err;
        assert_eq!(attempts, 1);
        assert_eq!(seen.lock().unwrap().len(), 1);

        let (base, seen) = serve(vec![arcgis_error(400)]);
        let err = client(&[format!("{base}/closures")]).fetch(Layer::Closure, &extent()).unwrap_err();
        let SourceError::Unavailable { attempts, reason, .. } = err;
        assert_eq!(attempts, 1);
        assert!(reason.contains("ArcGIS error 400"), "{reason}");
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn fallback_urls_are_tried_in_order() {
        let (base, seen) = serve(vec![status(400), status(503), status(503), status(503), ok(1)]);
        let urls = ["/primary", "/view", "/alternate"].map(|p| format!("{base}{p}"));
        let outcome = client(&urls).fetch(Layer::Closure, &extent()).unwrap();
        assert!(matches!(outcome, FetchOutcome::Features(ref f) if f.len() == 1));
        assert_eq!(paths(&seen), vec!["/primary", "/view", "/view", "/view", "/alternate"]);
    }

    #[test]
    fn exhausted_fallbacks_sum_attempts() {
        let (base, seen) = serve(vec![status(403), status(502), status(502), status(502)]);
        let urls = ["/primary", "/view"].map(|p| format!("{base}{p}"));
        let err = client(&urls).fetch(Layer::Closure, &extent()).unwrap_err();
        let SourceError::Unavailable { attempts, reason, .. } = err;
        assert_eq!(attempts, 4);
        assert_eq!(reason.matches("; ").count(), 1);
        assert_eq!(paths(&seen), vec!["/primary", "/view", "/view", "/view"]);
    }

    #[test]
    fn paging_stops_on_short_page() {
        let (base, seen) = serve(vec![ok(2), ok(2), ok(1)]);
        let url = format!("{base}/closures");
        let features = client(&[url.clone()]).query_paged(&url, &layer_params(&extent())).unwrap();
        assert_eq!(features.len(), 5);
        assert_eq!(offsets(&seen), vec![0, 2, 4]);
    }

    #[test]
    fn paging_stops_at_page_limit() {
        let (base, seen) = serve(vec![ok(2), ok(2), ok(2)]);
        let url = format!("{base}/closures");
        let features = client(&[url.clone()]).query_paged(&url, &layer_params(&extent())).unwrap();
        assert_eq!(features.len(), 6);
        assert_eq!(offsets(&seen), vec![0, 2, 4]);
    }
}
