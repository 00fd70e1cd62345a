/*
[INPUT]:  HTTP configuration (endpoint, timeouts, access key pair)
[OUTPUT]: Signed REST exchanges returning parsed JSON
[POS]:    HTTP layer - core client implementation
[UPDATE]: When adding connection options or changing the signing placement
*/

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{FeedError, Result};
use crate::http::signature::{RequestSigner, encode_query};

/// Base URLs for the Huobi REST API
pub const ENDPOINT: &str = "https://api.huobi.pro";
pub const MARKET_ENDPOINT: &str = "https://api.huobi.pro/market";
pub const TRADE_ENDPOINT: &str = "https://api.huobi.pro/v1";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 6.1; WOW64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/39.0.2171.71 Safari/537.36";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Parameters of one REST call, kept in key order for signing
pub type Params = BTreeMap<String, String>;

/// REST client bound to one endpoint and key pair
#[derive(Debug, Clone)]
pub struct HuobiClient {
    http_client: Client,
    signer: RequestSigner,
    scheme: String,
    /// Host as signed, including a non-default port
    host: String,
    path_prefix: String,
}

impl HuobiClient {
    /// Create a new client with default configuration
    pub fn new(endpoint: &str, access_key_id: &str, secret: &str) -> Result<Self> {
        Self::with_config(endpoint, access_key_id, secret, ClientConfig::default())
    }

    /// Create a new client with custom configuration
    pub fn with_config(
        endpoint: &str,
        access_key_id: &str,
        secret: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        let url = Url::parse(endpoint)?;
        let host = url
            .host_str()
            .ok_or_else(|| FeedError::Config(format!("endpoint {endpoint} has no host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let path_prefix = match url.path() {
            "/" => String::new(),
            path => path.trim_end_matches('/').to_string(),
        };

        let http_client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            signer: RequestSigner::new(access_key_id, secret),
            scheme: url.scheme().to_string(),
            host,
            path_prefix,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    /// Sign and send one request, returning the whole response body.
    ///
    /// GET and HEAD sign every parameter and send them in the query string.
    /// Other methods sign only the authentication fields, which travel in the
    /// query string, and send the business parameters as a JSON body.
    pub async fn request(&self, method: Method, path: &str, params: Params) -> Result<Value> {
        let path = format!("{}{}", self.path_prefix, path);
        let timestamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let carries_query = is_query_method(&method);

        let (mut query, body) = if carries_query {
            (params, None)
        } else {
            (Params::new(), Some(serde_json::to_string(&params)?))
        };
        let signature = self
            .signer
            .sign(method.as_str(), &self.host, &path, &timestamp, &mut query);
        query.insert("Signature".into(), signature);

        let mut url = Url::parse(&format!("{}://{}{}", self.scheme, self.host, path))?;
        url.set_query(Some(&encode_query(&query)));
        debug!(%method, %path, "rest request");

        let content_type = if carries_query {
            "application/x-www-form-urlencoded"
        } else {
            "application/json"
        };
        let mut builder = self
            .http_client
            .request(method, url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .header(ACCEPT_LANGUAGE, "zh-cn")
            .header(CONTENT_TYPE, content_type);
        if let Some(body) = body {
            builder = builder.body(body);
        }

        self.send_json(builder).await
    }

    /// Like [`HuobiClient::request`], decoding the `data` field into `T`
    pub async fn request_data<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Params,
    ) -> Result<T> {
        let mut body = self.request(method, path, params).await?;
        let data = body
            .get_mut("data")
            .map(Value::take)
            .ok_or_else(|| FeedError::Decode(format!("{path}: response has no data field")))?;
        Ok(serde_json::from_value(data)?)
    }

    async fn send_json(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(FeedError::Api {
                    message: format!("HTTP {status}: {text}"),
                });
            }
            Err(err) => return Err(err.into()),
        };

        if body.get("status").and_then(Value::as_str) == Some("error") {
            let message = body
                .get("err-msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(FeedError::Api { message });
        }
        if !status.is_success() {
            return Err(FeedError::Api {
                message: format!("HTTP {status}: {text}"),
            });
        }
        Ok(body)
    }
}

fn is_query_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}
