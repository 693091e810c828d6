use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{RemoteStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Firebase Realtime Database over its REST interface.
pub struct FirebaseStore {
    base_url: String,
    auth: Option<String>,
    client: Client,
}

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

impl FirebaseStore {
    pub fn new(base_url: &str, auth: Option<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        match &self.auth {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    async fn send(&self, path: &str, builder: RequestBuilder) -> Result<String, StoreError> {
        let transport = |source: reqwest::Error| StoreError::Transport {
            path: path.to_string(),
            source,
        };

        let response = builder.send().await.map_err(transport)?;
        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(StoreError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }

    fn decode<T: serde::de::DeserializeOwned>(path: &str, body: &str) -> Result<T, StoreError> {
        serde_json::from_str(body).map_err(|source| StoreError::Decode {
            path: path.to_string(),
            source,
        })
    }
}

#[async_trait]
impl RemoteStore for FirebaseStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        debug!(path, "GET");
        let body = self.send(path, self.request(Method::GET, path)).await?;
        match Self::decode(path, &body)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        debug!(path, "PUT");
        self.send(path, self.request(Method::PUT, path).json(&value))
            .await?;
        Ok(())
    }

    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<(), StoreError> {
        debug!(path, "PATCH");
        self.send(path, self.request(Method::PATCH, path).json(&fields))
            .await?;
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        debug!(path, "POST");
        let body = self
            .send(path, self.request(Method::POST, path).json(&value))
            .await?;
        let pushed: PushResponse = Self::decode(path, &body)?;
        Ok(pushed.name)
    }
}
