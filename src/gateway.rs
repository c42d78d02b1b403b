// SPDX-FileCopyrightText: 2024 Noah Fontes
//
// SPDX-License-Identifier: Apache-2.0

//! Outbound HTTP to the dashboard backend.
//!
//! [`Gateway::request`] attaches the standard headers and the stored session
//! credential but never looks at the response status. Callers that want a
//! typed body go through [`read_json`], which is where status and shape are
//! checked.

use log::debug;
use reqwest::{
    header::{self, HeaderMap, HeaderName, HeaderValue},
    Method, Response,
};
use serde::{de::DeserializeOwned, Serialize};
use url::Url;

use crate::{
    error::{Error, Result},
    metadata,
    token::{Credential, TokenStore},
};

pub(crate) const DEFAULT_API_URL: &str = "http://localhost:8000";

const TUNNEL_HOST_SUFFIXES: &[&str] = &["ngrok-free.app", "ngrok-free.dev", "ngrok.app", "ngrok.io"];
const TUNNEL_WARNING_HEADER: &str = "ngrok-skip-browser-warning";

#[derive(Default)]
pub(crate) struct RequestOptions {
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) json: Option<serde_json::Value>,
    /// Use this credential instead of whatever the token store holds.
    pub(crate) bearer: Option<Credential>,
}

impl RequestOptions {
    pub(crate) fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self> {
        Ok(Self {
            json: Some(serde_json::to_value(body)?),
            ..Self::default()
        })
    }

    pub(crate) fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_owned(), value.to_owned()));
        self
    }

    pub(crate) fn with_bearer(mut self, credential: Credential) -> Self {
        self.bearer = Some(credential);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        let _ = self.headers.insert(name, value);
        self
    }
}

#[derive(Clone)]
pub(crate) struct Gateway {
    base: Url,
    http: reqwest::Client,
    tokens: TokenStore,
}

impl Gateway {
    pub(crate) fn new(base: Url, tokens: TokenStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(metadata::USER_AGENT.as_str())
            .build()?;
        Ok(Self { base, http, tokens })
    }

    pub(crate) fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    fn is_tunneled(&self) -> bool {
        self.base.host_str().map_or(false, |host| {
            TUNNEL_HOST_SUFFIXES
                .iter()
                .any(|suffix| host == *suffix || host.ends_with(&format!(".{suffix}")))
        })
    }

    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let _ = headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if self.is_tunneled() {
            let _ = headers.insert(
                HeaderName::from_static(TUNNEL_WARNING_HEADER),
                HeaderValue::from_static("true"),
            );
        }
        headers
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// Sends one request. Returns whatever the server answered, including
    /// error statuses; only transport failures are errors here.
    pub(crate) async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.url(path)?;

        let mut headers = self.default_headers();
        let bearer = match options.bearer {
            Some(credential) => Some(credential),
            None => self.tokens.get().await?,
        };
        if let Some(credential) = bearer {
            match HeaderValue::from_str(&format!("Bearer {}", credential.expose())) {
                Ok(mut value) => {
                    value.set_sensitive(true);
                    let _ = headers.insert(header::AUTHORIZATION, value);
                }
                Err(_) => debug!("Stored credential is not a valid header value; omitting it"),
            }
        }
        headers.extend(options.headers);

        debug!("{} {}", method, url);
        let mut builder = self.http.request(method, url).headers(headers);
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        if let Some(body) = options.json {
            builder = builder.body(serde_json::to_vec(&body)?);
        }
        Ok(builder.send().await?)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T> {
        read_json(self.request(Method::GET, path, options).await?).await
    }
}

/// Interprets a raw response: non-success statuses become [`Error::Http`] and
/// bodies that do not fit `T` become [`Error::Shape`] naming the field.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(Error::Http {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    let mut de = serde_json::Deserializer::from_slice(&bytes);
    Ok(serde_path_to_error::deserialize(&mut de)?)
}

/// Like [`read_json`], but an empty success body yields `T::default()`.
pub(crate) async fn read_json_or_default<T: DeserializeOwned + Default>(
    response: Response,
) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        return Err(Error::Http {
            status,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    let mut de = serde_json::Deserializer::from_slice(&bytes);
    Ok(serde_path_to_error::deserialize(&mut de)?)
}

/// Like [`read_json`] for endpoints whose body is irrelevant.
pub(crate) async fn ensure_success(response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Http { status, body })
}
