//! OCI distribution API client over HTTP
//!
//! Supports anonymous, basic and bearer-token authentication. Blobs are
//! streamed in both directions; uploads are staged in a temporary file so
//! the request body has a known length.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;

use crate::blob::BlobWriter;
use crate::error::{Error, Result};

use super::client::{BlobStore, RegistryClient};
use super::reference::{Reference, DOCKER_HUB_HOST};
use super::{
    OciDescriptor, RawManifest, DOCKER_MANIFEST_LIST_MEDIA_TYPE, DOCKER_MANIFEST_MEDIA_TYPE,
    INDEX_MEDIA_TYPE, MANIFEST_MEDIA_TYPE,
};

const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RegistryAuth {
    #[default]
    Anonymous,
    Basic {
        username: String,
        password: String,
    },
}

/// Per-host connection settings
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub auth: RegistryAuth,
    /// Talk plain HTTP instead of HTTPS
    pub plain_http: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

pub struct HttpRegistryClient {
    client: reqwest::Client,
    hosts: HashMap<String, HostConfig>,
    tokens: Mutex<HashMap<String, String>>,
}

impl HttpRegistryClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("cdport/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            hosts: HashMap::new(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_host(mut self, host: impl Into<String>, config: HostConfig) -> Self {
        self.hosts.insert(host.into(), config);
        self
    }

    fn host_config(&self, host: &str) -> HostConfig {
        self.hosts.get(host).cloned().unwrap_or_default()
    }

    fn base_url(&self, r: &Reference) -> Result<Url> {
        let scheme = if self.host_config(&r.host).plain_http {
            "http"
        } else {
            "https"
        };
        let host = if r.host == DOCKER_HUB_HOST {
            DOCKER_HUB_API_HOST
        } else {
            r.host.as_str()
        };
        Url::parse(&format!("{scheme}://{host}/v2/{}/", r.repository))
            .map_err(|e| Error::invalid(format!("registry url for {r}"), e.to_string()))
    }

    fn endpoint(&self, r: &Reference, path: &str) -> Result<Url> {
        self.base_url(r)?
            .join(path)
            .map_err(|e| Error::invalid(format!("registry url for {r}"), e.to_string()))
    }

    fn token_key(r: &Reference, actions: &str) -> String {
        format!("{}/{}:{actions}", r.host, r.repository)
    }

    fn authorize(&self, request: RequestBuilder, r: &Reference, actions: &str) -> RequestBuilder {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::token_key(r, actions))
            .cloned();
        match (token, self.host_config(&r.host).auth) {
            (Some(token), _) => request.bearer_auth(token),
            (None, RegistryAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            (None, RegistryAuth::Anonymous) => request,
        }
    }

    /// Send a request, answering one bearer challenge if the registry asks
    async fn send<F>(&self, r: &Reference, actions: &str, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = self.authorize(build(), r, actions).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(challenge) = bearer_challenge(response.headers()) else {
            return Ok(response);
        };
        self.fetch_token(r, actions, &challenge).await?;
        Ok(self.authorize(build(), r, actions).send().await?)
    }

    async fn fetch_token(
        &self,
        r: &Reference,
        actions: &str,
        challenge: &HashMap<String, String>,
    ) -> Result<()> {
        let realm = challenge
            .get("realm")
            .ok_or_else(|| Error::transport(format!("bearer challenge of {} has no realm", r.host)))?;
        let scope = format!("repository:{}:{actions}", r.repository);
        let mut query = vec![("scope", scope.as_str())];
        if let Some(service) = challenge.get("service") {
            query.push(("service", service.as_str()));
        }

        let mut request = self.client.get(realm.as_str()).query(&query);
        if let RegistryAuth::Basic { username, password } = self.host_config(&r.host).auth {
            request = request.basic_auth(username, Some(password));
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::transport(format!(
                "token request to {realm} failed: HTTP {}",
                response.status()
            )));
        }
        let body: TokenResponse = response.json().await?;
        let token = body
            .token
            .or(body.access_token)
            .ok_or_else(|| Error::transport(format!("token response of {realm} has no token")))?;
        tracing::debug!("Obtained bearer token for {}", Self::token_key(r, actions));
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::token_key(r, actions), token);
        Ok(())
    }

    async fn blob_exists(&self, r: &Reference, digest: &str) -> Result<bool> {
        let url = self.endpoint(r, &format!("blobs/{digest}"))?;
        let response = self
            .send(r, "pull,push", || self.client.request(Method::HEAD, url.clone()))
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(&format!("HEAD {url}"), s)),
        }
    }

    async fn upload_blob(
        &self,
        r: &Reference,
        desc: &OciDescriptor,
        store: &dyn BlobStore,
    ) -> Result<()> {
        let staged = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(staged.path())
            .await?;
        store.write_blob(desc, &mut file).await?;
        file.flush().await?;
        drop(file);

        let start = self.endpoint(r, "blobs/uploads/")?;
        let response = self
            .send(r, "pull,push", || self.client.post(start.clone()))
            .await?;
        if response.status() != StatusCode::ACCEPTED {
            return Err(status_error(&format!("POST {start}"), response.status()));
        }
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::transport(format!("upload to {start} returned no location")))?;
        let mut upload = start
            .join(location)
            .map_err(|e| Error::transport_with(format!("bad upload location '{location}'"), e))?;
        upload.query_pairs_mut().append_pair("digest", &desc.digest);

        // the body is a one-shot stream, so this request is sent without a
        // challenge retry; the token from the POST above is reused
        let body = tokio::fs::File::open(staged.path()).await?;
        let response = self
            .authorize(self.client.put(upload.clone()), r, "pull,push")
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, desc.size)
            .body(reqwest::Body::from(body))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(&format!("PUT {upload}"), response.status()));
        }
        tracing::debug!("Uploaded blob {} to {}", desc.digest, r.name());
        Ok(())
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get_raw_manifest(&self, reference: &str) -> Result<RawManifest> {
        let r = Reference::parse(reference)?;
        let url = self.endpoint(&r, &format!("manifests/{}", r.locator()))?;
        let accept = [
            MANIFEST_MEDIA_TYPE,
            INDEX_MEDIA_TYPE,
            DOCKER_MANIFEST_MEDIA_TYPE,
            DOCKER_MANIFEST_LIST_MEDIA_TYPE,
        ]
        .join(", ");
        let response = self
            .send(&r, "pull", || {
                self.client.get(url.clone()).header(ACCEPT, accept.as_str())
            })
            .await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => return Err(Error::not_found(format!("manifest {reference}"))),
            s => return Err(status_error(&format!("GET {url}"), s)),
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
        let data = response.bytes().await?.to_vec();
        let manifest = RawManifest::from_registry(content_type.as_deref(), data)?;
        if let Some(digest) = &r.digest {
            manifest.verify_digest(digest)?;
        }
        Ok(manifest)
    }

    async fn fetch(
        &self,
        reference: &str,
        desc: &OciDescriptor,
        writer: BlobWriter<'_>,
    ) -> Result<()> {
        let r = Reference::parse(reference)?;
        let url = self.endpoint(&r, &format!("blobs/{}", desc.digest))?;
        let response = self
            .send(&r, "pull", || self.client.get(url.clone()))
            .await?;
        match response.status() {
            s if s.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(Error::not_found(format!("blob {} in {}", desc.digest, r.name())))
            }
            s => return Err(status_error(&format!("GET {url}"), s)),
        }

        let mut hasher = Sha256::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;

        let actual = format!("sha256:{}", hex::encode(hasher.finalize()));
        if actual != desc.digest {
            return Err(Error::invalid(
                format!("blob {} from {}", desc.digest, r.name()),
                format!("content digest is {actual}"),
            ));
        }
        Ok(())
    }

    async fn push_raw_manifest(
        &self,
        reference: &str,
        manifest: &RawManifest,
        store: &dyn BlobStore,
    ) -> Result<()> {
        let r = Reference::parse(reference)?;
        if let Some(digest) = &r.digest {
            manifest.verify_digest(digest)?;
        }
        for desc in manifest.blobs()? {
            if self.blob_exists(&r, &desc.digest).await? {
                tracing::debug!("Blob {} already present in {}", desc.digest, r.name());
                continue;
            }
            self.upload_blob(&r, &desc, store).await?;
        }

        let url = self.endpoint(&r, &format!("manifests/{}", r.locator()))?;
        let response = self
            .send(&r, "pull,push", || {
                self.client
                    .put(url.clone())
                    .header(CONTENT_TYPE, manifest.media_type.as_str())
                    .body(manifest.data.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(status_error(&format!("PUT {url}"), response.status()));
        }
        tracing::debug!("Pushed manifest {}", reference);
        Ok(())
    }
}

fn status_error(request: &str, status: StatusCode) -> Error {
    Error::transport(format!("{request} failed: HTTP {status}"))
}

/// Parameters of a `WWW-Authenticate: Bearer ...` challenge
fn bearer_challenge(headers: &HeaderMap) -> Option<HashMap<String, String>> {
    let value = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    let params = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?;
    Some(parse_auth_params(params))
}

fn parse_auth_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some((key, after)) = rest.split_once('=') else {
            break;
        };
        let key = key.trim().trim_start_matches(',').trim().to_string();
        let (value, remaining) = match after.strip_prefix('"') {
            Some(quoted) => match quoted.find('"') {
                Some(end) => (&quoted[..end], &quoted[end + 1..]),
                None => (quoted, ""),
            },
            None => match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            },
        };
        params.insert(key, value.to_string());
        rest = remaining.trim_start().trim_start_matches(',').trim_start();
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_parse_bearer_challenge() {
        let mut headers = HeaderMap::new();
        headers.insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static(
                r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull,push""#,
            ),
        );
        let params = bearer_challenge(&headers).unwrap();
        assert_eq!(params["realm"], "https://auth.docker.io/token");
        assert_eq!(params["service"], "registry.docker.io");
        assert_eq!(params["scope"], "repository:library/nginx:pull,push");
    }

    #[test]
    fn test_basic_challenge_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(r#"Basic realm="x""#));
        assert!(bearer_challenge(&headers).is_none());
    }

    #[test]
    fn test_endpoints() {
        let client = HttpRegistryClient::new()
            .unwrap()
            .with_host(
                "localhost:5000",
                HostConfig {
                    plain_http: true,
                    ..Default::default()
                },
            );
        let r = Reference::parse("localhost:5000/component-descriptors/example.com/c:v1").unwrap();
        assert_eq!(
            client.endpoint(&r, "manifests/v1").unwrap().as_str(),
            "http://localhost:5000/v2/component-descriptors/example.com/c/manifests/v1"
        );

        let r = Reference::parse("nginx").unwrap();
        assert_eq!(
            client.endpoint(&r, "manifests/latest").unwrap().as_str(),
            "https://registry-1.docker.io/v2/library/nginx/manifests/latest"
        );
    }
}
