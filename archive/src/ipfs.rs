use hyper::{body::to_bytes, client::HttpConnector, header::CONTENT_TYPE, Body, Client, Request};
use serde::Deserialize;
use tracing::debug;

use crate::{ArchiveError, ArchiveResult};

const MULTIPART_BOUNDARY: &str = "----------------------------liverec";

/// Thin client for the content-addressed store's HTTP API. Everything is a
/// POST; `add` takes a single multipart file part and answers with the
/// resulting hash.
#[derive(Clone)]
pub struct IpfsClient {
    endpoint: String,
    http: Client<HttpConnector>,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsClient {
    pub fn new(host: &str, port: u16) -> IpfsClient {
        IpfsClient {
            endpoint: format!("http://{host}:{port}"),
            http: Client::new(),
        }
    }

    /// Stores a named blob, returning its content address.
    pub async fn put(&self, name: &str, data: Vec<u8>) -> ArchiveResult<String> {
        let mut body = Vec::with_capacity(data.len() + 256);
        body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n")
                .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(&data);
        body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

        let request = Request::post(format!("{}/api/v0/add?pin=true", self.endpoint))
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(Body::from(body))?;

        let response = self.http.request(request).await?;
        if !response.status().is_success() {
            return Err(ArchiveError::Ipfs(format!(
                "add returned {}",
                response.status()
            )));
        }

        let bytes = to_bytes(response.into_body()).await?;
        let parsed: AddResponse = serde_json::from_slice(&bytes)?;
        debug!(name, hash = %parsed.hash, "stored blob");
        Ok(parsed.hash)
    }

    /// Fetches a blob by address; accepts both bare hashes and `ipfs://`
    /// addresses.
    pub async fn get(&self, address: &str) -> ArchiveResult<Vec<u8>> {
        let hash = address.strip_prefix("ipfs://").unwrap_or(address);
        let request = Request::post(format!("{}/api/v0/cat?arg={hash}", self.endpoint))
            .body(Body::empty())?;

        let response = self.http.request(request).await?;
        if !response.status().is_success() {
            return Err(ArchiveError::Ipfs(format!(
                "cat returned {}",
                response.status()
            )));
        }

        Ok(to_bytes(response.into_body()).await?.to_vec())
    }

    /// Publishes the address under the node's stable name.
    pub async fn publish_name(&self, address: &str) -> ArchiveResult<()> {
        let hash = address.strip_prefix("ipfs://").unwrap_or(address);
        let request = Request::post(format!(
            "{}/api/v0/name/publish?arg=/ipfs/{hash}",
            self.endpoint
        ))
        .body(Body::empty())?;

        let response = self.http.request(request).await?;
        if !response.status().is_success() {
            return Err(ArchiveError::Ipfs(format!(
                "name publish returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
