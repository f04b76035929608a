use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use hyper::{
    client::HttpConnector,
    header::{HeaderName, HeaderValue, CONNECTION},
    Body, Client, Method, Request, Response,
};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_trust_dns::TrustDnsResolver;
use tokio::time::timeout;
use url::Url;

use crate::{
    config::{HeaderPair, HttpConfig},
    stream::RecordingConnector,
    CaptureError, CaptureResult,
};

type HttpsConn = HttpsConnector<HttpConnector<TrustDnsResolver>>;

/// HTTP client whose transport is wrapped in a [`RecordingConnector`].
/// Requests made inside a capture scope are recorded; outside one they pass
/// through untouched. Pooling is disabled so each transaction owns its
/// connection, and `connection: close` gives the recorded wire a definite
/// end.
#[derive(Clone)]
pub struct CaptureClient {
    headers: Vec<(HeaderName, HeaderValue)>,
    client: Client<RecordingConnector<HttpsConn>>,
    timeout: Duration,
}

impl CaptureClient {
    pub fn new(config: &HttpConfig) -> CaptureResult<CaptureClient> {
        let (dns_config, dns_options) =
            trust_dns_resolver::system_conf::read_system_conf().unwrap_or_default();
        let mut resolver = TrustDnsResolver::with_config_and_options(dns_config, dns_options)
            .into_http_connector();
        resolver.enforce_http(false);

        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(resolver);

        let client = Client::builder()
            .pool_max_idle_per_host(0)
            .build::<_, Body>(RecordingConnector::new(connector));

        let headers = config
            .headers
            .iter()
            .map(|HeaderPair { name, value }| {
                Ok((
                    HeaderName::from_str(name)
                        .map_err(|_| CaptureError::Header(name.clone()))?,
                    HeaderValue::from_str(value)
                        .map_err(|_| CaptureError::Header(value.clone()))?,
                ))
            })
            .collect::<CaptureResult<Vec<_>>>()?;

        Ok(CaptureClient {
            headers,
            client,
            timeout: config.timeout,
        })
    }

    pub async fn fetch(
        &self,
        url: &Url,
        method: Method,
        body: Option<Bytes>,
    ) -> CaptureResult<Response<Body>> {
        let mut builder = Request::builder().method(method).uri(url.as_str());
        for (name, value) in self.headers.iter() {
            builder = builder.header(name, value);
        }
        builder = builder.header(CONNECTION, "close");

        let request = builder.body(match body {
            Some(bytes) => Body::from(bytes),
            None => Body::empty(),
        })?;

        match timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(CaptureError::Client(e)),
            Err(_) => Err(CaptureError::TimedOut),
        }
    }

    pub async fn get(&self, url: &Url) -> CaptureResult<Response<Body>> {
        self.fetch(url, Method::GET, None).await
    }
}
