use futures::{FutureExt, future::BoxFuture};
use mpc_session_client::metadata::{MetadataExchange, MetadataRequest, MetadataResponse};
use reqwest_middleware::ClientWithMiddleware;
use url::Url;

use crate::transport::{HttpTransportError, client, error_body, join};

/// Exchanges metadata with a coordinator service via `POST /metadata`.
#[derive(Clone)]
pub struct HttpMetadataExchange {
    client: ClientWithMiddleware,
    url: Url,
}

impl HttpMetadataExchange {
    /// A metadata exchange with the coordinator at `coordinator_url`.
    pub fn new(coordinator_url: &Url) -> anyhow::Result<Self> {
        let client = client(std::time::Duration::from_secs(30))?;
        Ok(Self::with_client(client, coordinator_url)?)
    }

    /// A metadata exchange using an existing HTTP client.
    pub fn with_client(
        client: ClientWithMiddleware,
        coordinator_url: &Url,
    ) -> Result<Self, HttpTransportError> {
        let url = join(coordinator_url, "metadata")?;
        Ok(Self { client, url })
    }

    async fn request(&self, req: MetadataRequest) -> Result<MetadataResponse, HttpTransportError> {
        let resp = self
            .client
            .post(self.url.clone())
            .json(&req)
            .send()
            .await
            .map_err(|source| HttpTransportError::Request {
                url: self.url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(HttpTransportError::Status {
                route: "metadata".to_string(),
                status: resp.status(),
                body: error_body(resp).await,
            });
        }
        resp.json()
            .await
            .map_err(|source| HttpTransportError::Decode {
                url: self.url.clone(),
                source,
            })
    }
}

impl MetadataExchange for HttpMetadataExchange {
    fn exchange(
        &self,
        req: MetadataRequest,
    ) -> BoxFuture<'_, Result<MetadataResponse, mpc_session_client::error::BoxError>> {
        self.request(req).map(|res| res.map_err(Into::into)).boxed()
    }
}
