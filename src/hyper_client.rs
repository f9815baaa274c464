//! Default [`HttpClient`] implementation over hyper + rustls.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::{Connect, HttpConnector};
use hyper_util::rt::TokioExecutor;

use crate::transport::HttpClient;
use crate::types::Error;

/// An HTTPS-only hyper client with native roots.
pub struct DefaultClient(HyperClient<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>);

impl DefaultClient {
    /// Build the client. Fails if no native roots can be loaded.
    pub fn try_new() -> Result<Self, Error> {
        Ok(Self(
            HyperClient::builder(TokioExecutor::new()).build(
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_native_roots()
                    .map_err(|e| Error::Http(Box::new(e)))?
                    .https_only()
                    .enable_http1()
                    .enable_http2()
                    .build(),
            ),
        ))
    }
}

impl HttpClient for DefaultClient {
    fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>> {
        Box::pin(collect_response(self.0.request(req)))
    }
}

impl<C: Connect + Clone + Send + Sync + 'static> HttpClient for HyperClient<C, Full<Bytes>> {
    fn request(
        &self,
        req: Request<Full<Bytes>>,
    ) -> Pin<Box<dyn Future<Output = Result<Response<Bytes>, Error>> + Send>> {
        Box::pin(collect_response(self.request(req)))
    }
}

async fn collect_response(
    fut: impl Future<
        Output = Result<Response<hyper::body::Incoming>, hyper_util::client::legacy::Error>,
    >,
) -> Result<Response<Bytes>, Error> {
    let rsp = fut.await.map_err(|e| Error::Http(Box::new(e)))?;
    let (parts, body) = rsp.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| Error::Http(Box::new(e)))?
        .to_bytes();
    Ok(Response::from_parts(parts, body))
}
