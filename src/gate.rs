use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use http::header::{self, HeaderValue};
use http::{HeaderMap, Request, Response, StatusCode};
use pin_project_lite::pin_project;
use tower_layer::Layer;
use tower_service::Service;

use crate::policy::header_str;
use crate::{Denied, OriginPolicy};

/// Layer that applies [`CorsGate`], rejecting requests whose declared origin
/// fails an [`OriginPolicy`].
///
/// See the [crate docs](crate) for an example.
#[derive(Debug, Clone)]
pub struct CorsGateLayer<F = DefaultOnFailure> {
    policy: OriginPolicy,
    on_failure: F,
}

impl CorsGateLayer {
    /// Gate requests with the given policy.
    ///
    /// Denied requests receive the default failure response, `403 Forbidden`
    /// with an empty body.
    pub fn new(policy: OriginPolicy) -> Self {
        Self {
            policy,
            on_failure: DefaultOnFailure,
        }
    }
}

impl<F> CorsGateLayer<F> {
    /// Replace the handler that builds responses for denied requests.
    pub fn on_failure<F2>(self, on_failure: F2) -> CorsGateLayer<F2> {
        CorsGateLayer {
            policy: self.policy,
            on_failure,
        }
    }
}

impl<S, F> Layer<S> for CorsGateLayer<F>
where
    F: Clone,
{
    type Service = CorsGate<S, F>;

    fn layer(&self, inner: S) -> Self::Service {
        CorsGate {
            inner,
            policy: self.policy.clone(),
            on_failure: self.on_failure.clone(),
        }
    }
}

/// Middleware which validates the origin of every request before handing it
/// to the inner service.
///
/// The policy is consulted exactly once per request. Allowed requests are
/// forwarded unchanged; denied requests never reach the inner service and are
/// answered by the configured [`OnFailure`] handler.
///
/// See the [crate docs](crate) for an example.
#[derive(Debug, Clone)]
pub struct CorsGate<S, F = DefaultOnFailure> {
    inner: S,
    policy: OriginPolicy,
    on_failure: F,
}

impl<S> CorsGate<S> {
    /// Gate `inner` with the given policy and the default failure response.
    pub fn new(inner: S, policy: OriginPolicy) -> Self {
        Self {
            inner,
            policy,
            on_failure: DefaultOnFailure,
        }
    }

    /// Returns a new [`Layer`] that wraps services with a [`CorsGate`]
    /// middleware.
    ///
    /// [`Layer`]: tower_layer::Layer
    pub fn layer(policy: OriginPolicy) -> CorsGateLayer {
        CorsGateLayer::new(policy)
    }
}

impl<S, F> CorsGate<S, F> {
    /// The policy this gate enforces.
    pub fn policy(&self) -> &OriginPolicy {
        &self.policy
    }

    /// Gets a reference to the underlying service.
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying service.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes `self`, returning the underlying service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, F, ReqBody, ResBody> Service<Request<ReqBody>> for CorsGate<S, F>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
    F: OnFailure,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let upstream = req
            .extensions()
            .get::<UpstreamAllowOrigin>()
            .and_then(|allow_origin| allow_origin.0.to_str().ok());

        let decision = self.policy.check(
            req.method(),
            header_str(req.headers(), &header::ORIGIN),
            header_str(req.headers(), &header::REFERER),
            upstream,
        );

        match decision {
            Ok(()) => ResponseFuture {
                kind: Kind::Inner {
                    future: self.inner.call(req),
                },
            },
            Err(denied) => {
                tracing::debug!(reason = %denied, "request failed origin validation");
                let (status, headers) = self.on_failure.on_failure(&req, &denied);
                ResponseFuture {
                    kind: Kind::Denied {
                        response: Some((ResBody::default(), status, headers)),
                    },
                }
            }
        }
    }
}

pin_project! {
    /// Response future for [`CorsGate`].
    pub struct ResponseFuture<F, B> {
        #[pin]
        kind: Kind<F, B>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F, B> {
        Inner {
            #[pin]
            future: F,
        },
        Denied {
            response: Option<(B, StatusCode, HeaderMap)>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Inner { future } => future.poll(cx),
            KindProj::Denied { response } => {
                let (body, status, headers) = response.take().unwrap();
                let mut response = Response::new(body);
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Poll::Ready(Ok(response))
            }
        }
    }
}

/// Trait for building the response to a denied request.
///
/// The handler controls the status and headers of the response; the body is
/// always the response body type's `Default` value. The denial reason is for
/// the handler's own logging or diagnostics and should not be echoed to the
/// client.
pub trait OnFailure {
    /// Build the response for a request that failed origin validation.
    fn on_failure<B>(&mut self, request: &Request<B>, denied: &Denied) -> (StatusCode, HeaderMap);
}

/// The default failure response: `403 Forbidden`, no extra headers, empty
/// body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOnFailure;

impl OnFailure for DefaultOnFailure {
    fn on_failure<B>(&mut self, _request: &Request<B>, _denied: &Denied) -> (StatusCode, HeaderMap) {
        (StatusCode::FORBIDDEN, HeaderMap::new())
    }
}

/// An `Access-Control-Allow-Origin` decision already made by middleware that
/// ran before the gate.
///
/// Response headers aren't shared mutable state in a tower stack the way they
/// are in frameworks that hand every middleware the same header map, so a
/// middleware that has already committed an allow-origin value communicates
/// it to the gate through this request extension. The gate defers to it when
/// it is `*` or names the request's effective origin.
///
/// ```
/// use cors_gate::UpstreamAllowOrigin;
/// use http::{HeaderValue, Request};
///
/// let mut request = Request::new(());
/// request
///     .extensions_mut()
///     .insert(UpstreamAllowOrigin(HeaderValue::from_static("*")));
/// ```
#[derive(Debug, Clone)]
pub struct UpstreamAllowOrigin(pub HeaderValue);

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use std::convert::Infallible;
    use tower::{service_fn, util::ServiceExt, Layer};

    async fn inner_svc(_: Request<String>) -> Result<Response<String>, Infallible> {
        Ok(Response::new("hello world".to_owned()))
    }

    fn gate(policy: OriginPolicy) -> CorsGateLayer {
        CorsGateLayer::new(policy)
    }

    fn localhost_policy() -> OriginPolicy {
        OriginPolicy::new(["localhost"]).unwrap()
    }

    fn request(method: Method, headers: &[(header::HeaderName, &str)]) -> Request<String> {
        let mut builder = Request::builder().method(method).uri("http://localhost/");
        for (name, value) in headers {
            builder = builder.header(name, *value);
        }
        builder.body(String::new()).unwrap()
    }

    #[tokio::test]
    async fn allows_same_origin_requests() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::GET, &[(header::ORIGIN, "localhost")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "hello world");
    }

    #[tokio::test]
    async fn allows_same_origin_post_requests() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::POST, &[(header::ORIGIN, "localhost")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn allows_permitted_cross_origin_requests() {
        let policy = OriginPolicy::new(["localhost:1234"]).unwrap();
        let svc = gate(policy).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::GET, &[(header::ORIGIN, "localhost:1234")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn allows_wildcard_origins() {
        let policy = OriginPolicy::new(["*"]).unwrap();
        let svc = gate(policy).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::GET, &[(header::ORIGIN, "google.com")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_requests_without_origin() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc.oneshot(request(Method::GET, &[])).await.unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(res.body(), "");
    }

    #[tokio::test]
    async fn rejects_requests_from_other_origins() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::GET, &[(header::ORIGIN, "google.com")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn allows_unspecified_safe_requests() {
        let svc = gate(localhost_policy().allow_safe(true)).layer(service_fn(inner_svc));

        let res = svc.oneshot(request(Method::GET, &[])).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn rejects_requests_without_origin_in_strict_mode() {
        let policy = localhost_policy().allow_safe(true).strict(true);
        let svc = gate(policy).layer(service_fn(inner_svc));

        let res = svc.oneshot(request(Method::GET, &[])).await.unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn falls_back_to_referer_header() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(
                Method::GET,
                &[(header::REFERER, "http://localhost/mypage.html")],
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn referer_does_not_override_origin() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(
                Method::GET,
                &[
                    (header::ORIGIN, "google.com"),
                    (header::REFERER, "http://localhost/mypage.html"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn defers_to_upstream_allow_origin() {
        let svc = gate(localhost_policy()).layer(service_fn(inner_svc));

        let mut req = request(Method::POST, &[(header::ORIGIN, "google.com")]);
        req.extensions_mut()
            .insert(UpstreamAllowOrigin(HeaderValue::from_static("*")));

        let res = svc.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
    }

    #[derive(Clone)]
    struct BadRequestOnFailure;

    impl OnFailure for BadRequestOnFailure {
        fn on_failure<B>(
            &mut self,
            _request: &Request<B>,
            denied: &Denied,
        ) -> (StatusCode, HeaderMap) {
            let mut headers = HeaderMap::new();
            headers.insert("x-denied-reason", denied.to_string().parse().unwrap());
            (StatusCode::BAD_REQUEST, headers)
        }
    }

    #[tokio::test]
    async fn failure_handler_is_not_invoked_for_allowed_requests() {
        let svc = gate(localhost_policy())
            .on_failure(BadRequestOnFailure)
            .layer(service_fn(inner_svc));

        let res = svc
            .oneshot(request(Method::GET, &[(header::ORIGIN, "localhost")]))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("x-denied-reason").is_none());
    }

    #[tokio::test]
    async fn failure_handler_is_invoked_for_denied_requests() {
        let svc = gate(localhost_policy())
            .on_failure(BadRequestOnFailure)
            .layer(service_fn(inner_svc));

        let res = svc.oneshot(request(Method::GET, &[])).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            res.headers().get("x-denied-reason").unwrap(),
            "no safe origin signal",
        );
    }
}
