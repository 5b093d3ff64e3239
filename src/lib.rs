//! Middleware which validates the origin of incoming requests.
//!
//! `cors-gate` is a request-time gate for [CORS][mdn]/CSRF-adjacent defense:
//! same-origin and explicitly allow-listed cross-origin requests pass,
//! everything else is rejected before it reaches the wrapped service. The
//! declared origin is taken from the `Origin` header, falling back to the
//! `Referer` header when `Origin` is absent.
//!
//! This crate decides pass/fail only. It does not set
//! `Access-Control-Allow-*` response headers and does not answer preflight
//! `OPTIONS` requests; combine it with a CORS middleware if you need those.
//!
//! # Example
//!
//! ```
//! use cors_gate::{CorsGateLayer, OriginPolicy};
//! use http::{header, Request, Response, StatusCode};
//! use std::convert::Infallible;
//! use tower::{Service, ServiceBuilder, ServiceExt};
//!
//! async fn handle(request: Request<String>) -> Result<Response<String>, Infallible> {
//!     Ok(Response::new(String::new()))
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Requests must come from `example.com`, except signal-less GET/HEAD
//! // requests which are let through by `allow_safe`.
//! let policy = OriginPolicy::new(["example.com"])?.allow_safe(true);
//!
//! let mut service = ServiceBuilder::new()
//!     .layer(CorsGateLayer::new(policy))
//!     .service_fn(handle);
//!
//! let request = Request::builder()
//!     .header(header::ORIGIN, "example.com")
//!     .body(String::new())?;
//!
//! let response = service.ready().await?.call(request).await?;
//! assert_eq!(response.status(), StatusCode::OK);
//!
//! // A request from an origin that isn't allow-listed is rejected.
//! let request = Request::builder()
//!     .method("POST")
//!     .header(header::ORIGIN, "evil.example")
//!     .body(String::new())?;
//!
//! let response = service.ready().await?.call(request).await?;
//! assert_eq!(response.status(), StatusCode::FORBIDDEN);
//! # Ok(())
//! # }
//! ```
//!
//! [mdn]: https://developer.mozilla.org/en-US/docs/Web/HTTP/CORS

#![allow(elided_lifetimes_in_paths, clippy::type_complexity)]
#![warn(
    clippy::all,
    clippy::dbg_macro,
    clippy::todo,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::mem_forget,
    clippy::unused_self,
    clippy::filter_map_next,
    clippy::needless_continue,
    clippy::needless_borrow,
    clippy::match_wildcard_for_single_variants,
    clippy::if_let_mutex,
    clippy::await_holding_lock,
    clippy::imprecise_flops,
    clippy::suboptimal_flops,
    clippy::lossy_float_literal,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::fn_params_excessive_bools,
    clippy::exit,
    clippy::inefficient_to_string,
    clippy::linkedlist,
    clippy::macro_use_imports,
    clippy::option_option,
    clippy::verbose_file_reads,
    clippy::unnested_or_patterns,
    rust_2018_idioms,
    future_incompatible,
    nonstandard_style,
    missing_docs
)]
#![deny(unreachable_pub)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod allowed_origins;
mod gate;
mod policy;

pub use self::allowed_origins::AllowedOrigins;
pub use self::gate::{
    CorsGate, CorsGateLayer, DefaultOnFailure, OnFailure, ResponseFuture, UpstreamAllowOrigin,
};
pub use self::policy::{Denied, EmptyAllowList, OriginPolicy};
