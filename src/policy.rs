use std::fmt;

use http::header::{self, HeaderMap, HeaderName};
use http::{Method, Request};
use url::Url;

use crate::AllowedOrigins;

/// Decides whether a request's declared origin is acceptable.
///
/// The policy is immutable once built and cheap to clone (the allow-list is
/// shared). A single decision is exposed through [`check`] (plain values) and
/// [`validate`] (header extraction from an [`http::Request`]).
///
/// Origins are compared as `host[:port]` strings; the scheme is ignored both
/// for configured entries and for values derived from the `Referer` header.
///
/// [`check`]: OriginPolicy::check
/// [`validate`]: OriginPolicy::validate
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed: AllowedOrigins,
    allow_safe: bool,
    strict: bool,
    credentials: bool,
}

impl OriginPolicy {
    /// Create a policy permitting the given origins.
    ///
    /// Entries are `host[:port]` values, or `"*"` to permit every origin.
    /// A port that is its scheme's default (`:80` for http, `:443` for
    /// https) never appears in a derived origin, so entries must omit it.
    /// At least one entry is required: a gate with an empty allow-list would
    /// either reject or wave through all traffic, so construction fails
    /// instead of guessing.
    ///
    /// ```
    /// use cors_gate::OriginPolicy;
    ///
    /// let policy = OriginPolicy::new(["example.com", "api.example.com:8443"]).unwrap();
    /// assert!(policy.allowed_origins().matches("example.com"));
    ///
    /// assert!(OriginPolicy::new(Vec::<String>::new()).is_err());
    /// ```
    pub fn new<I, S>(origins: I) -> Result<Self, EmptyAllowList>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed = AllowedOrigins::new(origins.into_iter().map(Into::into).collect());
        if allowed.is_empty() {
            return Err(EmptyAllowList(()));
        }

        Ok(Self {
            allowed,
            allow_safe: false,
            strict: false,
            credentials: false,
        })
    }

    /// Permit requests carrying no origin signal at all when the method is
    /// `GET` or `HEAD`.
    ///
    /// This exemption only applies when both the `Origin` and `Referer`
    /// headers are absent; it never rescues a request whose declared origin
    /// failed the allow-list. Defaults to `false`.
    pub fn allow_safe(mut self, allow_safe: bool) -> Self {
        self.allow_safe = allow_safe;
        self
    }

    /// Require an origin signal on every request.
    ///
    /// Overrides [`allow_safe`]: with strict mode on, a request without an
    /// `Origin` or `Referer` header is rejected regardless of method.
    /// Defaults to `false`.
    ///
    /// [`allow_safe`]: OriginPolicy::allow_safe
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Record that allowed origins may send credentials.
    ///
    /// The flag is carried for middleware further down the stack that sets
    /// `Access-Control-Allow-Credentials`; the validation decision itself
    /// never consults it. Defaults to `false`.
    pub fn credentials(mut self, credentials: bool) -> Self {
        self.credentials = credentials;
        self
    }

    /// The configured allow-list.
    pub fn allowed_origins(&self) -> &AllowedOrigins {
        &self.allowed
    }

    /// Whether allowed origins may send credentials.
    ///
    /// See [`credentials`](OriginPolicy::credentials).
    pub fn credentials_enabled(&self) -> bool {
        self.credentials
    }

    /// Validate a request against this policy.
    ///
    /// `response_headers` is the view of headers already committed to the
    /// response by middleware that ran earlier; an
    /// `Access-Control-Allow-Origin` found there is deferred to. Pass an
    /// empty map when there is no such middleware.
    pub fn validate<B>(
        &self,
        request: &Request<B>,
        response_headers: &HeaderMap,
    ) -> Result<(), Denied> {
        self.check(
            request.method(),
            header_str(request.headers(), &header::ORIGIN),
            header_str(request.headers(), &header::REFERER),
            header_str(response_headers, &header::ACCESS_CONTROL_ALLOW_ORIGIN),
        )
    }

    /// The validation decision itself.
    ///
    /// First match wins:
    ///
    /// 1. A non-empty `Origin` header (lowercased) is the effective origin.
    /// 2. Otherwise the `Referer` header is parsed as a URL and its
    ///    `host[:port]` becomes the effective origin (a scheme-default port
    ///    is dropped, matching how browsers serialize origins); an
    ///    unparsable value is rejected. With neither header present the
    ///    request passes only under the [`allow_safe`] exemption.
    /// 3. The effective origin is allowed if it matches the allow-list.
    /// 4. Failing that, an `Access-Control-Allow-Origin` already set upstream
    ///    is deferred to when it is `*` or names the same origin.
    /// 5. Everything else is denied.
    ///
    /// [`allow_safe`]: OriginPolicy::allow_safe
    pub fn check(
        &self,
        method: &Method,
        origin: Option<&str>,
        referer: Option<&str>,
        existing_allow_origin: Option<&str>,
    ) -> Result<(), Denied> {
        let effective = match origin {
            Some(origin) if !origin.is_empty() => origin.to_ascii_lowercase(),
            _ => match referer {
                Some(referer) if !referer.is_empty() => {
                    referer_host(&referer.to_ascii_lowercase())?
                }
                // No origin signal at all. This branch is terminal: either
                // the safe-method exemption applies or the request is denied.
                _ => {
                    return if self.allow_safe
                        && !self.strict
                        && (method == Method::GET || method == Method::HEAD)
                    {
                        Ok(())
                    } else {
                        Err(Denied::NoOriginSignal)
                    };
                }
            },
        };

        if self.allowed.matches(&effective) {
            return Ok(());
        }

        // Defer to a CORS decision already made upstream in the chain.
        if let Some(existing) = existing_allow_origin {
            let existing = existing.replace(' ', "").to_ascii_lowercase();
            if !existing.is_empty() && (existing == "*" || existing == effective) {
                return Ok(());
            }
        }

        Err(Denied::OriginNotAllowed(effective))
    }
}

/// Extract the `Referer`'s `host[:port]`, discarding scheme and path.
///
/// Parsing follows the WHATWG URL standard, so a port that is the scheme's
/// default is dropped: `http://example.com:80/x` yields `example.com`.
fn referer_host(referer: &str) -> Result<String, Denied> {
    let url = Url::parse(referer).map_err(|_| Denied::UnparsableReferer)?;
    let host = url.host_str().ok_or(Denied::UnparsableReferer)?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    })
}

pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    // A value that isn't visible ASCII can't name a real origin; treat it as
    // absent rather than comparing garbage.
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Why a request was rejected.
///
/// The [`Display`] form is a human-readable reason intended for logs; it must
/// never be echoed back to the remote client.
///
/// [`Display`]: fmt::Display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denied {
    /// A `Referer` fallback was attempted but the header was not a URL with
    /// a host. Malformed input, not a policy rejection; callers may want to
    /// log it differently.
    UnparsableReferer,
    /// Neither an `Origin` nor a `Referer` header was present and the
    /// safe-method exemption did not apply.
    NoOriginSignal,
    /// The effective origin failed the allow-list and no upstream CORS
    /// decision covered it. Carries the (lowercased) origin.
    OriginNotAllowed(String),
}

impl fmt::Display for Denied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denied::UnparsableReferer => f.write_str("referer header unparsable"),
            Denied::NoOriginSignal => f.write_str("no safe origin signal"),
            Denied::OriginNotAllowed(origin) => {
                write!(f, "{} is not an allowed origin", origin)
            }
        }
    }
}

impl std::error::Error for Denied {}

/// Error returned by [`OriginPolicy::new`] when no origins were given.
///
/// An empty allow-list is a configuration mistake, not a policy; refusing to
/// build the policy keeps a non-functional gate from attaching at all.
#[derive(Debug)]
pub struct EmptyAllowList(pub(crate) ());

impl fmt::Display for EmptyAllowList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("must specify at least one allowed origin")
    }
}

impl std::error::Error for EmptyAllowList {}
