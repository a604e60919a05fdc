//! HTTP browser for Redmine's server-rendered UI
//!
//! Behaves like a minimal browser: a cookie jar that survives redirects, a
//! current URL that relative links resolve against, and form submission with
//! the page's CSRF token. Everything returned is owned data; parsed documents
//! are built on demand from [`Page::document`] and never held across awaits.

use crate::config::RedmineConfig;
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use reqwest::{Client, Response, StatusCode};
use scraper::Html;
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

/// Maximum redirects followed for one navigation
const MAX_REDIRECTS: usize = 10;

/// A fully loaded page after redirects
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after following redirects
    pub url: Url,
    pub status: StatusCode,
    pub body: String,
}

impl Page {
    /// Parse the body. The result is `!Send`; keep it inside synchronous code.
    pub fn document(&self) -> Html {
        Html::parse_document(&self.body)
    }

    /// Map error statuses onto the error taxonomy
    pub fn ensure_found(&self, resource: &str, key: &str) -> RedmineMcpResult<()> {
        match self.status {
            StatusCode::NOT_FOUND => Err(RedmineMcpError::not_found(resource, key)),
            StatusCode::FORBIDDEN => Err(RedmineMcpError::permission(format!(
                "Access to {} '{}' is forbidden",
                resource, key
            ))),
            StatusCode::UNAUTHORIZED => Err(RedmineMcpError::session_expired()),
            status if status.is_server_error() => Err(RedmineMcpError::network(format!(
                "Redmine answered {} for {} '{}'",
                status, resource, key
            ))),
            _ => Ok(()),
        }
    }
}

/// Cookie-keeping HTTP client bound to one Redmine instance
pub struct HttpBrowser {
    client: Client,
    jar: Arc<Jar>,
    base: Url,
    current: Option<Url>,
    csrf_token: Option<String>,
}

impl std::fmt::Debug for HttpBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBrowser")
            .field("base", &self.base.as_str())
            .field("current", &self.current.as_ref().map(Url::as_str))
            .field("csrf_token", &self.csrf_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl HttpBrowser {
    /// Build a browser for the configured instance.
    ///
    /// A configured session cookie is planted in the jar before the first
    /// request, which is how an out-of-band (2FA) login is handed over.
    pub fn new(config: &RedmineConfig) -> RedmineMcpResult<Self> {
        let base = Url::parse(&config.base_url)?;
        let jar = Arc::new(Jar::default());

        if let Some(cookie) = &config.session_cookie {
            jar.add_cookie_str(cookie.trim(), &base);
            debug!("Seeded session cookie for {}", base);
        }

        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            jar,
            base,
            current: None,
            csrf_token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn current_url(&self) -> Option<&Url> {
        self.current.as_ref()
    }

    /// Token from the `csrf-token` meta tag of the last loaded page
    pub fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    /// Add a raw `name=value` cookie for the instance
    pub fn add_cookie(&self, cookie: &str) {
        self.jar.add_cookie_str(cookie, &self.base);
    }

    /// Resolve a link or form action against the current page (or the base URL)
    pub fn resolve(&self, target: &str) -> RedmineMcpResult<Url> {
        let anchor = self.current.as_ref().unwrap_or(&self.base);
        Ok(anchor.join(target)?)
    }

    /// Navigate with GET
    #[instrument(skip(self, query), fields(target = %target))]
    pub async fn get(&mut self, target: &str, query: &[(String, String)]) -> RedmineMcpResult<Page> {
        let url = self.resolve(target)?;
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request.send().await?;
        self.finish(response).await
    }

    /// Submit url-encoded form data with POST and follow the redirect chain
    #[instrument(skip(self, pairs), fields(target = %target, fields = pairs.len()))]
    pub async fn post_form(
        &mut self,
        target: &str,
        pairs: &[(String, String)],
    ) -> RedmineMcpResult<Page> {
        let url = self.resolve(target)?;
        let response = self.client.post(url).form(pairs).send().await?;
        self.finish(response).await
    }

    async fn finish(&mut self, response: Response) -> RedmineMcpResult<Page> {
        let url = response.url().clone();
        let status = response.status();

        if !same_origin(&url, &self.base) {
            return Err(RedmineMcpError::session(format!(
                "Navigation left the Redmine instance: {}",
                url
            )));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_lowercase();
            if !content_type.is_empty() && !content_type.starts_with("text/") && !content_type.contains("html") {
                return Err(RedmineMcpError::session(format!(
                    "Expected an HTML page at {} but got '{}'",
                    url, content_type
                )));
            }
        }

        let body = response.text().await?;
        debug!("Loaded {} ({}, {} bytes)", url, status, body.len());

        if let Some(token) = html::meta_csrf_token(&Html::parse_document(&body)) {
            self.csrf_token = Some(token);
        }
        self.current = Some(url.clone());

        Ok(Page { url, status, body })
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}
