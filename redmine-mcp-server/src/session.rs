//! Authenticated Redmine sessions
//!
//! A [`RedmineSession`] owns one [`HttpBrowser`] plus the login state learned
//! from the pages it loads. The [`SessionManager`] holds at most one session
//! behind an async mutex, so concurrent tool calls run one at a time.

use crate::browser::{HttpBrowser, Page};
use crate::config::RedmineConfig;
use crate::error::{RedmineMcpError, RedmineMcpResult};
use crate::html::{self, FormSnapshot};
use crate::wait::Poller;
use regex::Regex;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};
use url::Url;

static LOGGED_AS: LazyLock<Selector> = LazyLock::new(|| html::selector("#loggedas"));
static LOGGED_AS_LINK: LazyLock<Selector> = LazyLock::new(|| html::selector("#loggedas a"));
static ACTIVE_USER_LINK: LazyLock<Selector> = LazyLock::new(|| html::selector("a.user.active"));
static LOGOUT_LINK: LazyLock<Selector> = LazyLock::new(|| html::selector("a.logout"));
static USER_HREF: LazyLock<Regex> = LazyLock::new(|| html::pattern(r"/users/(\d+)"));

/// The account the session is logged in as
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// Numeric user ID taken from the `/users/<id>` link
    pub id: Option<String>,
    /// Login or display name shown in the header
    pub name: Option<String>,
}

/// Successful login details
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub redirect_url: String,
    pub current_user: Option<CurrentUser>,
    pub manual: bool,
}

#[derive(Debug, Default)]
struct LoginState {
    logged_in: bool,
    user: Option<CurrentUser>,
}

fn read_login_state(doc: &Html) -> LoginState {
    let logged_in = doc.select(&LOGGED_AS).next().is_some()
        || doc.select(&ACTIVE_USER_LINK).next().is_some()
        || doc.select(&LOGOUT_LINK).next().is_some();

    let user = doc
        .select(&LOGGED_AS_LINK)
        .chain(doc.select(&ACTIVE_USER_LINK))
        .find_map(|link| {
            let href = link.value().attr("href")?;
            let id = USER_HREF.captures(href)?.get(1)?.as_str().to_string();
            let name = html::text_of(link);
            Some(CurrentUser {
                id: Some(id),
                name: (!name.is_empty()).then_some(name),
            })
        });

    LoginState { logged_in, user }
}

/// One browsing session against the configured Redmine instance
#[derive(Debug)]
pub struct RedmineSession {
    browser: HttpBrowser,
    config: Arc<RedmineConfig>,
    login_path: String,
    authenticated: bool,
    current_user: Option<CurrentUser>,
    started_at: Instant,
    last_activity: Instant,
}

impl RedmineSession {
    pub fn new(config: Arc<RedmineConfig>) -> RedmineMcpResult<Self> {
        let browser = HttpBrowser::new(&config)?;
        let login_path = Url::parse(&config.login_url())?.path().to_string();
        let now = Instant::now();

        Ok(Self {
            browser,
            config,
            login_path,
            authenticated: false,
            current_user: None,
            started_at: now,
            last_activity: now,
        })
    }

    pub fn config(&self) -> &RedmineConfig {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn current_user(&self) -> Option<&CurrentUser> {
        self.current_user.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Absolute URL for a path under the instance root
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Hand a `name=value` session cookie to the browser's jar
    pub fn add_cookie(&self, cookie: &str) {
        self.browser.add_cookie(cookie);
    }

    fn is_login_page(&self, url: &Url) -> bool {
        url.path().trim_end_matches('/') == self.login_path.trim_end_matches('/')
    }

    /// Log in with credentials, or wait for out-of-band authentication when
    /// both are empty.
    #[instrument(skip(self, password))]
    pub async fn login(&mut self, username: &str, password: &str) -> RedmineMcpResult<LoginOutcome> {
        let manual = match (username.is_empty(), password.is_empty()) {
            (true, true) => true,
            (false, false) => false,
            (true, false) => {
                return Err(RedmineMcpError::invalid_param(
                    "username",
                    "Username is required when a password is given. Pass both empty for manual login.",
                ))
            }
            (false, true) => {
                return Err(RedmineMcpError::invalid_param(
                    "password",
                    "Password is required when a username is given. Pass both empty for manual login.",
                ))
            }
        };

        let projects_url = self.config.projects_url();
        let back_url = vec![("back_url".to_string(), projects_url.clone())];
        info!("Navigating to login page with redirect to {}", projects_url);
        let page = self.browser.get(&self.config.login_url(), &back_url).await?;

        if !self.is_login_page(&page.url) {
            let state = read_login_state(&page.document());
            if state.logged_in {
                info!("Already authenticated, login page redirected to {}", page.url);
                return Ok(self.complete(page.url.to_string(), state.user, manual));
            }
        }

        if manual {
            info!(
                "No credentials supplied; waiting up to {}s for out-of-band authentication",
                self.config.login_wait_seconds
            );
        } else {
            let form = FormSnapshot::find(
                &page.document(),
                &["#login-form form", "form[action*=\"login\"]"],
            );
            let mut form = form.ok_or_else(|| {
                RedmineMcpError::auth("Login form not found on the login page")
            })?;

            form.set_values("username", &[username.to_string()]);
            form.set_values("password", &[password.to_string()]);
            let action = if form.action.is_empty() {
                self.config.login_url()
            } else {
                form.action.clone()
            };

            let result = self
                .browser
                .post_form(&action, &form.pairs_with_submit("login"))
                .await?;
            let (state, flash) = {
                let doc = result.document();
                (read_login_state(&doc), html::flash_error(&doc))
            };

            if state.logged_in && !self.is_login_page(&result.url) {
                return Ok(self.complete(result.url.to_string(), state.user, manual));
            }
            if let Some(flash) = flash {
                warn!("Login rejected by Redmine: {}", flash);
                return Err(RedmineMcpError::auth(flash));
            }
            debug!("Credentials submitted, waiting for authentication to complete");
        }

        let mut poller = Poller::new(self.config.login_wait(), self.config.poll_interval());
        while poller.next_attempt().await {
            let page = self.browser.get(&projects_url, &[]).await?;
            if self.is_login_page(&page.url) {
                continue;
            }
            let state = read_login_state(&page.document());
            if state.logged_in {
                return Ok(self.complete(page.url.to_string(), state.user, manual));
            }
        }

        Err(RedmineMcpError::auth(format!(
            "Authentication timeout after {} seconds. Please check credentials and try again.",
            self.config.login_wait_seconds
        )))
    }

    fn complete(&mut self, redirect_url: String, user: Option<CurrentUser>, manual: bool) -> LoginOutcome {
        self.authenticated = true;
        self.current_user = user.clone();
        self.last_activity = Instant::now();
        info!(
            "Authenticated as {}",
            user.as_ref()
                .and_then(|u| u.name.as_deref())
                .unwrap_or("unknown user")
        );
        LoginOutcome {
            redirect_url,
            current_user: user,
            manual,
        }
    }

    /// Post the logout form when logged in and forget the login state.
    /// Never fails; transport errors are only logged.
    #[instrument(skip(self))]
    pub async fn logout(&mut self) {
        if self.authenticated {
            let mut pairs = Vec::new();
            if let Some(token) = self.browser.csrf_token() {
                pairs.push(("authenticity_token".to_string(), token.to_string()));
            }
            let logout_url = self.config.logout_url();
            if let Err(e) = self.browser.post_form(&logout_url, &pairs).await {
                warn!("Logout request failed, dropping session anyway: {}", e);
            }
        }
        self.expire();
    }

    fn expire(&mut self) {
        self.authenticated = false;
        self.current_user = None;
    }

    fn ensure_active(&mut self) -> RedmineMcpResult<()> {
        if !self.authenticated {
            return Err(RedmineMcpError::not_authenticated());
        }
        if self.last_activity.elapsed() > Duration::from_secs(self.config.session_timeout_seconds) {
            warn!("Session idle for longer than {}s", self.config.session_timeout_seconds);
            self.expire();
            return Err(RedmineMcpError::session_expired());
        }
        Ok(())
    }

    fn check_landing(&mut self, page: Page) -> RedmineMcpResult<Page> {
        if page.status == StatusCode::UNAUTHORIZED {
            warn!("Redmine answered 401 for {} - session expired", page.url);
            self.expire();
            return Err(RedmineMcpError::session_expired());
        }
        if self.is_login_page(&page.url) {
            warn!("Redirected to login page - session expired");
            self.expire();
            return Err(RedmineMcpError::session_expired());
        }
        self.last_activity = Instant::now();
        Ok(page)
    }

    /// Log out after a failure that leaves the browser unusable, so the
    /// next call has to start a new session
    async fn abandon(&mut self, error: RedmineMcpError) -> RedmineMcpError {
        if error.is_fatal() {
            warn!("Abandoning browser session: {}", error);
            self.logout().await;
        }
        error
    }

    /// Authenticated GET; landing on the login page expires the session
    pub async fn open(&mut self, target: &str, query: &[(String, String)]) -> RedmineMcpResult<Page> {
        self.ensure_active()?;
        match self.browser.get(target, query).await {
            Ok(page) => self.check_landing(page),
            Err(e) => Err(self.abandon(e).await),
        }
    }

    /// Authenticated form POST; landing on the login page expires the session
    pub async fn submit(&mut self, action: &str, pairs: &[(String, String)]) -> RedmineMcpResult<Page> {
        self.ensure_active()?;
        match self.browser.post_form(action, pairs).await {
            Ok(page) => self.check_landing(page),
            Err(e) => Err(self.abandon(e).await),
        }
    }
}

impl Drop for RedmineSession {
    fn drop(&mut self) {
        debug!(
            "Releasing Redmine session after {}s (authenticated: {})",
            self.started_at.elapsed().as_secs(),
            self.authenticated
        );
    }
}

/// Snapshot of the session slot for status reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub authenticated: bool,
    pub current_user: Option<CurrentUser>,
    pub session_age_seconds: Option<u64>,
}

/// Serialises access to the single session
#[derive(Debug)]
pub struct SessionManager {
    config: Arc<RedmineConfig>,
    slot: Mutex<Option<RedmineSession>>,
}

impl SessionManager {
    pub fn new(config: Arc<RedmineConfig>) -> Self {
        Self {
            config,
            slot: Mutex::new(None),
        }
    }

    /// Replace any existing session with a freshly logged-in one
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        session_cookie: Option<&str>,
    ) -> RedmineMcpResult<LoginOutcome> {
        let mut slot = self.slot.lock().await;

        if let Some(mut previous) = slot.take() {
            info!("Closing previous session before logging in again");
            previous.logout().await;
        }

        let mut session = RedmineSession::new(Arc::clone(&self.config))?;
        if let Some(cookie) = session_cookie.filter(|c| !c.trim().is_empty()) {
            session.add_cookie(cookie.trim());
        }

        let outcome = session.login(username, password).await?;
        *slot = Some(session);
        Ok(outcome)
    }

    /// Log out and drop the session. Returns whether one was active.
    pub async fn logout(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(mut session) => {
                let was_active = session.is_authenticated();
                session.logout().await;
                was_active
            }
            None => false,
        }
    }

    /// Exclusive access to the session slot for one operation
    pub async fn lock(&self) -> MutexGuard<'_, Option<RedmineSession>> {
        self.slot.lock().await
    }

    pub async fn status(&self) -> SessionStatus {
        let slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(session) => SessionStatus {
                authenticated: session.is_authenticated(),
                current_user: session.current_user().cloned(),
                session_age_seconds: Some(session.age().as_secs()),
            },
            None => SessionStatus {
                authenticated: false,
                current_user: None,
                session_age_seconds: None,
            },
        }
    }
}

/// The logged-in session held in a locked slot
pub fn active(slot: &mut Option<RedmineSession>) -> RedmineMcpResult<&mut RedmineSession> {
    match slot {
        Some(session) if session.is_authenticated() => Ok(session),
        _ => Err(RedmineMcpError::not_authenticated()),
    }
}
