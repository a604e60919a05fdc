/// Common utilities for Redmine MCP Server integration tests
///
/// [`FakeRedmine`] serves the handful of Redmine pages the tools navigate
/// from a wiremock server. [`McpTestClient`] drives the real binary over STDIO.
use redmine_mcp_server::config::RedmineConfig;
use redmine_mcp_server::tools::LoginParams;
use redmine_mcp_server::RedmineMcpServer;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

pub const USERNAME: &str = "jsmith";
pub const PASSWORD: &str = "secret";

/// Wrap page content in the Redmine layout, with the account header when logged in
#[allow(dead_code)]
pub fn layout(logged_in: bool, content: &str) -> String {
    let account = if logged_in {
        r#"<div id="account"><ul>
             <li><a class="my-account" href="/my/account">My account</a></li>
             <li><a class="logout" rel="nofollow" data-method="post" href="/logout">Sign out</a></li></ul></div>
           <div id="loggedas">Logged in as <a class="user active" href="/users/5">jsmith</a></div>"#
    } else {
        r#"<div id="account"><ul><li><a class="login" href="/login">Sign in</a></li></ul></div>"#
    };
    format!(
        r#"<!DOCTYPE html><html><head><title>Redmine</title>
           <meta name="csrf-param" content="authenticity_token" />
           <meta name="csrf-token" content="page-token" /></head>
           <body><div id="wrapper"><div id="top-menu">{}</div>
           <div id="main"><div id="content">{}</div></div></div></body></html>"#,
        account, content
    )
}

#[allow(dead_code)]
pub fn login_page(flash: Option<&str>) -> String {
    let flash = flash
        .map(|m| format!(r#"<div class="flash error" id="flash_error">{}</div>"#, m))
        .unwrap_or_default();
    layout(
        false,
        &format!(
            r#"{}<div id="login-form"><form action="/login" accept-charset="UTF-8" method="post">
                 <input type="hidden" name="authenticity_token" value="login-token" />
                 <input type="hidden" name="back_url" value="http://localhost/projects" />
                 <label for="username">Login</label><input type="text" name="username" id="username" />
                 <label for="password">Password</label><input type="password" name="password" id="password" />
                 <input type="submit" name="login" value="Login" id="login-submit" />
               </form></div>"#,
            flash
        ),
    )
}

#[allow(dead_code)]
pub fn projects_page() -> String {
    layout(
        true,
        r#"<h2>Projects</h2><div id="projects-index"><ul class="projects root">
             <li class="root"><div class="root"><a href="/projects/demo" class="project root leaf">Demo</a>
               <div class="wiki description"><p>Demo project</p></div></div></li>
             <li class="root"><div class="root"><a href="/projects/ops" class="project root leaf">Operations</a></div></li>
           </ul></div>"#,
    )
}

/// The issue form as Redmine renders it for one tracker.
///
/// Bug (1) carries a required "Customer" custom field, Feature (2) does not.
/// An `edit` form additionally carries the notes textarea and the stored
/// customer value.
#[allow(dead_code)]
pub fn issue_form(tracker: &str, action: &str, subject: &str, edit: bool) -> String {
    let option = |value: &str, name: &str| {
        let selected = if value == tracker { r#" selected="selected""# } else { "" };
        format!(r#"<option value="{}"{}>{}</option>"#, value, selected, name)
    };
    let customer = if tracker == "1" {
        format!(
            r#"<p><label for="issue_custom_field_values_3"><span>Customer</span><span class="required"> *</span></label>
                 <input type="text" id="issue_custom_field_values_3" name="issue[custom_field_values][3]" value="{}" /></p>"#,
            if edit { "ACME" } else { "" }
        )
    } else {
        String::new()
    };
    let (form_class, method_field, notes, commit) = if edit {
        (
            "edit_issue",
            r#"<input type="hidden" name="_method" value="patch" />"#,
            r#"<fieldset><legend>Notes</legend>
                 <textarea id="issue_notes" name="issue[notes]" cols="60" rows="5"></textarea></fieldset>"#,
            "Submit",
        )
    } else {
        ("new_issue", "", "", "Create")
    };
    layout(
        true,
        &format!(
            r#"<h2>{heading}</h2>
               <form class="{form_class}" id="issue-form" action="{action}" accept-charset="UTF-8" method="post">
                 {method_field}
                 <input type="hidden" name="authenticity_token" value="form-token" />
                 <input type="hidden" name="form_update_triggered_by" value="" />
                 <div class="box tabular"><div id="all_attributes">
                   <p><label for="issue_tracker_id">Tracker<span class="required"> *</span></label>
                     <select id="issue_tracker_id" name="issue[tracker_id]">{bug}{feature}</select></p>
                   <p><label for="issue_subject">Subject<span class="required"> *</span></label>
                     <input type="text" id="issue_subject" name="issue[subject]" size="80" maxlength="255" value="{subject}" /></p>
                   <p><label for="issue_description">Description</label>
                     <textarea id="issue_description" name="issue[description]" cols="60" rows="10"></textarea></p>
                   <p><label for="issue_status_id">Status<span class="required"> *</span></label>
                     <select id="issue_status_id" name="issue[status_id]">
                       <option selected="selected" value="1">New</option><option value="2">In Progress</option></select></p>
                   <p><label for="issue_priority_id">Priority<span class="required"> *</span></label>
                     <select id="issue_priority_id" name="issue[priority_id]">
                       <option value="1">Low</option><option selected="selected" value="2">Normal</option><option value="3">High</option></select></p>
                   <p><label for="issue_assigned_to_id">Assignee</label>
                     <select id="issue_assigned_to_id" name="issue[assigned_to_id]"><option value=""></option>
                       <option value="5">&lt;&lt; me &gt;&gt;</option><option value="5">John Smith</option><option value="7">Jane Doe</option></select></p>
                   <p><label for="issue_start_date">Start date</label>
                     <input type="date" id="issue_start_date" name="issue[start_date]" size="10" value="" /></p>
                   {customer}
                 </div></div>
                 {notes}
                 <input type="submit" name="commit" value="{commit}" />
               </form>"#,
            heading = if edit { "Bug #12" } else { "New issue" },
            form_class = form_class,
            action = action,
            method_field = method_field,
            bug = option("1", "Bug"),
            feature = option("2", "Feature"),
            subject = subject,
            customer = customer,
            notes = notes,
            commit = commit,
        ),
    )
}

#[allow(dead_code)]
pub fn issue_page() -> String {
    layout(
        true,
        r#"<h2>Bug #12</h2>
           <div class="issue tracker-1 status-1 priority-3 details">
             <div class="subject"><div><h3>Printer on fire</h3></div></div>
             <p class="author">Added by <a class="user active" href="/users/5">John Smith</a>
               <a title="05/01/2024 10:00 AM" href="/projects/demo/activity">3 days</a> ago.</p>
             <div class="attributes">
               <div class="status attribute"><div class="label">Status:</div><div class="value">New</div></div>
               <div class="priority attribute"><div class="label">Priority:</div><div class="value">High</div></div>
               <div class="assigned-to attribute"><div class="label">Assignee:</div><div class="value"><a class="user active" href="/users/7">Jane Doe</a></div></div>
               <div class="cf_3 attribute"><div class="label"><span>Customer</span>:</div><div class="value">ACME</div></div>
             </div>
             <div class="description"><div class="wiki"><p>It is burning.</p></div></div>
           </div>"#,
    )
}

/// An issue list with the given `(id, subject)` rows and the `(1-n/total)` counter
#[allow(dead_code)]
pub fn issue_list(rows: &[(u32, &str)], total: usize) -> String {
    let body: String = rows
        .iter()
        .map(|(id, subject)| {
            format!(
                r#"<tr id="issue-{id}" class="hascontextmenu odd issue tracker-1 status-1 priority-2">
                     <td class="checkbox hide-when-print"><input type="checkbox" name="ids[]" value="{id}" /></td>
                     <td class="id"><a href="/issues/{id}">{id}</a></td><td class="project">Demo</td>
                     <td class="tracker">Bug</td><td class="status">New</td><td class="priority">Normal</td>
                     <td class="subject"><a href="/issues/{id}">{subject}</a></td>
                     <td class="assigned_to"></td><td class="updated_on">05/01/2024 10:00 AM</td></tr>"#,
                id = id,
                subject = subject
            )
        })
        .collect();
    let counter = if rows.is_empty() {
        String::new()
    } else {
        format!(
            r#"<span class="pagination"><ul class="pages"><li class="current"><span>1</span></li></ul>
               <span><span class="items">(1-{}/{})</span></span></span>"#,
            rows.len(),
            total
        )
    };
    let table = if rows.is_empty() {
        r#"<p class="nodata">No data to display</p>"#.to_string()
    } else {
        format!(
            r#"<div class="autoscroll"><table class="list issues odd-even sort-by-id sort-desc"><tbody>{}</tbody></table></div>"#,
            body
        )
    };
    layout(true, &format!("<h2>Issues</h2>{}{}", table, counter))
}

#[allow(dead_code)]
pub fn project_overview() -> String {
    layout(
        true,
        r#"<h2>Overview</h2>
           <div class="splitcontentright"><div class="members box"><h3 class="icon icon-group">Members</h3>
             <p><span class="label">Manager:</span> <a class="user active" href="/users/5">John Smith</a></p>
             <p><span class="label">Developer:</span> <a class="user active" href="/users/5">John Smith</a>, <a class="user active" href="/users/7">Jane Doe</a></p>
           </div></div>"#,
    )
}

/// A fake Redmine instance on a local port
#[allow(dead_code)]
pub struct FakeRedmine {
    pub server: MockServer,
}

#[allow(dead_code)]
impl FakeRedmine {
    /// An instance that only knows its login page
    pub async fn start() -> Self {
        let fake = Self {
            server: MockServer::start().await,
        };
        fake.page("/login", login_page(None)).await;
        Mock::given(method("POST"))
            .and(path("/logout"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/"))
            .mount(&fake.server)
            .await;
        fake.page("/", layout(false, "<h2>Home</h2>")).await;
        fake
    }

    /// An instance that accepts `jsmith` / `secret` and lands on `/projects`
    pub async fn with_login() -> Self {
        let fake = Self::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_string_contains(format!("password={}", PASSWORD)))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/projects"))
            .with_priority(1)
            .mount(&fake.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(html(login_page(Some("Invalid user or password"))))
            .mount(&fake.server)
            .await;
        fake.page("/projects", projects_page()).await;
        fake
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Configuration pointing at this instance with short waits
    pub fn config(&self) -> RedmineConfig {
        RedmineConfig {
            base_url: self.uri(),
            request_timeout_seconds: 5,
            login_wait_seconds: 1,
            field_discovery_timeout_seconds: 1,
            poll_interval_millis: 50,
            ..Default::default()
        }
    }

    pub async fn connect(&self) -> RedmineMcpServer {
        RedmineMcpServer::with_config(self.config())
            .await
            .expect("server should accept the fake instance config")
    }

    /// A server already logged in as `jsmith`
    pub async fn logged_in(&self) -> RedmineMcpServer {
        self.logged_in_with(self.config()).await
    }

    pub async fn logged_in_with(&self, config: RedmineConfig) -> RedmineMcpServer {
        let server = RedmineMcpServer::with_config(config)
            .await
            .expect("server should accept the fake instance config");
        let login = server
            .redmine_login(LoginParams {
                username: Some(USERNAME.to_string()),
                password: Some(PASSWORD.to_string()),
                session_cookie: None,
            })
            .await
            .expect("login call");
        assert!(login.success, "login failed: {}", login.message);
        server
    }

    /// Serve an HTML page for GET `route`
    pub async fn page(&self, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(html(body))
            .mount(&self.server)
            .await;
    }

    /// Serve an HTML page for GET `route` only when `key=value` is in the query
    pub async fn page_with_query(&self, route: &str, key: &str, value: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route))
            .and(query_param(key, value))
            .respond_with(html(body))
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Answer `verb route` with a redirect
    pub async fn redirect(&self, verb: &str, route: &str, location: &str) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", location))
            .mount(&self.server)
            .await;
    }

    /// Answer GET `route` with a bare status code
    pub async fn status(&self, route: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_raw("<html></html>", "text/html"))
            .mount(&self.server)
            .await;
    }

    /// Requests received for `verb route`, in arrival order
    pub async fn requests(&self, verb: &str, route: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == route)
            .collect()
    }
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

/// Decoded `application/x-www-form-urlencoded` body of a request
#[allow(dead_code)]
pub fn form_pairs(request: &Request) -> Vec<(String, String)> {
    url::form_urlencoded::parse(&request.body)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Values sent for one form parameter
#[allow(dead_code)]
pub fn form_values(request: &Request, name: &str) -> Vec<String> {
    form_pairs(request)
        .into_iter()
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v)
        .collect()
}

/// Decoded query pairs of a request
#[allow(dead_code)]
pub fn query_pairs(request: &Request) -> Vec<(String, String)> {
    request
        .url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// MCP Test Client for sending JSON-RPC requests to the server binary
#[allow(dead_code)]
pub struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

#[allow(dead_code)]
impl McpTestClient {
    /// Spawn the server against the instance named by `REDMINE_URL` (or `.env`)
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv::from_filename(".env").ok();
        let redmine_url = std::env::var("REDMINE_URL")?;
        let mut env = vec![("REDMINE_URL".to_string(), redmine_url)];
        for name in ["REDMINE_USERNAME", "REDMINE_PASSWORD", "REDMINE_SESSION_COOKIE"] {
            if let Ok(value) = std::env::var(name) {
                env.push((name.to_string(), value));
            }
        }
        Self::spawn(&env)
    }

    /// Spawn the server with exactly the given environment overrides
    pub fn spawn(env: &[(String, String)]) -> Result<Self, Box<dyn std::error::Error>> {
        let mut command = Command::new(env!("CARGO_BIN_EXE_redmine-mcp-server"));
        command
            .env_remove("REDMINE_USERNAME")
            .env_remove("REDMINE_PASSWORD")
            .env_remove("REDMINE_SESSION_COOKIE")
            .env("RUST_LOG", "error")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null()); // Suppress stderr for cleaner test output
        for (name, value) in env {
            command.env(name, value);
        }
        let mut child = command.spawn()?;

        let stdin = child.stdin.take().ok_or("Failed to open stdin")?;
        let stdout = child.stdout.take().ok_or("Failed to open stdout")?;

        let mut client = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        client.initialize()?;

        Ok(client)
    }

    /// Initialize the MCP session
    fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "rust-test-client",
                    "version": "1.0.0"
                }
            }
        });

        self.send_request(&request)?;
        let response = self.read_response()?;

        if response.get("error").is_some() {
            return Err(format!("Initialization failed: {:?}", response["error"]).into());
        }

        Ok(())
    }

    /// Call an MCP tool
    pub fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let request_id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);

        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": arguments
            }
        });

        self.send_request(&request)?;
        self.read_response()
    }

    fn send_request(&mut self, request: &Value) -> Result<(), Box<dyn std::error::Error>> {
        let request_str = serde_json::to_string(request)?;
        writeln!(self.stdin, "{}", request_str)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;

        if line.is_empty() {
            return Err("Server closed connection".into());
        }

        Ok(serde_json::from_str(&line)?)
    }

    /// Extract the JSON tool result from the text content of a response
    pub fn extract_tool_result(response: &Value) -> Result<Value, String> {
        if std::env::var("RUST_TEST_DEBUG").is_ok() {
            eprintln!("Full response: {}", response);
        }

        if let Some(error) = response.get("error") {
            return Err(format!("Tool call failed: {:?}", error));
        }

        let result = response.get("result").ok_or("No result in response")?;

        let content = result
            .get("content")
            .ok_or("No content in result")?
            .as_array()
            .ok_or("Content is not an array")?;

        let text = content
            .iter()
            .find(|item| item.get("type") == Some(&Value::String("text".to_string())))
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .ok_or("No text content found")?;

        serde_json::from_str(text)
            .map_err(|e| format!("Failed to parse tool result JSON: {}. Text was: {}", e, text))
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        // Kill the server process when the client is dropped
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Project used by the live tests
#[allow(dead_code)]
pub fn test_project_id() -> String {
    std::env::var("TEST_PROJECT_ID").unwrap_or_else(|_| "demo".to_string())
}
