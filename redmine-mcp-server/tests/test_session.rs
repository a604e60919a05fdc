/// Login, logout and session expiry against a fake Redmine instance
mod common;

use common::{layout, FakeRedmine, PASSWORD, USERNAME};
use redmine_mcp_server::config::RedmineConfig;
use redmine_mcp_server::tools::{GetIssueDetailsParams, LoginParams};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_login_with_credentials() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.connect().await;

    let result = server
        .redmine_login(LoginParams {
            username: Some(USERNAME.to_string()),
            password: Some(PASSWORD.to_string()),
            session_cookie: None,
        })
        .await
        .unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.current_user_id.as_deref(), Some("5"));
    assert_eq!(result.current_user_name.as_deref(), Some("jsmith"));
    assert!(result.redirect_url.unwrap().ends_with("/projects"));

    let info = server.get_server_info().await.unwrap();
    assert!(info.session.authenticated);
}

#[tokio::test]
async fn test_login_rejected_credentials() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.connect().await;

    let result = server
        .redmine_login(LoginParams {
            username: Some(USERNAME.to_string()),
            password: Some("wrong".to_string()),
            session_cookie: None,
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.message.contains("Invalid user or password"));

    let projects = server.get_projects().await.unwrap();
    assert!(!projects.success);
    assert!(projects.message.contains("Not authenticated"));
}

#[tokio::test]
async fn test_login_requires_both_credentials() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.connect().await;

    let result = server
        .redmine_login(LoginParams {
            username: Some(USERNAME.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.message.contains("password"));
    assert!(fake.requests("POST", "/login").await.is_empty());
}

#[tokio::test]
async fn test_manual_login_waits_for_logged_in_page() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.connect().await;

    let result = server.redmine_login(LoginParams::default()).await.unwrap();

    assert!(result.success, "{}", result.message);
    assert_eq!(result.current_user_id.as_deref(), Some("5"));
    assert!(fake.requests("POST", "/login").await.is_empty());
}

#[tokio::test]
async fn test_manual_login_times_out() {
    let fake = FakeRedmine::start().await;
    let server = fake.connect().await;

    let result = server.redmine_login(LoginParams::default()).await.unwrap();

    assert!(!result.success);
    assert!(result.message.contains("Authentication timeout after 1 seconds"));
    assert!(!server.get_server_info().await.unwrap().session.authenticated);
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.logged_in().await;

    let first = server.logout().await.unwrap();
    assert!(first.success);
    assert_eq!(fake.requests("POST", "/logout").await.len(), 1);

    let second = server.logout().await.unwrap();
    assert!(second.success);
    assert_eq!(fake.requests("POST", "/logout").await.len(), 1);

    let projects = server.get_projects().await.unwrap();
    assert!(!projects.success);
}

#[tokio::test]
async fn test_relogin_replaces_session() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.logged_in().await;

    let again = server
        .redmine_login(LoginParams {
            username: Some(USERNAME.to_string()),
            password: Some(PASSWORD.to_string()),
            session_cookie: None,
        })
        .await
        .unwrap();

    assert!(again.success);
    assert_eq!(fake.requests("POST", "/logout").await.len(), 1);
    assert_eq!(fake.requests("POST", "/login").await.len(), 2);
}

#[tokio::test]
async fn test_redirect_to_login_expires_session() {
    let fake = FakeRedmine::with_login().await;
    fake.redirect("GET", "/issues/99", "/login?back_url=%2Fissues%2F99")
        .await;
    let server = fake.logged_in().await;

    let details = server
        .get_issue_details(GetIssueDetailsParams {
            issue_id: "99".to_string(),
        })
        .await
        .unwrap();
    assert!(!details.success);
    assert!(details.message.contains("Session expired"));

    let projects = server.get_projects().await.unwrap();
    assert!(!projects.success);
    assert!(projects.message.contains("Not authenticated"));
}

#[tokio::test]
async fn test_unauthorized_status_expires_session() {
    let fake = FakeRedmine::with_login().await;
    fake.status("/issues/401", 401).await;
    let server = fake.logged_in().await;

    let details = server
        .get_issue_details(GetIssueDetailsParams {
            issue_id: "401".to_string(),
        })
        .await
        .unwrap();
    assert!(!details.success);
    assert!(details.message.contains("Session expired"));
    assert!(!server.get_server_info().await.unwrap().session.authenticated);
}

#[tokio::test]
async fn test_idle_session_expires() {
    let fake = FakeRedmine::with_login().await;
    let server = fake
        .logged_in_with(RedmineConfig {
            session_timeout_seconds: 1,
            ..fake.config()
        })
        .await;
    assert!(server.get_projects().await.unwrap().success);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let idle = server.get_projects().await.unwrap();
    assert!(!idle.success);
    assert!(idle.message.contains("Session expired"));

    let after = server.get_projects().await.unwrap();
    assert!(after.message.contains("Not authenticated"));
    assert_eq!(fake.requests("GET", "/projects").await.len(), 2);
}

#[tokio::test]
async fn test_off_origin_redirect_abandons_session() {
    let fake = FakeRedmine::with_login().await;
    let elsewhere = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(layout(true, ""), "text/html"))
        .mount(&elsewhere)
        .await;
    fake.redirect("GET", "/issues/7", &format!("{}/sso", elsewhere.uri()))
        .await;
    let server = fake.logged_in().await;

    let err = server
        .get_issue_details(GetIssueDetailsParams {
            issue_id: "7".to_string(),
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("left the Redmine instance"), "{}", err);

    let projects = server.get_projects().await.unwrap();
    assert!(!projects.success);
    assert!(projects.message.contains("Not authenticated"));
    assert_eq!(fake.requests("POST", "/logout").await.len(), 1);
}

#[tokio::test]
async fn test_non_html_response_abandons_session() {
    let fake = FakeRedmine::with_login().await;
    Mock::given(method("GET"))
        .and(path("/issues/8"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("%PDF-1.4", "application/pdf"))
        .mount(&fake.server)
        .await;
    let server = fake.logged_in().await;

    let result = server
        .get_issue_details(GetIssueDetailsParams {
            issue_id: "8".to_string(),
        })
        .await;
    assert!(result.is_err());
    assert!(!server.get_server_info().await.unwrap().session.authenticated);
}

#[tokio::test]
async fn test_projects_listing() {
    let fake = FakeRedmine::with_login().await;
    let server = fake.logged_in().await;

    let result = server.get_projects().await.unwrap();

    assert!(result.success, "{}", result.message);
    let ids: Vec<&str> = result.projects.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["demo", "ops"]);
    assert_eq!(result.projects[0].description, "Demo project");
}

#[tokio::test]
async fn test_missing_page_is_reported_in_band() {
    let fake = FakeRedmine::with_login().await;
    fake.status("/issues/404", 404).await;
    let server = fake.logged_in().await;

    let details = server
        .get_issue_details(GetIssueDetailsParams {
            issue_id: "#404".to_string(),
        })
        .await
        .unwrap();

    assert!(!details.success);
    assert!(details.message.contains("Not found"));
    assert!(server.get_server_info().await.unwrap().session.authenticated);
}
