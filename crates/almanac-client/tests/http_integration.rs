use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use almanac_client::api::{DataApi, DirectoryApi, ExportApi, HttpApi, SearchApi, SessionApi};
use almanac_client::config::ServerConfig;
use almanac_client::export::{ExportKind, Exporter};
use almanac_client::model::{UpdateKind, UpdateRequest};
use almanac_client::session::{RestoreOutcome, SessionManager};
use almanac_client::{ClientError, Dashboard};
use serde_json::{json, Value};
use smol_str::SmolStr;
use tiny_http::{Header, Method, Response, Server};

const SESSION: &str = "tok-7f3a";

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    url: String,
    cookie: Option<String>,
    body: String,
}

fn json_header() -> Header {
    Header::from_bytes("Content-Type", "application/json").unwrap()
}

fn user_json() -> Value {
    json!({
        "id": 2,
        "username": "analyst",
        "role": "user",
        "permissions": ["month_filter", "export_excel"],
        "is_active": true,
        "valid_until": "20991231235959"
    })
}

fn handle(method: &Method, url: &str, cookie: Option<&str>, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let signed_in = cookie.is_some_and(|cookie| cookie.contains(&format!("session_id={SESSION}")));
    let json_response = |status: u16, value: Value| {
        Response::from_string(value.to_string())
            .with_status_code(status)
            .with_header(json_header())
    };
    match (method, url.split('?').next().unwrap_or(url)) {
        (Method::Post, "/api/auth/login") => {
            let payload: Value = serde_json::from_str(body).unwrap_or(Value::Null);
            if payload["username"] == "lapsed" {
                json_response(
                    403,
                    json!({"detail": "用户账号已过期，请联系管理员重新授权。管理员微信：yyongzf8"}),
                )
            } else if payload["password"] == "secret" {
                json_response(200, json!({"success": true, "user": user_json()})).with_header(
                    Header::from_bytes(
                        "Set-Cookie",
                        format!("session_id={SESSION}; HttpOnly; Max-Age=86400; Path=/; SameSite=lax"),
                    )
                    .unwrap(),
                )
            } else {
                json_response(401, json!({"detail": "用户名或密码错误"}))
            }
        }
        (Method::Get, "/api/auth/current-user") if signed_in => {
            json_response(200, json!({"success": true, "user": user_json()}))
        }
        (Method::Get, "/api/auth/current-user") => json_response(401, json!({"detail": "请先登录"})),
        (Method::Post, "/api/auth/logout") => json_response(200, json!({"success": true}))
            .with_header(
                Header::from_bytes(
                    "Set-Cookie",
                    r#"session_id=""; expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; Path=/"#,
                )
                .unwrap(),
            ),
        (Method::Get, "/api/stocks/search") => {
            let keyword = url
                .split_once("keyword=")
                .map(|(_, rest)| rest.split('&').next().unwrap_or(""))
                .unwrap_or("");
            let keyword = urlencoding::decode(keyword).unwrap().into_owned();
            json_response(
                200,
                json!({"success": true, "data": [
                    {"symbol": "600519", "ts_code": "600519.SH", "name": keyword, "exchange": "SSE"}
                ]}),
            )
        }
        (Method::Post, "/api/data/update") => json_response(
            200,
            json!({"success": true, "already_running": true, "message": "更新任务已在运行中"}),
        ),
        (Method::Get, "/api/data/progress") => json_response(
            200,
            json!({"success": true, "data": {"current": 3, "total": 4, "message": "更新中", "is_running": true}}),
        ),
        (Method::Post, "/api/export/month-filter") => Response::from_data(vec![0x50, 0x4b, 0x03, 0x04])
            .with_header(
                Header::from_bytes(
                    "Content-Disposition",
                    "attachment; filename*=UTF-8''1%E6%9C%88%E7%BB%9F%E8%AE%A1.xlsx",
                )
                .unwrap(),
            ),
        (Method::Get, "/api/users") => json_response(403, json!({"detail": "需要管理员权限"})),
        (Method::Get, "/api/system/config") => Response::from_string("<html>bad gateway</html>")
            .with_status_code(502),
        _ => json_response(404, json!({"detail": "Not Found"})),
    }
}

fn start_server() -> (String, Arc<Mutex<Vec<Recorded>>>) {
    let server = Server::http("127.0.0.1:0").expect("bind test server");
    let addr = server.server_addr().to_ip().expect("ip listener");
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_writer = Arc::clone(&log);
    thread::spawn(move || {
        for mut request in server.incoming_requests() {
            let mut body = String::new();
            let _ = request.as_reader().read_to_string(&mut body);
            let cookie = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("Cookie"))
                .map(|header| header.value.as_str().to_string());
            let method = request.method().clone();
            let url = request.url().to_string();
            log_writer.lock().unwrap().push(Recorded {
                method: method.to_string(),
                url: url.clone(),
                cookie: cookie.clone(),
                body: body.clone(),
            });
            let response = handle(&method, &url, cookie.as_deref(), &body);
            let _ = request.respond(response);
        }
    });
    (format!("http://{addr}"), log)
}

fn client(base_url: &str) -> HttpApi {
    HttpApi::new(&ServerConfig {
        base_url: SmolStr::new(base_url),
        timeout: Duration::from_secs(5),
    })
}

#[tokio::test(flavor = "current_thread")]
async fn session_cookie_follows_login_and_logout() {
    let (base_url, log) = start_server();
    let api = client(&base_url);
    let mut session = SessionManager::new(Arc::new(api.clone()), "support");

    assert_eq!(session.restore_session().await, RestoreOutcome::Unauthenticated);

    let err = session.login("analyst", "wrong").await.expect_err("bad password");
    assert_eq!(
        err,
        ClientError::Rejected {
            code: None,
            message: "用户名或密码错误".into()
        }
    );
    assert!(!api.has_session_cookie());

    let user = session.login("analyst", "secret").await.expect("login");
    assert_eq!(user.username, "analyst");
    assert!(user.has_permission("month_filter"));
    assert!(api.has_session_cookie());
    assert_eq!(session.restore_session().await, RestoreOutcome::Authenticated);

    session.logout().await;
    assert!(!api.has_session_cookie());
    assert_eq!(session.restore_session().await, RestoreOutcome::Unauthenticated);

    let log = log.lock().unwrap();
    let restores: Vec<_> = log
        .iter()
        .filter(|entry| entry.url == "/api/auth/current-user")
        .map(|entry| entry.cookie.clone())
        .collect();
    assert_eq!(
        restores,
        vec![None, Some(format!("session_id={SESSION}")), None]
    );
    let login = log
        .iter()
        .find(|entry| entry.url == "/api/auth/login")
        .expect("login request");
    assert_eq!(login.method, "POST");
    let payload: Value = serde_json::from_str(&login.body).expect("json body");
    assert_eq!(payload["username"], "analyst");
}

#[tokio::test(flavor = "current_thread")]
async fn expired_account_login_gets_the_renewal_notice() {
    let (base_url, _log) = start_server();
    let api = client(&base_url);
    let mut session = SessionManager::new(Arc::new(api.clone()), "WeChat yyongzf8");
    session.login("analyst", "secret").await.expect("login");

    let err = session.login("lapsed", "secret").await.expect_err("expired");
    assert_eq!(
        err,
        ClientError::AccountExpired {
            message: "Your account has expired. Contact WeChat yyongzf8 to renew access.".into()
        }
    );
    assert_eq!(session.current_user().map(|user| user.username.as_str()), Some("analyst"));
    assert!(api.has_session_cookie());

    let err = session.login("analyst", "wrong").await.expect_err("bad password");
    assert!(!err.is_session_terminal(), "{err:?}");
    assert!(session.is_authenticated());
}

#[tokio::test(flavor = "current_thread")]
async fn dashboard_boots_from_restored_session() {
    let (base_url, _log) = start_server();
    let api = client(&base_url);
    api.login("analyst", "secret").await.expect("login");

    let mut dashboard = Dashboard::new(SessionManager::new(Arc::new(api), "support"));
    let view = dashboard.boot().await;
    assert_eq!(
        view.active_tab().map(|tab| tab.as_str().to_string()).as_deref(),
        Some("month-filter")
    );
    assert!(view.export_enabled);
    assert!(!view.admin_controls);
}

#[tokio::test(flavor = "current_thread")]
async fn search_query_is_percent_encoded() {
    let (base_url, log) = start_server();
    let api = client(&base_url);
    let hits = api.search_stocks("贵州 茅台", 10).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].name, "贵州 茅台");
    assert_eq!(hits[0].display_symbol(), "600519");
    let url = log.lock().unwrap()[0].url.clone();
    assert!(url.ends_with("&limit=10"), "{url}");
    assert!(!url.contains(' '), "{url}");
}

#[tokio::test(flavor = "current_thread")]
async fn data_update_reports_running_job() {
    let (base_url, log) = start_server();
    let api = client(&base_url);
    let started = api
        .start_update(UpdateRequest {
            update_type: UpdateKind::Full,
            overwrite_mode: true,
        })
        .await
        .expect("start");
    assert!(started.already_running);
    let progress = api.update_progress().await.expect("progress");
    assert!(progress.is_running);
    assert!((progress.percent() - 75.0).abs() < f64::EPSILON);

    let body: Value = serde_json::from_str(&log.lock().unwrap()[0].body).expect("json body");
    assert_eq!(body, json!({"update_type": "full", "overwrite_mode": true}));
}

#[tokio::test(flavor = "current_thread")]
async fn export_uses_content_disposition_filename() {
    let (base_url, _log) = start_server();
    let api = client(&base_url);
    let user = api.login("analyst", "secret").await.expect("login");
    let exporter = Exporter::new(Arc::new(api));
    let download = exporter
        .download(Some(&user), ExportKind::MonthFilter, &json!({"month": 1}))
        .await
        .expect("download");
    assert_eq!(download.filename, "1月统计.xlsx");
    assert_eq!(download.bytes, vec![0x50, 0x4b, 0x03, 0x04]);
}

#[tokio::test(flavor = "current_thread")]
async fn http_errors_are_classified() {
    let (base_url, _log) = start_server();
    let api = client(&base_url);

    let denied = api.list_users().await.expect_err("forbidden");
    assert_eq!(
        denied,
        ClientError::PermissionDenied {
            message: "需要管理员权限".into()
        }
    );

    let gateway = api.system_config().await.expect_err("bad gateway");
    assert!(gateway.is_transport(), "{gateway:?}");

    let missing = api
        .export("/api/export/unknown", &json!({}))
        .await
        .expect_err("not found");
    assert_eq!(
        missing,
        ClientError::Rejected {
            code: None,
            message: "Not Found".into()
        }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn unreachable_server_is_a_transport_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let api = client(&format!("http://{addr}"));
    let mut session = SessionManager::new(Arc::new(api.clone()), "support");
    assert_eq!(session.restore_session().await, RestoreOutcome::Unauthenticated);
    assert!(api.current_user().await.expect_err("refused").is_transport());
}
