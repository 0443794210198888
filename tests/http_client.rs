use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;

use activity_mirror::activity_sync::{MergeStrategy, run_sync};
use activity_mirror::config::{Config, Endpoints};
use activity_mirror::error::{AuthError, UpstreamError};
use activity_mirror::garmin_client::{ActivityApi, GarminClient};
use activity_mirror::session::{AuthBackend, Credential, load_cached};
use reqwest::StatusCode;
use tempdir::TempDir;

/// One request as seen by the responder.
#[derive(Debug)]
struct Seen {
    request_line: String,
    /// Header block, lowercased.
    headers: String,
    body: String,
}

/// Serve `responses` in order, one connection each, and hand back the
/// requests that were received.
fn spawn_responder(responses: Vec<(u16, String)>) -> (String, thread::JoinHandle<Vec<Seen>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().unwrap();
            seen.push(read_request(&mut stream));
            let reply = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(reply.as_bytes()).unwrap();
        }
        seen
    });
    (format!("http://{addr}"), handle)
}

fn read_request(stream: &mut impl Read) -> Seen {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "connection closed before headers ended");
        raw.extend_from_slice(&buf[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let (request_line, headers) = head.split_once("\r\n").unwrap_or((head.as_str(), ""));
    let headers = headers.to_lowercase();
    let content_length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while raw.len() < body_start + content_length {
        let n = stream.read(&mut buf).unwrap();
        assert!(n > 0, "connection closed before body ended");
        raw.extend_from_slice(&buf[..n]);
    }

    Seen {
        request_line: request_line.to_string(),
        headers,
        body: String::from_utf8_lossy(&raw[body_start..body_start + content_length]).to_string(),
    }
}

fn endpoints(base: &str) -> Endpoints {
    Endpoints {
        api_base: base.to_string(),
        token_url: format!("{base}/oauth-service/oauth/token"),
    }
}

fn credential(access: &str, expires_at: i64) -> Credential {
    Credential {
        token_type: "Bearer".to_string(),
        access_token: access.to_string(),
        refresh_token: "refresh-1".to_string(),
        expires_at,
        refresh_token_expires_at: i64::MAX,
    }
}

#[tokio::test]
async fn test_expired_snapshot_is_refreshed_before_first_call() {
    let token = r#"{"token_type": "Bearer", "access_token": "renewed", "refresh_token": "refresh-2", "expires_in": 3600}"#;
    let (base, server) = spawn_responder(vec![
        (200, token.to_string()),
        (200, "[]".to_string()),
    ]);
    let snapshot = credential("stale", 0).export().unwrap();

    let client = GarminClient::connect(&snapshot, &endpoints(&base)).await.unwrap();
    let activities = client.list_activities(0, 5, Some("running")).await.unwrap();
    client.close();
    assert!(activities.is_empty());

    let seen = server.join().unwrap();
    assert!(seen[0].request_line.starts_with("POST /oauth-service/oauth/token "));
    assert!(seen[0].body.contains("grant_type=refresh_token"));
    assert!(seen[0].body.contains("refresh_token=refresh-1"));

    assert!(seen[1].request_line.starts_with(
        "GET /activitylist-service/activities/search/activities?start=0&limit=5&activityType=running "
    ));
    assert!(seen[1].headers.contains("authorization: bearer renewed"));
}

#[tokio::test]
async fn test_list_without_filter_sends_no_activity_type() {
    let (base, server) = spawn_responder(vec![(200, "[]".to_string())]);
    let snapshot = credential("live", i64::MAX).export().unwrap();

    let client = GarminClient::connect(&snapshot, &endpoints(&base)).await.unwrap();
    client.list_activities(0, 200, None).await.unwrap();

    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].request_line.starts_with(
        "GET /activitylist-service/activities/search/activities?start=0&limit=200 "
    ));
    assert!(seen[0].headers.contains("authorization: bearer live"));
}

#[tokio::test]
async fn test_non_success_status_becomes_http_error() {
    let (base, server) = spawn_responder(vec![(500, "{}".to_string())]);
    let snapshot = credential("live", i64::MAX).export().unwrap();

    let client = GarminClient::connect(&snapshot, &endpoints(&base)).await.unwrap();
    let err = client.get_detail("42").await.unwrap_err();

    assert!(matches!(
        err,
        UpstreamError::Http { status } if status == StatusCode::INTERNAL_SERVER_ERROR
    ));
    assert_eq!(err.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));

    // A live token goes straight to the API without a refresh
    let seen = server.join().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].request_line.starts_with("GET /activity-service/activity/42 "));
}

struct PasswordOnly;

impl AuthBackend for PasswordOnly {
    fn resume(&self, cache_dir: &Path) -> Result<Credential, AuthError> {
        load_cached(cache_dir)
    }

    fn login(&self, _username: &str, _password: &str) -> Result<Credential, AuthError> {
        Ok(credential("from-login", i64::MAX))
    }
}

#[test]
fn test_run_sync_uses_login_credential_for_fetch_phase() {
    let list = r#"[{"activityId": 123, "activityName": "Morning Run",
        "activityType": {"typeKey": "running"}, "distance": 5000, "duration": 1800,
        "steps": 6000, "startTimeLocal": "2024-01-01 08:00:00"}]"#;
    let detail = r#"{"summaryDTO": {"averageHR": 150, "totalElevationGain": 42}}"#;
    let (base, server) = spawn_responder(vec![
        (200, list.to_string()),
        (200, detail.to_string()),
    ]);

    let dir = TempDir::new("run_sync").unwrap();
    let config = Config {
        username: "me".to_string(),
        password: "pw".to_string(),
        count: 10,
        output: dir.path().join("activities.csv"),
        strategy: MergeStrategy::Prepend,
        endpoints: endpoints(&base),
        only_running: false,
        token_dir: dir.path().join("tokens"),
    };

    let report = run_sync(&config, &PasswordOnly).unwrap();

    assert_eq!(report.listed, 1);
    assert_eq!(report.written, 1);
    assert!(
        fs::read_to_string(&config.output)
            .unwrap()
            .ends_with("\r\n123,Running,2024-01-01 08:00:00,5.0,6000,30.0,150,42\r\n")
    );
    assert_eq!(load_cached(&config.token_dir).unwrap().access_token, "from-login");

    let seen = server.join().unwrap();
    assert!(seen[0].request_line.contains("?start=0&limit=10 "));
    assert!(seen[1].request_line.starts_with("GET /activity-service/activity/123 "));
    assert!(seen.iter().all(|s| s.headers.contains("authorization: bearer from-login")));
}
