//! End-to-end pipeline tests against mock threat-intel and torrent servers
//!
//! Both remote sides are wiremock servers, so these run offline.

mod common;

use common::*;
use std::time::Duration;
use torrent_quarantine::audit::{ACTION_MALICIOUS_FILE_DELETED, ACTION_MALICIOUS_URL_BLOCKED};
use torrent_quarantine::threat_intel::url_id;
use torrent_quarantine::{AuditContext, DownloadStatus, InitiateDownload, ScanStatus};
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(15);

/// Serve `TORRENT_BYTES` at `/ubuntu.torrent`, returning the server and link
async fn torrent_host() -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ubuntu.torrent"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-bittorrent")
                .set_body_bytes(TORRENT_BYTES),
        )
        .mount(&server)
        .await;
    let link = format!("{}/ubuntu.torrent", server.uri());
    (server, link)
}

async fn mount_url_scan(vt: &MockServer, link: &str, malicious: bool) {
    let id = url_id(link);
    Mock::given(method("POST"))
        .and(path("/urls"))
        .and(header("x-apikey", TEST_API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_submitted("u-analysis")))
        .mount(vt)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/urls/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished_report(&id, malicious)))
        .mount(vt)
        .await;
}

async fn mount_domain_lookups(vt: &MockServer) {
    Mock::given(method("GET"))
        .and(path_regex(r"^/domains/[^/]+/votes$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(domain_votes()))
        .mount(vt)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/domains/[^/]+$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(domain_report("127.0.0.1")))
        .mount(vt)
        .await;
}

async fn mount_file_scan(vt: &MockServer, malicious: bool) {
    Mock::given(method("POST"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_submitted("f-analysis")))
        .mount(vt)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/files/[0-9a-f]{64}$"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(finished_report("payload-sha256", malicious)),
        )
        .mount(vt)
        .await;
}

fn torrent_request(link: &str) -> InitiateDownload {
    InitiateDownload {
        torrent_link: Some(link.to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn clean_torrent_is_promoted_to_storage() {
    let vt = MockServer::start().await;
    let (_host, link) = torrent_host().await;
    mount_url_scan(&vt, &link, false).await;
    mount_domain_lookups(&vt).await;
    mount_file_scan(&vt, false).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();

    let response = pipeline
        .initiate_download(torrent_request(&link), AuditContext::for_user(3))
        .await
        .unwrap();
    assert_eq!(response.url_to_verify.as_deref(), Some(link.as_str()));

    let outcome = wait_for_outcome(&mut events, response.file_id, OUTCOME_TIMEOUT).await;
    let WaitResult::Completed { disk, path } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert_eq!(disk, "local");
    assert!(path.ends_with("ubuntu.torrent"), "unexpected key {}", path);
    assert_stored(&pipeline, &disk, &path).await;
    assert_quarantine_empty(&pipeline).await;

    let record = pipeline.get_download(response.file_id).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Completed);
    assert_eq!(record.scan_status, Some(ScanStatus::Completed));
    assert_eq!(record.size_bytes, Some(TORRENT_BYTES.len() as i64));
    assert_eq!(record.scan_id.as_deref().map(str::len), Some(64));

    let scanned = pipeline.db.find_scanned_url(&link).await.unwrap().unwrap();
    assert!(scanned.is_known_clean());
    let domain_info: serde_json::Value =
        serde_json::from_str(scanned.domain_info.as_deref().unwrap()).unwrap();
    assert_eq!(domain_info["reputation"], 12);
    assert_eq!(domain_info["votes"]["harmless"], 2);
}

#[tokio::test]
async fn malicious_url_is_blocked_before_fetch() {
    let vt = MockServer::start().await;
    let host = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(TORRENT_BYTES))
        .expect(0)
        .mount(&host)
        .await;
    let link = format!("{}/ubuntu.torrent", host.uri());
    mount_url_scan(&vt, &link, true).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let id = pipeline
        .initiate_download(torrent_request(&link), AuditContext::for_user(3))
        .await
        .unwrap()
        .file_id;

    let outcome = wait_for_outcome(&mut events, id, OUTCOME_TIMEOUT).await;
    assert!(matches!(outcome, WaitResult::UrlRejected), "got {:?}", outcome);

    let view = pipeline.status_view(id).await.unwrap();
    assert_eq!(view.status, DownloadStatus::UrlRejected);
    assert_eq!(view.progress, 0);

    let scanned = pipeline.db.find_scanned_url(&link).await.unwrap().unwrap();
    assert!(scanned.is_malicious);
    let logs = pipeline
        .db
        .list_audit_logs_by_action(ACTION_MALICIOUS_URL_BLOCKED)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].user_id, Some(3));
}

#[tokio::test]
async fn malicious_payload_is_deleted_from_quarantine() {
    let vt = MockServer::start().await;
    let (_host, link) = torrent_host().await;
    mount_url_scan(&vt, &link, false).await;
    mount_domain_lookups(&vt).await;
    mount_file_scan(&vt, true).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let id = pipeline
        .initiate_download(torrent_request(&link), AuditContext::system())
        .await
        .unwrap()
        .file_id;

    let outcome = wait_for_outcome(&mut events, id, OUTCOME_TIMEOUT).await;
    let WaitResult::FileRejected(threats) = outcome else {
        panic!("expected file rejection, got {:?}", outcome);
    };
    assert_eq!(
        threats,
        vec!["Riskware.Agent".to_string(), "Trojan.Generic".to_string()]
    );

    assert_quarantine_empty(&pipeline).await;
    let record = pipeline.get_download(id).await.unwrap();
    assert_eq!(record.status, DownloadStatus::FileRejected);
    assert!(record.is_deleted());

    let logs = pipeline
        .db
        .list_audit_logs_by_action(ACTION_MALICIOUS_FILE_DELETED)
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    let new_values: serde_json::Value =
        serde_json::from_str(logs[0].new_values.as_deref().unwrap()).unwrap();
    assert_eq!(new_values["threats"]["malicious"], 3);
}

#[tokio::test]
async fn queued_reports_are_polled_until_finished() {
    let vt = MockServer::start().await;
    let (_host, link) = torrent_host().await;
    let id = url_id(&link);

    // First poll sees an object without a finished analysis
    Mock::given(method("GET"))
        .and(path(format!("/urls/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(queued_report(&id)))
        .up_to_n_times(1)
        .mount(&vt)
        .await;
    mount_url_scan(&vt, &link, false).await;
    mount_domain_lookups(&vt).await;

    // Fresh files are unknown until the first analysis lands
    Mock::given(method("GET"))
        .and(path_regex(r"^/files/[0-9a-f]{64}$"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(api_error("NotFoundError", "not found")),
        )
        .up_to_n_times(2)
        .mount(&vt)
        .await;
    mount_file_scan(&vt, false).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let download = pipeline
        .initiate_download(torrent_request(&link), AuditContext::system())
        .await
        .unwrap()
        .file_id;

    let outcome = wait_for_outcome(&mut events, download, OUTCOME_TIMEOUT).await;
    assert!(
        matches!(outcome, WaitResult::Completed { .. }),
        "got {:?}",
        outcome
    );

    // Each poll reused the submitted analysis
    let requests = vt.received_requests().await.unwrap();
    let url_submissions = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/urls")
        .count();
    let file_submissions = requests
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path() == "/files")
        .count();
    assert_eq!(url_submissions, 1);
    assert_eq!(file_submissions, 1);
}

#[tokio::test]
async fn rejected_api_key_fails_download() {
    let vt = MockServer::start().await;
    let (_host, link) = torrent_host().await;
    Mock::given(method("POST"))
        .and(path("/urls"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(api_error("WrongCredentialsError", "wrong API key")),
        )
        .mount(&vt)
        .await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let id = pipeline
        .initiate_download(torrent_request(&link), AuditContext::system())
        .await
        .unwrap()
        .file_id;

    let outcome = wait_for_outcome(&mut events, id, OUTCOME_TIMEOUT).await;
    let WaitResult::Failed(error) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(error.contains("401"), "unexpected error {}", error);

    let record = pipeline.get_download(id).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Failed);
    let scanned = pipeline.db.find_scanned_url(&link).await.unwrap().unwrap();
    assert_eq!(scanned.scan_status, Some(ScanStatus::Error));
}

#[tokio::test]
async fn missing_torrent_file_fails_download() {
    let vt = MockServer::start().await;
    let host = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.torrent"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&host)
        .await;
    let link = format!("{}/gone.torrent", host.uri());
    mount_url_scan(&vt, &link, false).await;
    mount_domain_lookups(&vt).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let id = pipeline
        .initiate_download(torrent_request(&link), AuditContext::system())
        .await
        .unwrap()
        .file_id;

    let outcome = wait_for_outcome(&mut events, id, OUTCOME_TIMEOUT).await;
    assert!(matches!(outcome, WaitResult::Failed(_)), "got {:?}", outcome);
    assert_quarantine_empty(&pipeline).await;
}

#[tokio::test]
async fn magnet_only_request_skips_url_verification() {
    let vt = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/urls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(analysis_submitted("unused")))
        .expect(0)
        .mount(&vt)
        .await;
    mount_file_scan(&vt, false).await;

    let (pipeline, _dir) = start_pipeline(&vt.uri()).await;
    let mut events = pipeline.subscribe();
    let response = pipeline
        .initiate_download(
            InitiateDownload {
                magnet_link: Some(
                    "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=debian-12"
                        .into(),
                ),
                ..Default::default()
            },
            AuditContext::system(),
        )
        .await
        .unwrap();
    assert!(response.url_to_verify.is_none());

    let outcome = wait_for_outcome(&mut events, response.file_id, OUTCOME_TIMEOUT).await;
    let WaitResult::Completed { disk, path } = outcome else {
        panic!("expected completion, got {:?}", outcome);
    };
    assert!(path.ends_with("debian-12.magnet"), "unexpected key {}", path);
    assert_stored(&pipeline, &disk, &path).await;
}
