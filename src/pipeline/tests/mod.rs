use super::test_helpers::*;
use super::*;
use crate::audit::AuditContext;
use crate::error::{Error, PipelineError, QuarantineError, ThreatIntelError};
use crate::types::{DownloadMetadata, DownloadStatus, InitiateDownload};
use std::sync::atomic::Ordering;
use std::time::Duration;


const TORRENT_URL: &str = "https://tracker.example/ubuntu-24.04.torrent";
const MAGNET: &str = "magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056&dn=ubuntu";

fn torrent_request() -> InitiateDownload {
    InitiateDownload {
        torrent_link: Some(TORRENT_URL.into()),
        metadata: DownloadMetadata {
            title: Some("Ubuntu 24.04".into()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn magnet_request() -> InitiateDownload {
    InitiateDownload {
        magnet_link: Some(MAGNET.into()),
        ..Default::default()
    }
}

/// Initiate without a running dispatcher, returning the new id
async fn initiate(pipeline: &Pipeline, request: InitiateDownload) -> DownloadId {
    pipeline
        .initiate_download(request, AuditContext::for_user(7))
        .await
        .unwrap()
        .file_id
}

async fn status_of(pipeline: &Pipeline, id: DownloadId) -> DownloadStatus {
    pipeline.get_download(id).await.unwrap().status
}
