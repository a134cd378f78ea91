use crate::db::*;
use crate::types::DownloadMetadata;

mod audit;

/// Minimal download pointing at a torrent link
fn torrent_download(name: &str) -> NewDownload {
    NewDownload {
        name: name.to_string(),
        magnet_link: None,
        torrent_link: Some(format!("http://tracker.example/{}.torrent", name)),
        source_url: None,
        metadata: DownloadMetadata {
            title: Some(name.to_string()),
            ..Default::default()
        },
        destination_disk: "local".to_string(),
    }
}
