mod common;

use huddle::{
    FileUpload, MessageStream, Notifier, PlatformConfig, attachments::BUCKET, server,
};
use reqwest::StatusCode;
use tokio::net::TcpListener;

#[tokio::test]
async fn signed_link_downloads_the_blob() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let platform = common::platform_with(PlatformConfig {
        public_url: format!("http://{addr}"),
        ..PlatformConfig::in_memory()
    })
    .await;
    tokio::spawn(server::serve(listener, platform.clone()));

    let root = common::admin(&platform, "root").await;
    let ada = common::member(&platform, &root, "ada").await;
    let room = common::room(&platform, &root, "general", &[&ada]).await;

    let store = common::signed_in(&platform, "ada").await;
    let stream = MessageStream::new(platform.clone(), &store, Notifier::new());
    stream.open(room.id).await.unwrap();

    let bytes = b"%PDF-1.7 minutes".to_vec();
    let attachment = stream
        .upload_file(&FileUpload {
            name: "minutes.pdf".to_owned(),
            mime_type: "application/pdf".to_owned(),
            bytes: bytes.clone(),
        })
        .await
        .unwrap();

    let url = stream.download_url(&attachment).await.unwrap();
    assert!(url.starts_with(&format!("http://{addr}/storage/v1/object/sign/{BUCKET}/")));

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "application/pdf");
    assert_eq!(response.bytes().await.unwrap().as_ref(), bytes.as_slice());

    // each call signs afresh
    let again = stream.download_url(&attachment).await.unwrap();
    assert!(reqwest::get(&again).await.unwrap().status().is_success());
}

#[tokio::test]
async fn tampered_links_are_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let platform = common::platform_with(PlatformConfig {
        public_url: format!("http://{addr}"),
        ..PlatformConfig::in_memory()
    })
    .await;
    tokio::spawn(server::serve(listener, platform.clone()));

    platform
        .storage()
        .upload(BUCKET, "room/1_abc.pdf", b"secret", "application/pdf")
        .await
        .unwrap();
    let url = platform
        .storage()
        .create_signed_url(BUCKET, "room/1_abc.pdf", time::Duration::seconds(300))
        .unwrap();

    let other_path = url.replace("1_abc.pdf", "2_abc.pdf");
    assert_eq!(reqwest::get(&other_path).await.unwrap().status(), StatusCode::FORBIDDEN);

    let expired = platform
        .storage()
        .create_signed_url(BUCKET, "room/1_abc.pdf", time::Duration::seconds(-1))
        .unwrap();
    assert_eq!(reqwest::get(&expired).await.unwrap().status(), StatusCode::FORBIDDEN);

    assert_eq!(reqwest::get(&url).await.unwrap().status(), StatusCode::OK);
}

#[tokio::test]
async fn health_check() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(server::serve(listener, common::platform().await));

    let body = reqwest::get(format!("http://{addr}/health")).await.unwrap().text().await.unwrap();
    assert_eq!(body, "ok");
}
