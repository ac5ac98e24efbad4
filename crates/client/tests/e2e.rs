//! Full-stack sync: real server, real client, real files

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use skiff_client::FileSync;
use skiff_core::protocol::FileSetRequest;
use skiff_core::{Message, ProtocolReader, ProtocolWriter};
use skiff_server::http::{self, AppState};
use skiff_server::{FileSetService, NotifyRegistry, rpc};
use tokio_util::sync::CancellationToken;

struct Stack {
    http_base: String,
    rpc_addr: String,
    files: Arc<FileSetService>,
    registry: Arc<NotifyRegistry>,
    src: tempfile::TempDir,
    dest: tempfile::TempDir,
    _server_cache: tempfile::TempDir,
    _definition: tempfile::NamedTempFile,
}

async fn start_stack() -> Stack {
    let server_cache = tempfile::tempdir().unwrap();
    let src = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    std::fs::write(src.path().join("alpha"), b"alpha contents").unwrap();
    std::fs::create_dir_all(src.path().join("sub")).unwrap();
    std::fs::write(src.path().join("sub/beta"), b"beta contents").unwrap();

    let mut definition = tempfile::NamedTempFile::new().unwrap();
    write!(
        definition,
        r#"{{"all": {{"{}": "{}"}}}}"#,
        src.path().display(),
        dest.path().display()
    )
    .unwrap();

    let files = Arc::new(FileSetService::open(definition.path(), server_cache.path(), 4).unwrap());
    let registry = Arc::new(NotifyRegistry::new());

    let http_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_base = format!("http://{}", http_listener.local_addr().unwrap());
    let router = http::router(AppState {
        files: files.clone(),
        registry: registry.clone(),
    });
    tokio::spawn(async move { axum::serve(http_listener, router).await.unwrap() });

    let rpc_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rpc_addr = rpc_listener.local_addr().unwrap().to_string();
    tokio::spawn(rpc::serve(rpc_listener, files.clone(), registry.clone()));

    Stack {
        http_base,
        rpc_addr,
        files,
        registry,
        src,
        dest,
        _server_cache: server_cache,
        _definition: definition,
    }
}

#[tokio::test]
async fn test_client_mirrors_group_and_tracks_changes() {
    let stack = start_stack().await;
    let client_cache = tempfile::tempdir().unwrap();
    let groups = vec!["all".to_string()];

    let sync = FileSync::new(client_cache.path(), &stack.http_base).unwrap();
    sync.check(&stack.rpc_addr, &groups).await.unwrap();

    assert_eq!(
        std::fs::read(stack.dest.path().join("alpha")).unwrap(),
        b"alpha contents"
    );
    assert_eq!(
        std::fs::read(stack.dest.path().join("sub/beta")).unwrap(),
        b"beta contents"
    );

    let server_version = stack.files.sets(&groups)["all"].version;
    assert_eq!(sync.versions()["all"], server_version);

    // Change a source file, rescan, and check again: the client
    // converges on the new content and leaves the unchanged file
    // alone.
    let beta_mtime = std::fs::metadata(stack.dest.path().join("sub/beta"))
        .unwrap()
        .modified()
        .unwrap();
    std::fs::write(stack.src.path().join("alpha"), b"alpha v2").unwrap();
    let changed = {
        let files = stack.files.clone();
        tokio::task::spawn_blocking(move || files.rescan(&CancellationToken::new()))
            .await
            .unwrap()
            .unwrap()
    };
    assert!(changed.contains_key("all"));
    stack.registry.notify(&changed);

    sync.check(&stack.rpc_addr, &groups).await.unwrap();
    assert_eq!(
        std::fs::read(stack.dest.path().join("alpha")).unwrap(),
        b"alpha v2"
    );
    assert_eq!(sync.versions()["all"], changed["all"]);
    assert_eq!(
        std::fs::metadata(stack.dest.path().join("sub/beta"))
            .unwrap()
            .modified()
            .unwrap(),
        beta_mtime
    );
}

#[tokio::test]
async fn test_subscribed_stream_sees_reload_notification() {
    let stack = start_stack().await;

    let socket = tokio::net::TcpStream::connect(&stack.rpc_addr).await.unwrap();
    let (read_half, write_half) = socket.into_split();
    let mut reader = ProtocolReader::new(read_half);
    let mut writer = ProtocolWriter::new(write_half);

    writer
        .send(&Message::Subscribe(skiff_core::protocol::Subscribe {
            groups: vec!["all".to_string()],
        }))
        .await
        .unwrap();

    // Wait until the server has the stream registered.
    for _ in 0..100 {
        if stack.registry.subscriber_count("all") == 1 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    std::fs::write(stack.src.path().join("gamma"), b"gamma contents").unwrap();
    let client = reqwest::Client::new();
    client
        .post(format!("{}/reload", stack.http_base))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    let Message::Notification(notification) = reader.read_message().await.unwrap() else {
        panic!("expected a notification");
    };
    assert_eq!(notification.group, "all");
    assert_eq!(
        notification.version,
        stack.files.sets(&["all".to_string()])["all"].version
    );
}

#[tokio::test]
async fn test_fileset_request_over_rpc_matches_http_listing() {
    let stack = start_stack().await;

    let socket = tokio::net::TcpStream::connect(&stack.rpc_addr).await.unwrap();
    let (read_half, write_half) = socket.into_split();
    let mut reader = ProtocolReader::new(read_half);
    let mut writer = ProtocolWriter::new(write_half);

    writer
        .send(&Message::FileSetRequest(FileSetRequest {
            groups: vec!["all".to_string()],
        }))
        .await
        .unwrap();
    let Message::FileSetResponse(response) = reader.read_message().await.unwrap() else {
        panic!("expected a fileset response");
    };

    let listing: HashMap<String, skiff_core::VersionedSet> =
        reqwest::get(format!("{}/sets", stack.http_base))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

    assert_eq!(response.sets, listing);
}
