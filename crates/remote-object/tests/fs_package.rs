//! The filesystem namespace served over loopback.

use proven_remote_object::packages::fs::{self, FileStat, OsError};
use proven_remote_object::{CallArgs, Capability, RemoteObjectClient, RemoteObjectServer, Value};
use proven_rpc::{ServerConfig, ServerHandle};
use tracing_test::traced_test;

async fn serve() -> (ServerHandle, RemoteObjectClient) {
    let registry = fs::registry().unwrap();
    let handle = RemoteObjectServer::new(fs::filesystem_namespace(), registry.clone())
        .bind(([127, 0, 0, 1], 0).into(), ServerConfig::default())
        .await
        .unwrap();
    let client = RemoteObjectClient::connect(handle.local_addr(), registry)
        .await
        .unwrap();
    (handle, client)
}

#[tokio::test]
#[traced_test]
async fn test_os_path_is_a_namespace() {
    let (_handle, client) = serve().await;

    let schema = client.schema().await.unwrap();
    assert_eq!(schema.get("os"), Some(Capability::Module));
    assert_eq!(schema.get("os.path"), Some(Capability::Module));
    assert_eq!(schema.get("os.path.exists"), Some(Capability::Callable));

    let os = client.resolve("os").await.unwrap().into_namespace().unwrap();
    let path = os.resolve("path").await.unwrap().into_namespace().unwrap();
    assert_eq!(path.to_string(), "<ProxyNamespace('os.path')>");
}

#[tokio::test]
#[traced_test]
async fn test_stat_returns_typed_object() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("data.bin");
    std::fs::write(&file, [0_u8; 12]).unwrap();
    let file = file.to_string_lossy().into_owned();

    let (_handle, client) = serve().await;

    let stat = client
        .call("os.stat", CallArgs::new().arg(file.as_str()))
        .await
        .unwrap();
    let stat = stat.downcast_object::<FileStat>().unwrap();
    assert_eq!(stat.size, 12);
    assert!(stat.is_file);
    assert!(!stat.is_dir);

    let path = client.with_prefix("os.path");
    assert_eq!(
        path.call("getsize", CallArgs::new().arg(file.as_str())).await.unwrap(),
        Value::Int(12)
    );
    assert_eq!(
        path.call("isfile", CallArgs::new().arg(file.as_str())).await.unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        path.call("exists", CallArgs::new().arg("/definitely/not/here"))
            .await
            .unwrap(),
        Value::Bool(false)
    );
}

#[tokio::test]
#[traced_test]
async fn test_listdir_is_sorted() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["c", "a", "b"] {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let root = dir.path().to_string_lossy().into_owned();

    let (_handle, client) = serve().await;
    let listing = client
        .call("os.listdir", CallArgs::new().arg(root.as_str()))
        .await
        .unwrap();

    assert_eq!(listing, Value::from(vec!["a", "b", "c"]));
}

#[tokio::test]
#[traced_test]
async fn test_missing_path_raises_os_error() {
    let (_handle, client) = serve().await;

    let err = client
        .call("os.stat", CallArgs::new().arg("/definitely/not/here"))
        .await
        .unwrap_err();
    let os_error = err.exception().unwrap().downcast_ref::<OsError>().unwrap();

    assert_eq!(os_error.kind, "NotFound");
    assert_eq!(os_error.path, "/definitely/not/here");
}
