//! Exceptions, lookup failures and connectivity errors as seen by callers.

use proven_remote_object::{
    CallArgs, ClientConfig, Error, Exception, Exposed, Member, RegistryBuilder, RemoteError,
    RemoteObjectClient, RemoteObjectServer, SerializerRegistry, Value,
};
use proven_rpc::{ServerConfig, ServerHandle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing_test::traced_test;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{0}")]
struct ValueError(String);

#[derive(Debug, thiserror::Error)]
#[error("unserializable: {0}")]
struct Unregistered(String);

fn with_value_error() -> Arc<SerializerRegistry> {
    let mut builder = RegistryBuilder::new();
    builder.register_exception::<ValueError>("ValueError").unwrap();
    builder.build()
}

fn exposed() -> Exposed {
    Exposed::mapping([
        (
            "explode",
            Member::function(|_: CallArgs| Err(Exception::from(ValueError("boom".to_string())))),
        ),
        (
            "obscure",
            Member::function(|_: CallArgs| Err(Exception::from(Unregistered("x".to_string())))),
        ),
        (
            "slow",
            Member::function(|_: CallArgs| {
                std::thread::sleep(Duration::from_millis(600));
                Ok(Value::Nil)
            }),
        ),
        ("panic", Member::function(|_: CallArgs| panic!("handler exploded"))),
        ("ok", Member::constant("still serving")),
    ])
}

async fn serve(
    server_registry: Arc<SerializerRegistry>,
    client_registry: Arc<SerializerRegistry>,
    config: ClientConfig,
) -> (ServerHandle, RemoteObjectClient) {
    let handle = RemoteObjectServer::new(exposed(), server_registry)
        .bind(([127, 0, 0, 1], 0).into(), ServerConfig::default())
        .await
        .unwrap();
    let client = RemoteObjectClient::connect_with(handle.local_addr(), client_registry, config)
        .await
        .unwrap();
    (handle, client)
}

#[tokio::test]
#[traced_test]
async fn test_registered_exception_is_raised_as_itself() {
    let (_handle, client) =
        serve(with_value_error(), with_value_error(), ClientConfig::default()).await;

    let err = client.call("explode", CallArgs::new()).await.unwrap_err();

    let Error::RemoteApplication(exception) = &err else {
        panic!("expected a remote exception, got {err:?}");
    };
    assert_eq!(
        exception.downcast_ref::<ValueError>(),
        Some(&ValueError("boom".to_string()))
    );
    assert_eq!(err.to_string(), "boom");
}

#[tokio::test]
#[traced_test]
async fn test_unregistered_exception_degrades_to_message() {
    let (_handle, client) =
        serve(with_value_error(), with_value_error(), ClientConfig::default()).await;

    let err = client.call("obscure", CallArgs::new()).await.unwrap_err();
    let exception = err.exception().unwrap();

    assert!(exception.is::<RemoteError>());
    assert_eq!(exception.message(), "unserializable: x");
}

#[tokio::test]
#[traced_test]
async fn test_exception_unknown_to_client_degrades() {
    let (_handle, client) = serve(
        with_value_error(),
        SerializerRegistry::standard(),
        ClientConfig::default(),
    )
    .await;

    let err = client.call("explode", CallArgs::new()).await.unwrap_err();
    let exception = err.exception().unwrap();

    assert!(exception.is::<RemoteError>());
    assert_eq!(exception.message(), "boom");
}

#[tokio::test]
#[traced_test]
async fn test_failures_are_isolated() {
    let (_handle, client) =
        serve(with_value_error(), with_value_error(), ClientConfig::default()).await;

    let err = client.call("panic", CallArgs::new()).await.unwrap_err();
    assert!(matches!(err, Error::RemoteApplication(_)));
    assert!(client.call("explode", CallArgs::new()).await.is_err());

    assert_eq!(
        client.call("ok", CallArgs::new()).await.unwrap(),
        Value::from("still serving")
    );
}

#[tokio::test]
#[traced_test]
async fn test_timeout_is_a_connectivity_error() {
    let config = ClientConfig {
        timeout: Duration::from_millis(150),
        ..ClientConfig::default()
    };
    let (_handle, client) = serve(with_value_error(), with_value_error(), config).await;

    let err = client.call("slow", CallArgs::new()).await.unwrap_err();
    assert!(err.is_connectivity(), "got {err:?}");
    assert!(err.exception().is_none());

    assert_eq!(
        client.call("ok", CallArgs::new()).await.unwrap(),
        Value::from("still serving")
    );
}

#[tokio::test]
#[traced_test]
async fn test_server_gone_is_a_connectivity_error() {
    let (handle, client) =
        serve(with_value_error(), with_value_error(), ClientConfig::default()).await;

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = client.call("ok", CallArgs::new()).await.unwrap_err();
    assert!(err.is_connectivity(), "got {err:?}");
}

#[tokio::test]
#[traced_test]
async fn test_connect_refused_is_a_connectivity_error() {
    let handle = RemoteObjectServer::new(Exposed::default(), SerializerRegistry::standard())
        .bind(([127, 0, 0, 1], 0).into(), ServerConfig::default())
        .await
        .unwrap();
    let addr = handle.local_addr();
    handle.shutdown().await;

    let err = RemoteObjectClient::connect(addr, SerializerRegistry::standard())
        .await
        .unwrap_err();
    assert!(err.is_connectivity(), "got {err:?}");
}
