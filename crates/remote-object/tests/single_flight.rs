//! Bootstrap metadata is fetched once per connection.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use proven_remote_object::{
    CallArgs, Exposed, Member, RemoteObjectClient, RemoteObjectServer, SerializerRegistry, Value,
    schema::SCHEMA_METHOD,
};
use proven_rpc::{HandlerError, HandlerResponse, RpcHandler, RpcServer, ServerConfig, ServerHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing_test::traced_test;

/// Counts `_schema` requests reaching the server.
struct Counting {
    inner: RemoteObjectServer,
    schema_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl RpcHandler for Counting {
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    fn methods(&self) -> Vec<String> {
        self.inner.method_list().to_vec()
    }

    async fn handle_call(
        &self,
        method: &str,
        args: Vec<Bytes>,
    ) -> Result<HandlerResponse, HandlerError> {
        if method == SCHEMA_METHOD {
            self.schema_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.inner.handle_call(method, args).await
    }
}

async fn serve() -> (ServerHandle, RemoteObjectClient, Arc<AtomicUsize>) {
    let registry = SerializerRegistry::standard();
    let exposed = Exposed::mapping([
        ("CONST", Member::constant(42)),
        ("inc", Member::function(|args: CallArgs| Ok(Value::Int(args.int(0, "x")? + 1)))),
    ]);

    let schema_calls = Arc::new(AtomicUsize::new(0));
    let handler = Counting {
        inner: RemoteObjectServer::new(exposed, registry.clone()),
        schema_calls: Arc::clone(&schema_calls),
    };

    let handle = RpcServer::new(handler, ServerConfig::default())
        .bind(([127, 0, 0, 1], 0).into())
        .await
        .unwrap();
    let client = RemoteObjectClient::connect(handle.local_addr(), registry)
        .await
        .unwrap();

    (handle, client, schema_calls)
}

#[tokio::test]
#[traced_test]
async fn test_concurrent_first_access_fetches_schema_once() {
    let (_handle, client, schema_calls) = serve().await;

    let results = join_all((0..16).map(|_| {
        let client = client.clone();
        async move { client.schema().await }
    }))
    .await;

    for schema in results {
        assert_eq!(schema.unwrap().len(), 2);
    }
    assert_eq!(schema_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[traced_test]
async fn test_resolution_reuses_memoized_schema() {
    let (_handle, client, schema_calls) = serve().await;

    for _ in 0..3 {
        assert_eq!(
            client.resolve("CONST").await.unwrap().into_value(),
            Some(Value::Int(42))
        );
        let inc = client.resolve("inc").await.unwrap().into_callable().unwrap();
        assert_eq!(inc.call(CallArgs::new().arg(1)).await.unwrap(), Value::Int(2));
    }

    assert_eq!(schema_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[traced_test]
async fn test_reconnect_invalidates_memo() {
    let (_handle, client, schema_calls) = serve().await;

    client.schema().await.unwrap();
    client.schema().await.unwrap();
    assert_eq!(schema_calls.load(Ordering::SeqCst), 1);

    client.reconnect().await.unwrap();
    client.schema().await.unwrap();
    assert_eq!(schema_calls.load(Ordering::SeqCst), 2);
}
