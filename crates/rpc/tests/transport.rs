//! Integration tests for the TCP transport over loopback.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use proven_rpc::{
    ClientConfig, ConnectionError, Error, ErrorCode, ErrorInfo, HandlerError, HandlerResponse,
    METHODS_METHOD, NAME_METHOD, RemoteErrorHook, Reply, RpcClient, RpcHandler, RpcServer,
    ServerConfig, ServerHandle, codec,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_test::traced_test;

struct TestHandler;

#[async_trait]
impl RpcHandler for TestHandler {
    fn name(&self) -> String {
        "test".to_string()
    }

    fn methods(&self) -> Vec<String> {
        ["count", "echo", "fail", "panic", "slow", "stall"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn handle_call(
        &self,
        method: &str,
        args: Vec<Bytes>,
    ) -> Result<HandlerResponse, HandlerError> {
        match method {
            "echo" => Ok(HandlerResponse::Single(
                args.into_iter().next().unwrap_or_default(),
            )),
            "count" => {
                let n: u32 = codec::decode(&args[0])
                    .map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    for i in 0..n {
                        let chunk = codec::encode(&i).unwrap();
                        if tx.send(Ok(chunk)).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(HandlerResponse::Stream(rx))
            }
            "fail" => Err(HandlerError::Application {
                message: "division by zero".to_string(),
                payload: Some(Bytes::from_static(b"encoded-error")),
            }),
            "panic" => panic!("handler exploded"),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(HandlerResponse::Single(Bytes::new()))
            }
            "stall" => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let _ = tx.send(Ok(Bytes::from("first"))).await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(tx);
                });
                Ok(HandlerResponse::Stream(rx))
            }
            other => Err(HandlerError::NotFound(other.to_string())),
        }
    }
}

async fn start_server() -> ServerHandle {
    RpcServer::new(TestHandler, ServerConfig::default())
        .bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("Failed to bind server")
}

async fn connect(server: &ServerHandle) -> RpcClient {
    RpcClient::builder()
        .addr(server.local_addr())
        .timeout(Duration::from_secs(2))
        .connect()
        .await
        .expect("Failed to connect")
}

async fn single(client: &RpcClient, method: &str, args: Vec<Bytes>) -> Bytes {
    match client.call(method, args).await.expect("call failed") {
        Reply::Single(bytes) => bytes,
        Reply::Stream(_) => panic!("expected a single reply"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_builtin_introspection() {
    let server = start_server().await;
    let client = connect(&server).await;

    let name: String = codec::decode(&single(&client, NAME_METHOD, vec![]).await).unwrap();
    assert_eq!(name, "test");

    let methods: Vec<String> =
        codec::decode(&single(&client, METHODS_METHOD, vec![]).await).unwrap();
    assert!(methods.contains(&"echo".to_string()));
    assert_eq!(methods.len(), 6);
}

#[tokio::test]
#[traced_test]
async fn test_echo_and_empty_args() {
    let server = start_server().await;
    let client = connect(&server).await;

    let reply = single(&client, "echo", vec![Bytes::from("hello")]).await;
    assert_eq!(reply, Bytes::from("hello"));

    let reply = single(&client, "echo", vec![]).await;
    assert!(reply.is_empty());
}

#[tokio::test]
#[traced_test]
async fn test_streamed_reply_in_order() {
    let server = start_server().await;
    let client = connect(&server).await;

    let Reply::Stream(stream) = client
        .call("count", vec![codec::encode(&5_u32).unwrap()])
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };

    let items: Vec<u32> = stream
        .map(|chunk| codec::decode::<u32>(&chunk.unwrap()).unwrap())
        .collect()
        .await;
    assert_eq!(items, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
#[traced_test]
async fn test_empty_stream() {
    let server = start_server().await;
    let client = connect(&server).await;

    let Reply::Stream(stream) = client
        .call("count", vec![codec::encode(&0_u32).unwrap()])
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };

    assert_eq!(stream.count().await, 0);
}

#[tokio::test]
#[traced_test]
async fn test_unread_stream_does_not_block_other_calls() {
    let server = start_server().await;
    let client = RpcClient::builder()
        .addr(server.local_addr())
        .config(ClientConfig {
            timeout: Duration::from_secs(2),
            stream_buffer: 4,
            ..ClientConfig::default()
        })
        .connect()
        .await
        .unwrap();

    let Reply::Stream(stream) = client
        .call("count", vec![codec::encode(&500_u32).unwrap()])
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };

    // The stream sits unread while another call goes through
    let reply = single(&client, "echo", vec![Bytes::from("meanwhile")]).await;
    assert_eq!(reply, Bytes::from("meanwhile"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let items: Vec<_> = stream.collect().await;
    let (last, chunks) = items.split_last().unwrap();
    assert!(matches!(last, Err(Error::StreamOverflow(4))));
    assert!(!chunks.is_empty() && chunks.len() <= 5);
    for (expected, chunk) in chunks.iter().enumerate() {
        let value: u32 = codec::decode(chunk.as_ref().unwrap()).unwrap();
        assert_eq!(value as usize, expected);
    }

    assert_eq!(client.in_flight(), 0);
    let reply = single(&client, "echo", vec![Bytes::from("after")]).await;
    assert_eq!(reply, Bytes::from("after"));
}

#[tokio::test]
#[traced_test]
async fn test_stalled_stream_times_out_and_is_forgotten() {
    let server = start_server().await;
    let client = connect(&server).await;

    let Reply::Stream(mut stream) = client
        .call_with_timeout("stall", vec![], Duration::from_millis(100))
        .await
        .unwrap()
    else {
        panic!("expected a stream");
    };
    assert_eq!(client.in_flight(), 1);

    assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from("first"));
    assert!(matches!(stream.next().await, Some(Err(Error::Timeout(_)))));
    assert!(stream.next().await.is_none());

    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_application_error_without_hook() {
    let server = start_server().await;
    let client = connect(&server).await;

    match client.call("fail", vec![]).await {
        Err(Error::Remote(info)) => {
            assert_eq!(info.code, ErrorCode::Application);
            assert_eq!(info.message, "division by zero");
            assert_eq!(info.payload.as_deref(), Some(&b"encoded-error"[..]));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_remote_error_hook_rewrites_errors() {
    let server = start_server().await;

    let hook: RemoteErrorHook = Arc::new(|info: ErrorInfo| {
        Error::Application(format!("rewritten: {}", info.message).into())
    });
    let client = RpcClient::builder()
        .addr(server.local_addr())
        .on_remote_error(hook)
        .connect()
        .await
        .unwrap();

    match client.call("fail", vec![]).await {
        Err(Error::Application(e)) => assert_eq!(e.to_string(), "rewritten: division by zero"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_unknown_method() {
    let server = start_server().await;
    let client = connect(&server).await;

    match client.call("missing", vec![]).await {
        Err(Error::Remote(info)) => assert_eq!(info.code, ErrorCode::NotFound),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_panic_does_not_stop_server() {
    let server = start_server().await;
    let client = connect(&server).await;

    match client.call("panic", vec![]).await {
        Err(Error::Remote(info)) => {
            assert_eq!(info.code, ErrorCode::Panicked);
            assert!(info.message.contains("handler exploded"));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let reply = single(&client, "echo", vec![Bytes::from("still alive")]).await;
    assert_eq!(reply, Bytes::from("still alive"));
}

#[tokio::test]
#[traced_test]
async fn test_call_timeout() {
    let server = start_server().await;
    let client = connect(&server).await;

    let result = client
        .call_with_timeout("slow", vec![], Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(Error::Timeout(_))));

    // The connection stays usable after a timed-out call
    let reply = single(&client, "echo", vec![Bytes::from("after")]).await;
    assert_eq!(reply, Bytes::from("after"));
}

#[tokio::test]
#[traced_test]
async fn test_concurrent_calls_are_multiplexed() {
    let server = start_server().await;
    let client = Arc::new(connect(&server).await);

    let calls = (0..16).map(|i| {
        let client = Arc::clone(&client);
        async move {
            let payload = Bytes::from(format!("call-{i}"));
            let reply = single(&client, "echo", vec![payload.clone()]).await;
            assert_eq!(reply, payload);
        }
    });

    futures::future::join_all(calls).await;
}

#[tokio::test]
#[traced_test]
async fn test_connect_failure_is_connectivity_error() {
    let server = start_server().await;
    let addr = server.local_addr();
    server.shutdown().await;

    let result = RpcClient::builder().addr(addr).connect().await;
    match result {
        Err(e) => assert!(e.is_connectivity()),
        Ok(_) => panic!("connected to a stopped server"),
    }
}

#[tokio::test]
#[traced_test]
async fn test_server_shutdown_fails_calls() {
    let server = start_server().await;
    let client = connect(&server).await;
    assert!(client.is_connected());

    server.shutdown().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let result = client.call("echo", vec![]).await;
    assert!(matches!(
        result,
        Err(Error::Connection(ConnectionError::Closed) | Error::Io(_))
    ));
    assert!(!client.is_connected());
}
