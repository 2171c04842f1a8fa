mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use common::{echo_factory, EchoArgs, EchoHandler, UnresponsiveHandler};
use dfsrpc::jsonrpc::{JsonRpcClient, JsonRpcError, JsonRpcServer};
use dfsrpc::{ClientConfig, MessageFactory, RpcHandler, ServerConfig};

async fn spawn_server(
    factory: Arc<MessageFactory>,
    handler: Arc<dyn RpcHandler>,
) -> SocketAddr {
    let server = JsonRpcServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        factory,
        handler,
        None,
        ServerConfig::default(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

fn client_for(addr: SocketAddr, factory: Arc<MessageFactory>) -> JsonRpcClient {
    JsonRpcClient::new(
        vec![addr],
        &addr.to_string(),
        "/JSONRPC",
        factory,
        ClientConfig::default(),
    )
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let addr = spawn_server(echo_factory(), Arc::new(EchoHandler)).await;
    let client = client_for(addr, echo_factory());

    let result = client
        .call(Box::new(EchoArgs {
            payload: "over json".to_owned(),
        }))
        .await
        .unwrap();

    let result = result.into_any().downcast::<common::EchoResult>().unwrap();
    assert_eq!(result.payload, "over json");
}

#[tokio::test]
async fn test_sequential_calls_reuse_the_connection() {
    let addr = spawn_server(echo_factory(), Arc::new(EchoHandler)).await;
    let client = client_for(addr, echo_factory());

    for i in 0..5 {
        let payload = format!("call {}", i);
        let result = client
            .call(Box::new(EchoArgs {
                payload: payload.clone(),
            }))
            .await
            .unwrap();
        let result = result.into_any().downcast::<common::EchoResult>().unwrap();
        assert_eq!(result.payload, payload);
    }
}

#[tokio::test]
async fn test_unknown_method_arrives_as_error_body() {
    // server side knows no methods at all
    let addr = spawn_server(Arc::new(MessageFactory::new()), Arc::new(EchoHandler)).await;
    let client = client_for(addr, echo_factory());

    let result = client
        .call(Box::new(EchoArgs {
            payload: "x".to_owned(),
        }))
        .await
        .unwrap();

    let error = result.into_any().downcast::<JsonRpcError>().unwrap();
    assert_eq!(error.0["name"], "MethodNotFound");
}

#[tokio::test]
async fn test_handler_dropping_sink_becomes_error_body() {
    let addr = spawn_server(echo_factory(), Arc::new(UnresponsiveHandler)).await;
    let client = client_for(addr, echo_factory());

    let result = client
        .call(Box::new(EchoArgs {
            payload: "x".to_owned(),
        }))
        .await
        .unwrap();

    let error = result.into_any().downcast::<JsonRpcError>().unwrap();
    assert_eq!(error.0["name"], "InternalError");
}
