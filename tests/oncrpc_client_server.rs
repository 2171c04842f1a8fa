mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use common::{
    echo_factory, echo_void_factory, EchoArgs, EchoHandler, VoidHandler, PROG, PROC_ECHO, VERS,
};
use dfsrpc::oncrpc::parser::record_mark;
use dfsrpc::oncrpc::{OncRpcClient, OncRpcReply, OncRpcServer, OncRpcUdpClient, OncRpcUdpServer};
use dfsrpc::{ClientConfig, Error, RpcErrorCode, ServerConfig, TransportPhase};

async fn spawn_echo_server(void_result: bool) -> SocketAddr {
    let (factory, handler): (_, Arc<dyn dfsrpc::RpcHandler>) = if void_result {
        (echo_void_factory(), Arc::new(VoidHandler))
    } else {
        (echo_factory(), Arc::new(EchoHandler))
    };

    let server = OncRpcServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        factory,
        handler,
        ServerConfig::default(),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

#[tokio::test]
async fn test_call_with_empty_result() {
    let addr = spawn_echo_server(true).await;
    let client = OncRpcClient::with_initial_xid(
        vec![addr],
        PROG,
        VERS,
        echo_void_factory(),
        ClientConfig::default(),
        0x11223344,
    );

    let result = client
        .call(Box::new(EchoArgs {
            payload: "ignored".to_owned(),
        }))
        .await
        .unwrap();

    // SUCCESS with empty results decodes to the null type
    assert_eq!(result.type_id(), 0);
}

#[tokio::test]
async fn test_echo_roundtrip() {
    let addr = spawn_echo_server(false).await;
    let client = OncRpcClient::new(
        vec![addr],
        PROG,
        VERS,
        echo_factory(),
        ClientConfig::default(),
    );

    let result = client
        .call(Box::new(EchoArgs {
            payload: "across the wire".to_owned(),
        }))
        .await
        .unwrap();

    let result = result.into_any().downcast::<common::EchoResult>().unwrap();
    assert_eq!(result.payload, "across the wire");
}

#[tokio::test]
async fn test_unknown_version_yields_prog_mismatch() {
    let addr = spawn_echo_server(false).await;
    // the server only knows VERS; ask for something newer
    let client = OncRpcClient::new(
        vec![addr],
        PROG,
        VERS + 7,
        Arc::new(
            dfsrpc::MessageFactory::new().register_proc(
                PROG,
                VERS + 7,
                PROC_ECHO,
                common::echo_args_decoder(),
                common::echo_result_decoder(),
            ),
        ),
        ClientConfig::default(),
    );

    match client
        .call(Box::new(EchoArgs {
            payload: "x".to_owned(),
        }))
        .await
    {
        Err(Error::Protocol {
            code: RpcErrorCode::ProgramMismatch { low, high },
        }) => {
            assert_eq!((low, high), (VERS, VERS));
        }
        other => panic!("expected PROG_MISMATCH, got ok={}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_unknown_program_yields_prog_unavail() {
    let addr = spawn_echo_server(false).await;
    let client = OncRpcClient::new(
        vec![addr],
        PROG + 1,
        VERS,
        Arc::new(dfsrpc::MessageFactory::new().register_proc(
            PROG + 1,
            VERS,
            PROC_ECHO,
            common::echo_args_decoder(),
            common::echo_result_decoder(),
        )),
        ClientConfig::default(),
    );

    match client
        .call(Box::new(EchoArgs {
            payload: "x".to_owned(),
        }))
        .await
    {
        Err(Error::Protocol {
            code: RpcErrorCode::ProgramUnavailable,
        }) => {}
        other => panic!("expected PROG_UNAVAIL, got ok={}", other.is_ok()),
    }
}

#[tokio::test]
async fn test_reply_split_into_fragments_is_reassembled() {
    // a hand-rolled peer that answers with the reply split across two
    //  record fragments
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();

        let reply = OncRpcReply::success(
            42,
            Box::new(common::EchoResult {
                payload: "fragmented".to_owned(),
            }),
        );
        let payload = reply.marshal(false).to_bytes();
        let (first, second) = payload.split_at(5);

        stream.write_all(&record_mark(first.len(), false)).await.unwrap();
        stream.write_all(first).await.unwrap();
        stream.write_all(&record_mark(second.len(), true)).await.unwrap();
        stream.write_all(second).await.unwrap();
    });

    let client = OncRpcClient::with_initial_xid(
        vec![addr],
        PROG,
        VERS,
        echo_factory(),
        ClientConfig::default(),
        42,
    );

    let result = client
        .call(Box::new(EchoArgs {
            payload: "q".to_owned(),
        }))
        .await
        .unwrap();
    let result = result.into_any().downcast::<common::EchoResult>().unwrap();
    assert_eq!(result.payload, "fragmented");
}

#[tokio::test]
async fn test_udp_echo_roundtrip() {
    let server = OncRpcUdpServer::bind(
        "127.0.0.1:0".parse().unwrap(),
        echo_factory(),
        Arc::new(EchoHandler),
    )
    .await
    .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });

    let client = OncRpcUdpClient::connect(
        addr,
        PROG,
        VERS,
        echo_factory(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let result = client
        .call(Box::new(EchoArgs {
            payload: "datagram".to_owned(),
        }))
        .await
        .unwrap();
    let result = result.into_any().downcast::<common::EchoResult>().unwrap();
    assert_eq!(result.payload, "datagram");
}

#[tokio::test]
async fn test_udp_timeout_is_single_shot() {
    // a peer that receives and stays silent
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = silent.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 65536];
        loop {
            let _ = silent.recv_from(&mut buf).await;
        }
    });

    let client = OncRpcUdpClient::connect(
        addr,
        PROG,
        VERS,
        echo_factory(),
        Duration::from_millis(100),
    )
    .await
    .unwrap();

    match client
        .call(Box::new(EchoArgs {
            payload: "void".to_owned(),
        }))
        .await
    {
        Err(Error::Timeout {
            phase: TransportPhase::Recv,
        }) => {}
        other => panic!("expected recv timeout, got ok={}", other.is_ok()),
    }
}
