//! End-to-end Fast RPC over TCP.

use std::{convert::Infallible, sync::Arc, time::Duration};

use bytes::Bytes;
use rstest::{fixture, rstest};
use sockframe::{
    BincodeSerializer,
    Endianness,
    MiddlewareChain,
    Serializer,
    SessionConfig,
    fast::{DispatchError, FastClient, FastConfig, FastContext, FastMiddleware, FastRouter, RpcError, encode_params},
    pending::CallError,
    session::SessionHandlers,
};
use sockframe_testing::{SessionPair, TestResult, TestServer, fast_request};

const EXCLAIM: i32 = 5;
const EXCLAIM_TYPED: i32 = 6;
const STALL: i32 = 7;

fn router() -> FastRouter {
    FastRouter::builder()
        .route_raw(EXCLAIM, |ctx: FastContext| async move {
            let params = ctx.params()?;
            let first = params
                .first()
                .ok_or_else(|| DispatchError::BadArguments("missing parameter".into()))?;
            let text = String::from_utf8_lossy(first);
            BincodeSerializer
                .serialize(&format!("{text}!"))
                .map(Bytes::from)
                .map_err(|e| DispatchError::Serialize(e.to_string()))
        })
        .route(EXCLAIM_TYPED, |_ctx: FastContext, (text,): (String,)| async move {
            Ok::<_, Infallible>(format!("{text}!"))
        })
        .route(STALL, |_ctx: FastContext, (): ()| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok::<_, Infallible>(())
        })
        .build()
        .expect("distinct commands")
}

#[fixture]
fn fast_chain() -> MiddlewareChain {
    MiddlewareChain::builder()
        .push(FastMiddleware::server(router(), FastConfig::default()))
        .build()
}

#[rstest]
#[tokio::test]
async fn raw_request_gets_serialized_reply(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let mut wire = server.connect().await?;

    wire.write(&fast_request(EXCLAIM, 1, &[b"abcd"])?).await?;
    let reply = wire.read_fast_packet().await?;

    assert_eq!((reply.command, reply.id, reply.is_exception), (EXCLAIM, 1, false));
    assert_eq!(reply.body.as_ref(), BincodeSerializer.serialize(&"abcd!".to_owned())?.as_slice());
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn client_call_resolves_to_handler_result(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let client = FastClient::connect(server.addr(), FastConfig::default()).await?;

    let body = encode_params(&[b"abcd"])?;
    let raw = client.invoke_raw(EXCLAIM, body).await?;
    let text: String = BincodeSerializer.deserialize(&raw)?;
    assert_eq!(text, "abcd!");

    let typed: String = client.invoke_api(EXCLAIM_TYPED, ("xyz".to_owned(),)).await?;
    assert_eq!(typed, "xyz!");

    client.close().await;
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn unknown_command_fails_with_remote_exception(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let mut wire = server.connect().await?;
    wire.write(&fast_request::<&[u8]>(999, 4, &[])?).await?;
    let reply = wire.read_fast_packet().await?;
    assert_eq!((reply.command, reply.id, reply.is_exception), (999, 4, true));
    assert!(reply.error_message().contains("999"), "{}", reply.error_message());

    let client = FastClient::connect(server.addr(), FastConfig::default()).await?;
    let err = client
        .invoke_raw(999, Bytes::new())
        .await
        .expect_err("command is not registered");
    match err {
        RpcError::Call(CallError::Remote(message)) => assert!(message.contains("unknown command 999"), "{message}"),
        other => panic!("unexpected error: {other}"),
    }
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn disconnect_fails_outstanding_calls(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let client = std::sync::Arc::new(FastClient::connect(server.addr(), FastConfig::default()).await?);

    let caller = std::sync::Arc::clone(&client);
    let call = tokio::spawn(async move { caller.invoke_api::<(), ()>(STALL, ()).await });
    tokio::time::timeout(Duration::from_secs(1), async {
        while server.pool().stats().active == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.close().await;
    let outcome = tokio::time::timeout(Duration::from_secs(1), call).await??;
    assert!(matches!(
        outcome,
        Err(RpcError::Call(CallError::ConnectionClosed))
    ));
    assert!(!client.is_connected());
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn short_timeout_surfaces_as_timeout(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let config = FastConfig {
        call_timeout: Duration::from_millis(50),
        ..FastConfig::default()
    };
    let client = FastClient::connect(server.addr(), config).await?;
    let outcome = client.invoke_api::<(), ()>(STALL, ()).await;
    assert!(matches!(outcome, Err(RpcError::Call(CallError::Timeout))));
    client.close().await;
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn malformed_length_prefix_closes_connection(fast_chain: MiddlewareChain) -> TestResult {
    let server = TestServer::spawn(fast_chain).await?;
    let mut wire = server.connect().await?;
    // Declared length shorter than the fixed header.
    wire.write(&[0, 0, 0, 3, 0, 0, 0, 0]).await?;
    assert!(wire.read_to_close().await?.is_empty());
    server.shutdown().await?;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn little_endian_session_still_speaks_big_endian_fast(fast_chain: MiddlewareChain) -> TestResult {
    let config = SessionConfig {
        endianness: Endianness::Little,
        ..SessionConfig::default()
    };
    let mut pair = SessionPair::bind_with(SessionHandlers::new(Arc::new(fast_chain)), config)?;

    pair.wire.write(&fast_request(EXCLAIM, 3, &[b"le"])?).await?;
    let reply = pair.wire.read_fast_packet().await?;

    assert_eq!((reply.command, reply.id, reply.is_exception), (EXCLAIM, 3, false));
    assert_eq!(reply.body.as_ref(), BincodeSerializer.serialize(&"le!".to_owned())?.as_slice());
    assert!(pair.session.is_connected());
    Ok(())
}
