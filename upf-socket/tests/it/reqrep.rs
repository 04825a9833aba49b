use std::time::Duration;

use bytes::Bytes;
use tokio_stream::StreamExt;

use upf_socket::{RepSocket, ReqError, ReqSocket};
use upf_transport::Tcp;
use upf_wire::{
    CommandArg, CommandRequest, FarKeys, Pack, Request, Response, Unpack,
};

fn localhost() -> std::net::SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

#[tokio::test]
async fn reqrep_works() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rep = RepSocket::new(Tcp::new());
    let mut req = ReqSocket::new(Tcp::new());

    rep.bind(localhost()).await.unwrap();
    req.connect(rep.local_addr().unwrap()).await.unwrap();

    tokio::spawn(async move {
        while let Some(request) = rep.next().await {
            let msg = request.msg().clone();
            request.respond(msg).unwrap();
        }
    });

    let hello = Bytes::from_static(b"hello");
    let response = req.request(hello.clone()).await.unwrap();
    assert_eq!(hello, response, "expected {:?}, got {:?}", hello, response);
}

#[tokio::test]
async fn typed_envelopes_cross_the_socket() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rep = RepSocket::new(Tcp::new());
    rep.bind(localhost()).await.unwrap();

    let mut req = ReqSocket::new(Tcp::new());
    req.connect(rep.local_addr().unwrap()).await.unwrap();

    tokio::spawn(async move {
        while let Some(request) = rep.next().await {
            let mut payload = request.msg().clone();
            let response = match Request::unpack(&mut payload) {
                Ok(Request::Module(cmd)) => {
                    Response::failure(2, format!("{} on {}: not found", cmd.kind(), cmd.name))
                }
                Ok(other) => Response::failure(22, format!("unexpected {other:?}")),
                Err(e) => Response::failure(22, e.to_string()),
            };
            request.respond(response.to_bytes()).unwrap();
        }
    });

    let request = Request::Module(CommandRequest::new(
        "upfeBPF",
        CommandArg::DeleteFar(FarKeys { far_id: 1, fse_id: 1 }),
    ));
    let mut raw = req.request(request.to_bytes()).await.unwrap();
    let response = Response::unpack(&mut raw).unwrap();

    assert_eq!(response.error.code, 2);
    assert_eq!(response.error.errmsg, "delete_far on upfeBPF: not found");
}

#[tokio::test]
async fn pipelined_requests_are_matched_by_id() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rep = RepSocket::new(Tcp::new());
    rep.bind(localhost()).await.unwrap();

    let mut req = ReqSocket::new(Tcp::new());
    req.connect(rep.local_addr().unwrap()).await.unwrap();

    // Respond in reverse order of arrival.
    tokio::spawn(async move {
        let mut batch = Vec::new();
        while let Some(request) = rep.next().await {
            batch.push(request);
            if batch.len() == 8 {
                for request in batch.drain(..).rev() {
                    let msg = request.msg().clone();
                    request.respond(msg).unwrap();
                }
            }
        }
    });

    let requests: Vec<Bytes> = (0..8u8).map(|i| Bytes::from(vec![i; 16])).collect();
    let responses =
        futures::future::join_all(requests.iter().map(|r| req.request(r.clone()))).await;

    for (request, response) in requests.iter().zip(responses) {
        assert_eq!(request, &response.unwrap());
    }
}

#[tokio::test]
async fn reqrep_drop_server() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rep = RepSocket::new(Tcp::new());
    let mut req = ReqSocket::new(Tcp::new());

    rep.bind(localhost()).await.unwrap();
    req.connect(rep.local_addr().unwrap()).await.unwrap();

    let server = tokio::spawn(async move {
        let request = rep.next().await.unwrap();
        let msg = request.msg().clone();
        request.respond(msg).unwrap();
        rep
    });

    let hello = Bytes::from_static(b"hello");
    let response = req.request(hello.clone()).await.unwrap();
    assert_eq!(hello, response);

    // Dropping the socket stops its driver at the next wakeup, which closes the peer.
    drop(server.await.unwrap());

    match req.request_with_timeout(hello.clone(), Duration::from_millis(500)).await {
        Ok(response) => panic!("expected failure, got {response:?}"),
        Err(e) => {
            assert!(matches!(e, ReqError::SocketClosed | ReqError::Timeout), "unexpected {e:?}")
        }
    }
}
