//! HttpGateway against a local mockito agent

use mockito::{Matcher, Server, ServerGuard};
use mtconnect_client::{
    AgentClient, Asset, AssetsDocument, AssetsRequest, ClientConfig, ClientEvent, CurrentRequest,
    DataItemCategory, DataItemDescriptor, DeviceDescriptor, ErrorDocument, GatewayError, Header,
    PollingMode, ProbeDocument, ProbeRequest, RawObservation, RequestGateway, SampleRequest,
    StreamRequest, StreamsDocument,
};
use mtconnect_http::{HttpGateway, HttpGatewayConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const JSON: &str = "application/json";
const BOUNDARY: &str = "MTCSTREAM";

fn probe_body() -> String {
    let document = ProbeDocument {
        header: Header::new(7, 1, 101),
        devices: vec![DeviceDescriptor::new("uuid-mill", "Mill").with_data_item(
            DataItemDescriptor::new("exec", DataItemCategory::Event, "EXECUTION"),
        )],
    };
    serde_json::to_string(&document).unwrap()
}

fn streams_body(next: u64, sequences: &[u64]) -> String {
    let document = StreamsDocument {
        header: Header::new(7, 1, next),
        observations: sequences
            .iter()
            .map(|&seq| RawObservation::new("uuid-mill", "exec", "EXECUTION", seq, "ACTIVE"))
            .collect(),
    };
    serde_json::to_string(&document).unwrap()
}

fn error_body(code: &str) -> String {
    serde_json::to_string(&ErrorDocument::single(code, "rejected")).unwrap()
}

fn multipart(parts: &[String], closing: bool) -> String {
    let mut body = String::new();
    for part in parts {
        body.push_str(&format!(
            "--{}\r\nContent-type: {}\r\nContent-length: {}\r\n\r\n{}\r\n",
            BOUNDARY,
            JSON,
            part.len(),
            part
        ));
    }
    if closing {
        body.push_str(&format!("--{}--\r\n", BOUNDARY));
    }
    body
}

fn gateway(server: &ServerGuard) -> HttpGateway {
    let config = HttpGatewayConfig::new(&server.url())
        .unwrap()
        .with_request_timeout(Duration::from_secs(2));
    HttpGateway::new(config).unwrap()
}

fn stream_request(from: Option<u64>) -> StreamRequest {
    StreamRequest {
        device: None,
        path: None,
        from,
        interval: Duration::from_millis(100),
        heartbeat: Duration::from_secs(1),
        count: 50,
    }
}

#[tokio::test]
async fn test_probe_is_decoded() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/probe")
        .match_header("accept", JSON)
        .with_status(200)
        .with_header("content-type", JSON)
        .with_body(probe_body())
        .create_async()
        .await;

    let document = gateway(&server).probe(&ProbeRequest::default()).await.unwrap();

    mock.assert_async().await;
    assert_eq!(document.header.instance_id, 7);
    assert_eq!(document.devices[0].uuid, "uuid-mill");
}

#[tokio::test]
async fn test_device_scoped_current() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/Mill/current")
        .match_query(Matcher::UrlEncoded("path".into(), "//Axes".into()))
        .with_status(200)
        .with_body(streams_body(101, &[99, 100]))
        .create_async()
        .await;

    let request = CurrentRequest {
        device: Some("Mill".to_string()),
        path: Some("//Axes".to_string()),
        at: None,
    };
    let document = gateway(&server).current(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(document.max_sequence(), Some(100));
}

#[tokio::test]
async fn test_sample_query_parameters() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/sample")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("from".into(), "100".into()),
            Matcher::UrlEncoded("count".into(), "25".into()),
        ]))
        .with_status(200)
        .with_body(streams_body(103, &[100, 101, 102]))
        .create_async()
        .await;

    let request = SampleRequest {
        from: Some(100),
        count: Some(25),
        ..Default::default()
    };
    let document = gateway(&server).sample(&request).await.unwrap();

    mock.assert_async().await;
    assert_eq!(document.observations.len(), 3);
}

#[tokio::test]
async fn test_assets_and_single_asset() {
    let mut server = Server::new_async().await;
    let body = serde_json::to_string(&AssetsDocument {
        instance_id: 7,
        assets: vec![Asset::new("ABC123", "CuttingTool", "<CuttingTool/>")],
    })
    .unwrap();

    let list = server
        .mock("GET", "/assets")
        .match_query(Matcher::UrlEncoded("count".into(), "10".into()))
        .with_body(&body)
        .create_async()
        .await;
    let single = server
        .mock("GET", "/asset/ABC123")
        .with_body(&body)
        .create_async()
        .await;

    let gateway = gateway(&server);
    let request = AssetsRequest {
        count: Some(10),
        ..Default::default()
    };
    assert_eq!(gateway.assets(&request).await.unwrap().assets.len(), 1);
    let document = gateway.asset("ABC123").await.unwrap();

    list.assert_async().await;
    single.assert_async().await;
    assert_eq!(document.assets[0].asset_id, "ABC123");
}

#[tokio::test]
async fn test_error_document_with_error_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/Lathe/probe")
        .with_status(404)
        .with_body(error_body("NO_DEVICE"))
        .create_async()
        .await;

    let request = ProbeRequest {
        device: Some("Lathe".to_string()),
    };
    match gateway(&server).probe(&request).await {
        Err(GatewayError::Protocol(document)) => assert_eq!(document.errors[0].code, "NO_DEVICE"),
        other => panic!("Expected protocol error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_error_document_with_success_status() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(error_body("OUT_OF_RANGE"))
        .create_async()
        .await;

    let result = gateway(&server).sample(&SampleRequest::default()).await;
    assert!(matches!(result, Err(GatewayError::Protocol(_))));
}

#[tokio::test]
async fn test_server_error_without_document() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/probe")
        .with_status(500)
        .with_body("Internal Server Error")
        .create_async()
        .await;

    match gateway(&server).probe(&ProbeRequest::default()).await {
        Err(GatewayError::Connection(message)) => assert!(message.contains("500")),
        other => panic!("Expected connection error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_empty_body_is_no_document() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/current")
        .with_status(200)
        .with_body("")
        .create_async()
        .await;

    let result = gateway(&server).current(&CurrentRequest::default()).await;
    assert!(matches!(result, Err(GatewayError::NoDocument)));
}

#[tokio::test]
async fn test_garbage_body_is_internal_error() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/probe")
        .with_status(200)
        .with_body("<MTConnectDevices>not json</MTConnectDevices>")
        .create_async()
        .await;

    let result = gateway(&server).probe(&ProbeRequest::default()).await;
    assert!(matches!(result, Err(GatewayError::Internal(_))));
}

#[tokio::test]
async fn test_unreachable_agent_is_connection_error() {
    let gateway = HttpGateway::connect("http://127.0.0.1:9").unwrap();
    let result = gateway.probe(&ProbeRequest::default()).await;
    assert!(matches!(
        result,
        Err(GatewayError::Connection(_)) | Err(GatewayError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_stream_yields_parts_then_ends() {
    let mut server = Server::new_async().await;
    let body = multipart(&[streams_body(11, &[10]), streams_body(13, &[11, 12])], true);
    let mock = server
        .mock("GET", "/sample")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("from".into(), "10".into()),
            Matcher::UrlEncoded("interval".into(), "100".into()),
            Matcher::UrlEncoded("heartbeat".into(), "1000".into()),
            Matcher::UrlEncoded("count".into(), "50".into()),
        ]))
        .with_status(200)
        .with_header(
            "content-type",
            &format!("multipart/x-mixed-replace;boundary={}", BOUNDARY),
        )
        .with_body(body)
        .create_async()
        .await;

    let mut session = gateway(&server)
        .open_stream(&stream_request(Some(10)), CancellationToken::new())
        .await
        .unwrap();

    let first = session.next_document().await.unwrap().unwrap();
    assert_eq!(first.max_sequence(), Some(10));
    let second = session.next_document().await.unwrap().unwrap();
    assert_eq!(second.max_sequence(), Some(12));
    assert!(session.next_document().await.unwrap().is_none());
    session.close().await;

    mock.assert_async().await;
}

#[tokio::test]
async fn test_stream_error_part() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header(
            "content-type",
            &format!("multipart/x-mixed-replace; boundary=\"{}\"", BOUNDARY),
        )
        .with_body(multipart(&[error_body("OUT_OF_RANGE")], true))
        .create_async()
        .await;

    let mut session = gateway(&server)
        .open_stream(&stream_request(None), CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(
        session.next_document().await,
        Err(GatewayError::Protocol(document)) if document.errors[0].code == "OUT_OF_RANGE"
    ));
}

#[tokio::test]
async fn test_stream_part_over_size_limit() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header(
            "content-type",
            &format!("multipart/x-mixed-replace;boundary={}", BOUNDARY),
        )
        .with_body(multipart(&[streams_body(2, &[1])], true))
        .create_async()
        .await;

    let config = HttpGatewayConfig::new(&server.url())
        .unwrap()
        .with_max_part_size(32);
    let mut session = HttpGateway::new(config)
        .unwrap()
        .open_stream(&stream_request(None), CancellationToken::new())
        .await
        .unwrap();

    match session.next_document().await {
        Err(GatewayError::Internal(message)) => assert!(message.contains("limit")),
        other => panic!("Expected internal error, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_stream_rejected_by_agent() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(400)
        .with_body(error_body("INVALID_REQUEST"))
        .create_async()
        .await;

    let result = gateway(&server)
        .open_stream(&stream_request(Some(1)), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(GatewayError::Protocol(_))));
}

#[tokio::test]
async fn test_stream_without_multipart_content_type() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", JSON)
        .with_body(streams_body(2, &[1]))
        .create_async()
        .await;

    let result = gateway(&server)
        .open_stream(&stream_request(None), CancellationToken::new())
        .await;
    assert!(matches!(result, Err(GatewayError::Internal(_))));
}

#[tokio::test]
async fn test_close_ends_streams_and_rejects_requests() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header(
            "content-type",
            &format!("multipart/x-mixed-replace;boundary={}", BOUNDARY),
        )
        .with_body(multipart(&[streams_body(2, &[1])], false))
        .create_async()
        .await;

    let gateway = gateway(&server);
    let mut session = gateway
        .open_stream(&stream_request(None), CancellationToken::new())
        .await
        .unwrap();
    assert!(session.next_document().await.unwrap().is_some());

    gateway.close();

    assert!(session.next_document().await.unwrap().is_none());
    assert!(matches!(
        gateway.probe(&ProbeRequest::default()).await,
        Err(GatewayError::Connection(_))
    ));
}

#[tokio::test]
async fn test_client_polls_over_http() {
    let mut server = Server::new_async().await;
    server
        .mock("GET", "/probe")
        .with_body(probe_body())
        .create_async()
        .await;
    server
        .mock("GET", "/current")
        .with_body(streams_body(101, &[100]))
        .create_async()
        .await;
    server
        .mock("GET", "/sample")
        .match_query(Matcher::Any)
        .with_body(streams_body(104, &[101, 102, 103]))
        .create_async()
        .await;

    let config = ClientConfig::polling()
        .with_polling_mode(PollingMode::Sample)
        .with_polling_interval(Duration::from_millis(50));
    let gateway = gateway(&server);
    let client = AgentClient::new(config, Arc::new(gateway.clone())).unwrap();
    let mut events = client.event_stream().unwrap();
    client.start(None).unwrap();

    let mut sequences = Vec::new();
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);
    while !sequences.contains(&103) {
        tokio::select! {
            _ = &mut deadline => panic!("Timed out waiting for sampled observations"),
            event = events.recv() => match event {
                Some(ClientEvent::ObservationReceived(obs)) => sequences.push(obs.sequence()),
                Some(_) => {}
                None => panic!("Event stream closed"),
            }
        }
    }

    client.stop().await.unwrap();
    gateway.close();

    assert_eq!(&sequences[..4], &[100, 101, 102, 103]);
    assert_eq!(client.position().last_sequence, 103);
}
