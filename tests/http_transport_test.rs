use futures_util::StreamExt;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use remotetalk_client::client::{AsyncHandle, HttpTransport, Session, TalkTransport};
use remotetalk_client::ipc::{AudioChunk, TalkRequest, SERVER_NOT_FOUND};
use remotetalk_client::AudioFormat;

const PARAMS_BODY: &str = r#"{
    "host": "VOICEROID2",
    "params": {"mute": 1.0, "force_mono": 0.0, "cast": 0.0, "params": [1.0, 1.2, 0.8]},
    "avators": [
        {"id": 0, "name": "Akane", "param_names": ["volume", "speed", "pitch"]},
        {"id": 1, "name": "Aoi"}
    ]
}"#;

fn chunk(samples: usize) -> AudioChunk {
    AudioChunk {
        format: AudioFormat::S16,
        frequency: 22050,
        channels: 1,
        data: vec![0; samples * 2],
    }
}

// Frames as written by LengthDelimitedCodec: u32 big-endian length, then payload
fn talk_body(chunks: &[AudioChunk]) -> Vec<u8> {
    let mut body = Vec::new();
    for chunk in chunks {
        let frame = chunk.encode().unwrap();
        body.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        body.extend_from_slice(&frame);
    }
    body
}

fn transport_for(server: &MockServer) -> HttpTransport {
    let address = server.address();
    HttpTransport::new(&address.ip().to_string(), address.port()).unwrap()
}

async fn finish<T>(handle: &mut AsyncHandle<T>) {
    for _ in 0..500 {
        if handle.is_finished() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("handle did not finish");
}

#[tokio::test]
async fn test_status_parses_server_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/params"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PARAMS_BODY))
        .mount(&server)
        .await;

    let status = transport_for(&server).status().await.unwrap();
    assert_eq!(status.host, "VOICEROID2");
    assert!(status.params.mute);
    assert!(!status.params.force_mono);
    assert_eq!(status.params.params[1], 1.2);
    assert_eq!(status.params.params[3], 1.0);
    assert_eq!(status.casts.len(), 2);
    assert_eq!(status.casts[0].param_names.len(), 3);
    assert!(status.casts[1].param_names.is_empty());
}

#[tokio::test]
async fn test_ready_and_stop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ready"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server);
    assert!(transport.ready().await.unwrap());
    assert!(transport.stop().await.unwrap());
}

#[tokio::test]
async fn test_talk_streams_until_terminator() {
    let server = MockServer::start().await;
    let empty = AudioChunk {
        data: Vec::new(),
        ..chunk(0)
    };
    Mock::given(method("GET"))
        .and(path("/talk"))
        .and(query_param("cast", "1"))
        .and(query_param("mute", "1"))
        .and(query_param("text", "こんにちは"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(talk_body(&[chunk(100), chunk(50), empty, chunk(10)])),
        )
        .mount(&server)
        .await;

    let request = TalkRequest::new(1, "こんにちは");
    let chunks: Vec<AudioChunk> = transport_for(&server)
        .talk(&request)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;

    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].data.len(), 200);
    assert_eq!(chunks[1].data.len(), 100);
}

#[tokio::test]
async fn test_talk_reports_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/talk"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let request = TalkRequest::new(0, "hello");
    assert!(transport_for(&server).talk(&request).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/params"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PARAMS_BODY))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/talk"))
        .respond_with(
            ResponseTemplate::new(200).set_body_bytes(talk_body(&[chunk(300), chunk(200)])),
        )
        .mount(&server)
        .await;

    let address = server.address();
    let mut session = Session::connect(
        tokio::runtime::Handle::current(),
        &address.ip().to_string(),
        address.port(),
    );

    let mut status = session.refresh_status();
    finish(&mut status).await;
    assert!(status.bool_value());
    assert_eq!(session.host(), "VOICEROID2");
    let casts = session.casts();
    assert_eq!(casts[1].name, "Aoi");
    assert_eq!(casts[1].host, "VOICEROID2");

    let mut talk = session.talk(&TalkRequest::new(0, "hello"));
    finish(&mut talk).await;
    assert!(talk.bool_value());

    let buffer = session.pull_buffer();
    assert!(buffer.is_complete());
    assert_eq!(buffer.sample_length(), 500);
    assert_eq!(buffer.frequency(), 22050);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_without_server_reports_not_found() {
    // grab a free port and release it again
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut session = Session::connect(tokio::runtime::Handle::current(), "127.0.0.1", port);
    let mut status = session.refresh_status();
    finish(&mut status).await;

    assert!(!status.bool_value());
    assert_eq!(session.host(), SERVER_NOT_FOUND);
    assert!(session.casts().is_empty());
    assert!(!session.is_reachable());
}
