//! Supervisor rebuilding a real TCP transport

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use rtsp_transport::component::{Component, Context, Control};
use rtsp_transport::supervisor::{ConnectionState, PipelineConfig, RtspPipeline};
use rtsp_transport::Message;

/// Session stage that issues PLAY for its URI
struct PlaySession {
    uri: String,
    cseq: u32,
}

impl Component for PlaySession {
    fn name(&self) -> &'static str {
        "play-session"
    }

    fn on_control(&mut self, control: Control, ctx: &mut Context) {
        match control {
            Control::Play => {
                self.cseq += 1;
                ctx.push_egress(Message::raw(format!(
                    "PLAY {} RTSP/1.0\r\nCSeq: {}\r\n\r\n",
                    self.uri, self.cseq
                )));
            }
            Control::ResetState => self.cseq = 0,
            Control::Stop => {}
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_reconnect_after_camera_drops_connection() {
    init_tracing();
    let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
    let port = listener.local_addr().unwrap().port();
    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<String>();

    // Drops the first connection after the first request, keeps the second
    tokio::spawn(async move {
        for attempt in 0..2 {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            requests_tx
                .send(String::from_utf8_lossy(&buf[..n]).into_owned())
                .unwrap();
            if attempt == 1 {
                let mut rest = Vec::new();
                let _ = socket.read_to_end(&mut rest).await;
            }
        }
    });

    let config = PipelineConfig::new(format!("rtsp://127.0.0.1:{}/live", port))
        .reconnect_interval(Duration::from_millis(100))
        .connection_timeout(Duration::from_secs(5));
    let mut rtsp = assert_ok!(RtspPipeline::new(config, |uri: &str| {
        Box::new(PlaySession {
            uri: uri.to_string(),
            cseq: 0,
        }) as Box<dyn Component>
    }));

    rtsp.play();

    let first = tokio::select! {
        request = requests_rx.recv() => request.unwrap(),
        _ = rtsp.run() => unreachable!("pipeline stopped"),
    };
    assert!(first.starts_with("PLAY rtsp://127.0.0.1:"));

    let second = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::select! {
            request = requests_rx.recv() => request.unwrap(),
            _ = rtsp.run() => unreachable!("pipeline stopped"),
        }
    })
    .await
    .expect("no reconnection");

    // Session state was reset before the new PLAY
    assert!(second.contains("CSeq: 1\r\n"));
    assert_eq!(rtsp.state(), ConnectionState::Connected);
    assert_eq!(rtsp.stats().reconnects, 1);
    assert_eq!(rtsp.stats().disconnects, 1);
    assert_eq!(rtsp.stats().transports_created, 2);
    assert_eq!(rtsp.pipeline().len(), 2);

    rtsp.end().await;
    assert_eq!(rtsp.state(), ConnectionState::Stopped);
}

#[tokio::test]
async fn test_spawned_pipeline_ends_cleanly() {
    init_tracing();
    let listener = assert_ok!(TcpListener::bind("127.0.0.1:0").await);
    let port = listener.local_addr().unwrap().port();
    let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<String>();

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 1024];
        let n = socket.read(&mut buf).await.unwrap();
        requests_tx
            .send(String::from_utf8_lossy(&buf[..n]).into_owned())
            .unwrap();
        // Returns once the client side is torn down
        let mut rest = Vec::new();
        let _ = socket.read_to_end(&mut rest).await;
    });

    let config = PipelineConfig::new(format!("rtsp://127.0.0.1:{}/live", port));
    let rtsp = assert_ok!(RtspPipeline::new(config, |uri: &str| {
        Box::new(PlaySession {
            uri: uri.to_string(),
            cseq: 0,
        }) as Box<dyn Component>
    }));

    let handle = rtsp.spawn();
    assert!(handle.play().await);

    let request = tokio::time::timeout(Duration::from_secs(5), requests_rx.recv())
        .await
        .expect("no request")
        .unwrap();
    assert!(request.starts_with("PLAY "));
    assert_eq!(handle.state().await, Some(ConnectionState::Connected));

    handle.end().await;

    let server = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("transport not torn down");
    assert_ok!(server);
}
