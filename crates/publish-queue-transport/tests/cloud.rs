//! Cloud publisher against a local HTTP responder.

use publish_queue_core::{
    CompletionNotifier, ConnectivityFlag, MemoryRecordStore, PublishFlags, PublishQueue, Publisher,
    QueueConfig, QueuedEvent,
};
use publish_queue_transport::{CloudPublisher, CloudPublisherConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

const WAIT: Duration = Duration::from_secs(10);

/// What the responder does with each request.
#[derive(Clone, Copy)]
enum Reply {
    Status(u16),
    Hang,
}

/// Accepts connections and answers every request the same way.
///
/// Returns the base URL and a stream of raw requests.
async fn responder(reply: Reply) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                let _ = tx.send(request);
                match reply {
                    Reply::Status(status) => {
                        let response = format!(
                            "HTTP/1.1 {status} Test\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    }
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                }
            });
        }
    });

    (format!("http://{addr}"), rx)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn notifier(attempt: u64) -> (CompletionNotifier, oneshot::Receiver<bool>) {
    let (tx, rx) = oneshot::channel();
    let notifier = CompletionNotifier::new(attempt, move |ok| {
        let _ = tx.send(ok);
    });
    (notifier, rx)
}

fn publisher(endpoint: String, token: Option<&str>, timeout_secs: u64) -> CloudPublisher {
    CloudPublisher::spawn(
        CloudPublisherConfig {
            endpoint,
            auth_token: token.map(str::to_string),
            timeout_secs,
        },
        &Handle::current(),
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_publish_notifies_true() {
    let (endpoint, mut requests) = responder(Reply::Status(200)).await;
    let publisher = publisher(endpoint, Some("secret"), 5);
    assert!(publisher.background_delivery());

    let (notifier, outcome) = notifier(1);
    let accepted = publisher.publish(
        QueuedEvent::new("testEvent", "1", PublishFlags::WITH_ACK),
        notifier,
    );
    assert!(accepted);

    let ok = tokio::time::timeout(WAIT, outcome).await.unwrap().unwrap();
    assert!(ok);
    assert!(!publisher.is_busy());

    let request = requests.recv().await.unwrap();
    assert!(request.starts_with("POST /v1/events HTTP/1.1"));
    assert!(request.to_lowercase().contains("authorization: bearer secret"));
    assert!(request.contains(r#""name":"testEvent""#));
    assert!(request.contains(r#""data":"1""#));
    assert!(request.contains(r#""withAck":true"#));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_error_notifies_false() {
    let (endpoint, _requests) = responder(Reply::Status(500)).await;
    let publisher = publisher(endpoint, None, 5);

    let (notifier, outcome) = notifier(1);
    assert!(publisher.publish(QueuedEvent::new("evt", "", PublishFlags::NONE), notifier));

    let ok = tokio::time::timeout(WAIT, outcome).await.unwrap().unwrap();
    assert!(!ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_endpoint_notifies_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let publisher = publisher(format!("http://{addr}"), None, 5);
    let (notifier, outcome) = notifier(1);
    assert!(publisher.publish(QueuedEvent::new("evt", "", PublishFlags::NONE), notifier));

    let ok = tokio::time::timeout(WAIT, outcome).await.unwrap().unwrap();
    assert!(!ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn busy_publisher_refuses_second_request() {
    let (endpoint, _requests) = responder(Reply::Hang).await;
    let publisher = publisher(endpoint, None, 1);

    let (first, first_outcome) = notifier(1);
    assert!(publisher.publish(QueuedEvent::new("first", "", PublishFlags::NONE), first));
    assert!(publisher.is_busy());

    // Refused requests are cancelled, never notified
    let (second, second_outcome) = notifier(2);
    assert!(!publisher.publish(QueuedEvent::new("second", "", PublishFlags::NONE), second));
    assert!(second_outcome.await.is_err());

    // Request timeout surfaces as a failed publish
    let ok = tokio::time::timeout(WAIT, first_outcome).await.unwrap().unwrap();
    assert!(!ok);
    assert!(!publisher.is_busy());
}

#[tokio::test]
async fn current_thread_runtime_is_not_background() {
    let publisher = CloudPublisher::spawn_current(CloudPublisherConfig::default()).unwrap();
    assert!(!publisher.background_delivery());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn queue_drains_through_cloud_publisher() {
    let (endpoint, mut requests) = responder(Reply::Status(200)).await;
    let publisher = Arc::new(publisher(endpoint, None, 5));

    let queue = PublishQueue::new()
        .with_store(Arc::new(MemoryRecordStore::new()))
        .with_publisher(publisher)
        .with_connectivity(Arc::new(ConnectivityFlag::new(true)))
        .with_config(QueueConfig {
            wait_after_connect_ms: 0,
            wait_between_publish_ms: 0,
            wait_after_failure_ms: 50,
            ..Default::default()
        });
    queue.setup().unwrap();

    for i in 0..3 {
        queue
            .enqueue("testEvent", &i.to_string(), PublishFlags::NONE)
            .unwrap();
    }

    let drained = tokio::time::timeout(WAIT, async {
        while queue.num_events() > 0 {
            queue.tick();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(drained.is_ok());

    for expected in ["0", "1", "2"] {
        let request = requests.recv().await.unwrap();
        assert!(request.contains(&format!(r#""data":"{expected}""#)));
    }
    assert_eq!(queue.metrics().published, 3);
}
