use audible_series_scanner::config::HttpConfig;
use audible_series_scanner::error::FetchError;
use audible_series_scanner::http_client::{EnhancedHttpClient, HttpClientConfig, PageFetcher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Minimal HTTP/1.1 server for a handful of fixed routes.
async fn serve() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let flaky_hits = Arc::new(AtomicUsize::new(0));
    let hits = flaky_hits.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else { break };
            let hits = hits.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let cookie = request
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("cookie").then(|| value.trim().to_string())
                    })
                    .unwrap_or_default();

                let (status, body) = match path.as_str() {
                    "/library" => ("200 OK", "<html><body>My Library</body></html>".to_string()),
                    "/cookie" => ("200 OK", cookie),
                    "/flaky" if hits.fetch_add(1, Ordering::SeqCst) == 0 => {
                        ("503 Service Unavailable", String::new())
                    }
                    "/flaky" => ("200 OK", "recovered".to_string()),
                    _ => ("404 Not Found", String::new()),
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{}", addr), flaky_hits)
}

fn quick_client(cookie: Option<&str>) -> EnhancedHttpClient {
    EnhancedHttpClient::with_config(HttpClientConfig {
        timeout: Duration::from_secs(5),
        max_retries: 2,
        initial_retry_delay_ms: 10,
        max_retry_delay_ms: 20,
        cookie: cookie.map(str::to_string),
        ..HttpClientConfig::default()
    })
    .expect("client")
}

#[tokio::test]
async fn test_client_from_config() {
    let config = HttpConfig {
        max_retries: 1,
        initial_retry_delay_ms: 10,
        max_retry_delay_ms: 100,
        timeout_secs: 2,
        enable_cookies: true,
        enable_compression: true,
    };
    assert!(config.create_http_client(Some("session-id=abc")).is_ok());
    assert!(config.create_http_client(None).is_ok());
}

#[tokio::test]
async fn test_fetch_page_success() {
    let (base, _) = serve().await;
    let client = quick_client(None);

    let body = client.fetch_page(&format!("{}/library", base)).await.unwrap();
    assert!(body.contains("My Library"));
}

#[tokio::test]
async fn test_non_success_status_is_an_error() {
    let (base, _) = serve().await;
    let client = quick_client(None);

    let result = client.fetch_page(&format!("{}/missing", base)).await;
    assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
}

#[tokio::test]
async fn test_retry_on_server_error() {
    let (base, hits) = serve().await;
    let client = quick_client(None);

    let body = client.fetch_page(&format!("{}/flaky", base)).await.unwrap();
    assert_eq!(body, "recovered");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_session_cookie_is_sent() {
    let (base, _) = serve().await;
    let client = quick_client(Some("session-token=xyz"));

    let body = client.fetch_page(&format!("{}/cookie", base)).await.unwrap();
    assert_eq!(body, "session-token=xyz");
}

#[tokio::test]
async fn test_connection_refused_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = EnhancedHttpClient::with_config(HttpClientConfig {
        max_retries: 0,
        ..HttpClientConfig::default()
    })
    .unwrap();

    let result = client.fetch_page(&format!("http://{}/library", addr)).await;
    assert!(matches!(result, Err(FetchError::Transport { .. })));
}
