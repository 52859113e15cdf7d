//! Client tests against a loopback HTTP server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tfprobe_health::{
    AccessToken, AvailabilityState, CredentialProvider, EnvironmentCredential, HealthApi,
    HealthClientConfig, HealthError, ResourceHealthClient,
};

const RESOURCE_ID: &str =
    "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/stprobe01";

/// Canned response served to one connection.
struct Canned {
    status: u16,
    body: &'static str,
}

/// Serve `responses` in order, one per connection, and record each request.
async fn serve(responses: Vec<Canned>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = requests.clone();

    tokio::spawn(async move {
        for canned in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            seen.lock().push(request);

            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                canned.status,
                canned.body.len(),
                canned.body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
    });

    (format!("http://{}", addr), requests)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .find_map(|l| {
                    let (k, v) = l.split_once(':')?;
                    k.eq_ignore_ascii_case("content-length")
                        .then(|| v.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

/// Accept connections and read requests without ever answering.
async fn serve_silently() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            held.push(socket);
        }
    });

    format!("http://{}", addr)
}

fn client(endpoint: String, retry_attempts: u32) -> ResourceHealthClient {
    ResourceHealthClient::new(HealthClientConfig {
        endpoint,
        timeout_seconds: 10,
        retry_attempts,
        retry_delay_seconds: 0,
    })
    .unwrap()
}

const AVAILABLE: &str =
    r#"{"properties": {"availabilityState": "Available", "summary": "No known problems"}}"#;

#[tokio::test]
async fn test_availability_query() {
    let (endpoint, requests) = serve(vec![Canned {
        status: 200,
        body: AVAILABLE,
    }])
    .await;

    let status = client(endpoint, 1)
        .availability(RESOURCE_ID, &AccessToken::new("tok"))
        .await
        .unwrap();

    assert_eq!(status.state, AvailabilityState::Available);
    assert_eq!(status.summary.as_deref(), Some("No known problems"));

    let request = requests.lock()[0].clone();
    assert!(request.starts_with(
        "GET /subscriptions/0000/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/stprobe01/providers/Microsoft.ResourceHealth/availabilityStatuses/current?api-version=2017-07-01 "
    ));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer tok"));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (endpoint, requests) = serve(vec![
        Canned {
            status: 500,
            body: "{}",
        },
        Canned {
            status: 429,
            body: "{}",
        },
        Canned {
            status: 200,
            body: AVAILABLE,
        },
    ])
    .await;

    let status = client(endpoint, 5)
        .availability(RESOURCE_ID, &AccessToken::new("tok"))
        .await
        .unwrap();

    assert!(status.state.is_available());
    assert_eq!(requests.lock().len(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (endpoint, requests) = serve(vec![
        Canned {
            status: 503,
            body: "busy",
        },
        Canned {
            status: 503,
            body: "busy",
        },
    ])
    .await;

    let result = client(endpoint, 2)
        .availability(RESOURCE_ID, &AccessToken::new("tok"))
        .await;

    assert!(matches!(result, Err(HealthError::HealthQuery(msg)) if msg.contains("503")));
    assert_eq!(requests.lock().len(), 2);
}

#[tokio::test]
async fn test_unresponsive_endpoint_times_out_across_retries() {
    let endpoint = serve_silently().await;
    let client = ResourceHealthClient::new(HealthClientConfig {
        endpoint,
        timeout_seconds: 1,
        retry_attempts: 5,
        retry_delay_seconds: 0,
    })
    .unwrap();

    let started = Instant::now();
    let result = client
        .availability(RESOURCE_ID, &AccessToken::new("tok"))
        .await;

    assert!(matches!(result, Err(HealthError::Timeout(1))));
    // one overall deadline, not one per attempt
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let (endpoint, requests) = serve(vec![Canned {
        status: 404,
        body: r#"{"error": {"code": "ResourceNotFound"}}"#,
    }])
    .await;

    let result = client(endpoint, 5)
        .availability(RESOURCE_ID, &AccessToken::new("tok"))
        .await;

    assert!(matches!(result, Err(HealthError::HealthQuery(msg)) if msg.contains("ResourceNotFound")));
    assert_eq!(requests.lock().len(), 1);
}

#[tokio::test]
async fn test_environment_credential_uses_client_credentials_grant() {
    let (authority, requests) = serve(vec![Canned {
        status: 200,
        body: r#"{"token_type": "Bearer", "expires_in": 3599, "access_token": "sp-token"}"#,
    }])
    .await;

    let credential = EnvironmentCredential::from_lookup(|key| match key {
        "AZURE_TENANT_ID" => Some("tenant-1".to_string()),
        "AZURE_CLIENT_ID" => Some("client-1".to_string()),
        "AZURE_CLIENT_SECRET" => Some("secret-1".to_string()),
        _ => None,
    })
    .with_authority(authority);

    let token = credential.get_token().await.unwrap().unwrap();
    assert_eq!(token.token, "sp-token");
    assert!(token.expires_on.is_some());

    let request = requests.lock()[0].clone();
    assert!(request.starts_with("POST /tenant-1/oauth2/v2.0/token "));
    assert!(request.contains("grant_type=client_credentials"));
    assert!(request.contains("client_id=client-1"));
}

#[tokio::test]
async fn test_rejected_secret_is_authorization_error() {
    let (authority, _) = serve(vec![Canned {
        status: 401,
        body: r#"{"error": "invalid_client"}"#,
    }])
    .await;

    let credential = EnvironmentCredential::from_lookup(|key| Some(format!("{}-value", key)))
        .with_authority(authority);

    assert!(matches!(
        credential.get_token().await,
        Err(HealthError::Authorization(msg)) if msg.contains("invalid_client")
    ));
}
