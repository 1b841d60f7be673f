use std::time::Duration;

use log::{debug, warn};
use reqwest::{
    header::{AUTHORIZATION, WWW_AUTHENTICATE},
    Client, Response, StatusCode,
};

use crate::{
    camera::{CameraUrl, Credentials},
    config::{AuthScheme, StatusPolicy},
    error::PollError,
};

/// Where the poller gets its jpeg bytes from.
pub trait ImageSource {
    async fn fetch(&self) -> Result<Vec<u8>, PollError>;
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub insecure_tls: bool,
    pub status_policy: StatusPolicy,
    pub auth: AuthScheme,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            timeout: Duration::from_secs(30),
            insecure_tls: true,
            status_policy: StatusPolicy::Lenient,
            auth: AuthScheme::Digest,
        }
    }
}

pub struct HttpFetcher {
    client: Client,
    url: CameraUrl,
    timeout: Duration,
    status_policy: StatusPolicy,
    auth: AuthScheme,
}

impl HttpFetcher {
    pub fn new(url: CameraUrl, opts: &FetchOptions) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(opts.timeout)
            .danger_accept_invalid_certs(opts.insecure_tls)
            .build()?;
        Ok(HttpFetcher { client, url, timeout: opts.timeout, status_policy: opts.status_policy, auth: opts.auth })
    }

    async fn get(&self) -> Result<Response, PollError> {
        Ok(self.client.get(self.url.request_url()).send().await?)
    }

    async fn get_basic(&self, creds: &Credentials) -> Result<Response, PollError> {
        Ok(self.client
            .get(self.url.request_url())
            .basic_auth(&creds.username, Some(&creds.password))
            .send()
            .await?)
    }

    /// Unauthenticated probe first; a 401 carrying a digest challenge gets
    /// answered once. Anything else is handed back as is.
    async fn get_digest(&self, creds: &Credentials) -> Result<Response, PollError> {
        let probe = self.get().await?;
        if probe.status() != StatusCode::UNAUTHORIZED {
            return Ok(probe);
        }
        let challenge = probe
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.trim_start().to_ascii_lowercase().starts_with("digest"))
            .map(str::to_owned)
            .ok_or_else(|| PollError::Auth("camera sent no digest challenge".to_string()))?;
        debug!("Answering digest challenge from {}", self.url);
        let header = digest_authorization(&challenge, creds, &self.url.request_uri())?;
        Ok(self.client
            .get(self.url.request_url())
            .header(AUTHORIZATION, header)
            .send()
            .await?)
    }

    async fn fetch_once(&self) -> Result<Vec<u8>, PollError> {
        let resp = match (self.auth, self.url.credentials()) {
            (AuthScheme::Digest, Some(creds)) => self.get_digest(creds).await?,
            (AuthScheme::Basic, Some(creds)) => self.get_basic(creds).await?,
            _ => self.get().await?,
        };
        let status = resp.status();
        if !status.is_success() {
            match self.status_policy {
                StatusPolicy::Strict => return Err(PollError::Status { status }),
                StatusPolicy::Lenient => warn!("Camera {} answered {}, keeping body anyway", self.url, status),
            }
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

impl ImageSource for HttpFetcher {
    /// The timeout covers the whole exchange, digest handshake and body
    /// included, not just each request.
    async fn fetch(&self) -> Result<Vec<u8>, PollError> {
        tokio::time::timeout(self.timeout, self.fetch_once())
            .await
            .map_err(|_| PollError::Timeout(self.timeout))?
    }
}

pub fn digest_authorization(challenge: &str, creds: &Credentials, uri: &str) -> Result<String, PollError> {
    let mut prompt = digest_auth::parse(challenge).map_err(|e| PollError::Auth(e.to_string()))?;
    let context = digest_auth::AuthContext::new(creds.username.as_str(), creds.password.as_str(), uri);
    let answer = prompt.respond(&context).map_err(|e| PollError::Auth(e.to_string()))?;
    Ok(answer.to_header_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{net::SocketAddr, time::Instant};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
        task::JoinHandle,
    };

    const JPEG: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg\xff\xd9";

    fn response(status: &str, headers: &[&str], body: &[u8]) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n", status, body.len());
        for h in headers {
            head.push_str(h);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        [head.as_bytes(), body].concat()
    }

    async fn serve(responses: Vec<Vec<u8>>) -> (SocketAddr, JoinHandle<Vec<String>>) {
        serve_slowly(responses, Duration::ZERO).await
    }

    /// Answers one connection per canned response, each after `delay`, and
    /// hands back the request heads it saw, lowercased.
    async fn serve_slowly(responses: Vec<Vec<u8>>, delay: Duration) -> (SocketAddr, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut seen = vec![];
            for resp in responses {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = vec![];
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = sock.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                seen.push(String::from_utf8_lossy(&buf).to_lowercase());
                tokio::time::sleep(delay).await;
                // the client may have given up already
                let _ = sock.write_all(&resp).await;
                let _ = sock.shutdown().await;
            }
            seen
        });
        (addr, handle)
    }

    fn fetcher(url: &str, opts: FetchOptions) -> HttpFetcher {
        HttpFetcher::new(CameraUrl::parse(url).unwrap(), &opts).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_body() {
        let (addr, server) = serve(vec![response("200 OK", &["Content-Type: image/jpeg"], JPEG)]).await;
        let f = fetcher(&format!("http://{}/image.jpg", addr), FetchOptions::default());
        assert_eq!(f.fetch().await.unwrap(), JPEG);
        let seen = server.await.unwrap();
        assert!(seen[0].starts_with("get /image.jpg http/1.1"));
        assert!(!seen[0].contains("authorization"));
    }

    #[tokio::test]
    async fn test_lenient_keeps_error_body() {
        let (addr, _server) = serve(vec![response("503 Service Unavailable", &[], b"busy")]).await;
        let f = fetcher(&format!("http://{}/image.jpg", addr), FetchOptions::default());
        assert_eq!(f.fetch().await.unwrap(), b"busy");
    }

    #[tokio::test]
    async fn test_strict_rejects_error_status() {
        let (addr, _server) = serve(vec![response("503 Service Unavailable", &[], b"busy")]).await;
        let opts = FetchOptions { status_policy: StatusPolicy::Strict, ..FetchOptions::default() };
        let f = fetcher(&format!("http://{}/image.jpg", addr), opts);
        match f.fetch().await {
            Err(PollError::Status { status }) => assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_digest_challenge_is_answered() {
        let challenge = r#"WWW-Authenticate: Digest realm="cam", nonce="dcd98b7102dd2f0e", qop="auth""#;
        let (addr, server) = serve(vec![
            response("401 Unauthorized", &[challenge], b""),
            response("200 OK", &[], JPEG),
        ])
        .await;
        let f = fetcher(&format!("http://user:pass@{}/image.jpg?ch=1", addr), FetchOptions::default());
        assert_eq!(f.fetch().await.unwrap(), JPEG);
        let seen = server.await.unwrap();
        assert!(!seen[0].contains("authorization"));
        assert!(seen[1].contains("authorization: digest "));
        assert!(seen[1].contains(r#"username="user""#));
        assert!(seen[1].contains(r#"uri="/image.jpg?ch=1""#));
        assert!(!seen[1].contains("pass"));
    }

    #[tokio::test]
    async fn test_digest_without_challenge_fails() {
        let (addr, _server) = serve(vec![response("401 Unauthorized", &[r#"WWW-Authenticate: Basic realm="cam""#], b"")]).await;
        let f = fetcher(&format!("http://user:pass@{}/image.jpg", addr), FetchOptions::default());
        assert!(matches!(f.fetch().await, Err(PollError::Auth(_))));
    }

    #[tokio::test]
    async fn test_basic_auth_scheme() {
        let (addr, server) = serve(vec![response("200 OK", &[], JPEG)]).await;
        let opts = FetchOptions { auth: AuthScheme::Basic, ..FetchOptions::default() };
        let f = fetcher(&format!("http://user:pass@{}/image.jpg", addr), opts);
        f.fetch().await.unwrap();
        let seen = server.await.unwrap();
        // base64("user:pass"), lowercased by the recorder
        assert!(seen[0].contains("authorization: basic dxnlcjpwyxnz"));
    }

    #[tokio::test]
    async fn test_no_auth_scheme_sends_nothing() {
        let (addr, server) = serve(vec![response("200 OK", &[], JPEG)]).await;
        let opts = FetchOptions { auth: AuthScheme::None, ..FetchOptions::default() };
        let f = fetcher(&format!("http://user:pass@{}/image.jpg", addr), opts);
        f.fetch().await.unwrap();
        let seen = server.await.unwrap();
        assert!(!seen[0].contains("authorization"));
    }

    #[tokio::test]
    async fn test_silent_camera_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let opts = FetchOptions { timeout: Duration::from_millis(300), ..FetchOptions::default() };
        let f = fetcher(&format!("http://{}/image.jpg", addr), opts);
        let started = Instant::now();
        let err = f.fetch().await.unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_digest_handshake_shares_one_timeout() {
        let challenge = r#"WWW-Authenticate: Digest realm="cam", nonce="dcd98b7102dd2f0e", qop="auth""#;
        let (addr, _server) = serve_slowly(
            vec![response("401 Unauthorized", &[challenge], b""), response("200 OK", &[], JPEG)],
            Duration::from_millis(400),
        )
        .await;
        let opts = FetchOptions { timeout: Duration::from_millis(600), ..FetchOptions::default() };
        let f = fetcher(&format!("http://user:pass@{}/image.jpg", addr), opts);
        let started = Instant::now();
        let err = f.fetch().await.unwrap_err();
        assert!(matches!(err, PollError::Timeout(_)), "{:?}", err);
        assert!(err.is_timeout());
        // each request alone fits in the timeout, both together do not
        assert!(started.elapsed() < Duration::from_millis(780), "{:?}", started.elapsed());
    }

    #[test]
    fn test_digest_authorization_header() {
        let creds = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        let header = digest_authorization(r#"Digest realm="cam", nonce="abc", qop="auth""#, &creds, "/snap.jpg").unwrap();
        assert!(header.starts_with("Digest "));
        assert!(header.contains(r#"username="admin""#));
        assert!(header.contains(r#"realm="cam""#));
        assert!(!header.contains("secret"));
    }

    #[test]
    fn test_garbage_challenge_is_auth_error() {
        let creds = Credentials { username: "admin".to_string(), password: "secret".to_string() };
        assert!(matches!(digest_authorization(r#"Digest realm="cam""#, &creds, "/"), Err(PollError::Auth(_))));
    }
}
