//! Authorization code capture on a loopback redirect, with PKCE.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use reqwest::Url;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::error::AuthError;

/// PKCE verifier and its S256 challenge.
#[derive(Debug, Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        // 64 hex characters, within the 43..=128 verifier length.
        let verifier = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self {
            verifier,
            challenge,
        }
    }
}

pub fn new_state() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Build the browser URL for the authorization request.
pub fn authorize_url(
    endpoint: &Url,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: &Pkce,
) -> Url {
    let mut url = endpoint.clone();
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_mode", "query")
        .append_pair("scope", &scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", &pkce.challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("prompt", "select_account");
    url
}

/// What the browser sent to the redirect listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Code { code: String, state: Option<String> },
    Error { error: String, description: Option<String> },
    /// Unrelated request, e.g. a favicon probe.
    Other,
}

impl Redirect {
    /// Turn the redirect into the authorization code, checking `state`.
    ///
    /// `Ok(None)` means the request was unrelated and the listener should keep
    /// waiting.
    pub fn into_code(self, expected_state: &str) -> Result<Option<String>, AuthError> {
        match self {
            Redirect::Code { code, state } => {
                if state.as_deref() != Some(expected_state) {
                    return Err(AuthError::StateMismatch);
                }
                Ok(Some(code))
            }
            Redirect::Error { error, .. } if error == "access_denied" => Err(AuthError::Cancelled),
            Redirect::Error { error, description } => Err(AuthError::Denied(match description {
                Some(description) => format!("{}: {}", error, description),
                None => error,
            })),
            Redirect::Other => Ok(None),
        }
    }
}

/// Parse the request line of an HTTP request, e.g.
/// `GET /?code=abc&state=xyz HTTP/1.1`.
pub fn parse_redirect(request_line: &str) -> Redirect {
    let mut parts = request_line.split_whitespace();
    let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
        return Redirect::Other;
    };
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Redirect::Other;
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    match (code, error) {
        (_, Some(error)) => Redirect::Error { error, description },
        (Some(code), None) if !code.is_empty() => Redirect::Code { code, state },
        _ => Redirect::Other,
    }
}

/// Listener waiting for the identity provider to redirect the browser back.
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Bind on 127.0.0.1; port 0 picks a free one.
    pub async fn bind(port: u16) -> Result<Self, AuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let port = listener.local_addr()?.port();
        debug!(port, "listening for sign-in redirect");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Wait for the redirect carrying the authorization code.
    pub async fn wait_for_code(
        &self,
        expected_state: &str,
        cancel: &CancelToken,
    ) -> Result<String, AuthError> {
        cancel
            .run(self.accept_until_code(expected_state), || AuthError::Cancelled)
            .await
    }

    async fn accept_until_code(&self, expected_state: &str) -> Result<String, AuthError> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!(%peer, "sign-in redirect connection");
            if let Some(code) = handle_connection(stream, expected_state).await? {
                info!("received authorization code");
                return Ok(code);
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    expected_state: &str,
) -> Result<Option<String>, AuthError> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    // Drain headers so closing the socket does not reset the connection.
    let mut header = String::new();
    loop {
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim_end().is_empty() {
            break;
        }
    }

    let result = parse_redirect(request_line.trim_end()).into_code(expected_state);
    let (status, message) = match &result {
        Ok(Some(_)) => ("200 OK", "Signed in. You can close this tab."),
        Ok(None) => ("404 Not Found", "Not found."),
        Err(AuthError::Cancelled) => ("200 OK", "Sign-in cancelled. You can close this tab."),
        Err(_) => ("400 Bad Request", "Sign-in failed. You can close this tab."),
    };
    let mut stream = reader.into_inner();
    send_response(&mut stream, status, message).await;
    result
}

async fn send_response(stream: &mut TcpStream, status: &str, message: &str) {
    let body = format!(
        "<html><body style=\"font-family: system-ui; text-align: center; padding: 40px;\">\
         <h2>{}</h2></body></html>",
        message
    );
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    // The browser may already have gone away; the outcome is decided anyway.
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
