//! WebSocket connector for the Misskey streaming API.
//!
//! Connects to `wss://<host>/streaming?i=<token>` and exposes text frames.
//! Channel frames are built by the dispatcher; this module only moves
//! text. Pings are answered by tungstenite while reading.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use skylark_core::transport::stream::{StreamConnection, StreamConnector};
use skylark_types::config::InstanceConfig;
use skylark_types::error::TransportError;

use super::base_url;

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Opens streaming connections for one account.
pub struct MisskeyStreamConnector {
    stream_base: String,
    token: SecretString,
}

impl MisskeyStreamConnector {
    pub fn new(instance: &InstanceConfig) -> Result<Self, TransportError> {
        let base = base_url(&instance.url)
            .ok_or_else(|| TransportError::Connection("instance url is empty".into()))?;
        Ok(Self {
            stream_base: streaming_base(&base),
            token: SecretString::from(instance.access_token.clone()),
        })
    }

    fn url(&self) -> String {
        format!("{}?i={}", self.stream_base, self.token.expose_secret())
    }

    /// The streaming URL with the token masked, for logs.
    pub fn redacted_url(&self) -> String {
        format!("{}?i=***", self.stream_base)
    }
}

/// `https://host` becomes `wss://host/streaming`, `http://` becomes `ws://`.
fn streaming_base(base: &str) -> String {
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        format!("wss://{base}")
    };
    format!("{ws}/streaming")
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        }
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            match status {
                401 | 403 => TransportError::Authentication(format!("streaming handshake rejected ({status})")),
                _ => TransportError::Connection(format!("streaming handshake failed ({status})")),
            }
        }
        other => TransportError::Connection(other.to_string()),
    }
}

impl StreamConnector for MisskeyStreamConnector {
    type Connection = MisskeyStreamConnection;

    async fn connect(&self) -> Result<MisskeyStreamConnection, TransportError> {
        tracing::debug!(url = %self.redacted_url(), "opening stream");
        let connecting = connect_async(self.url());
        let (ws, _response) =
            tokio::time::timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS), connecting)
                .await
                .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT_SECS))?
                .map_err(map_ws_error)?;
        Ok(MisskeyStreamConnection { ws })
    }
}

/// One live streaming socket.
pub struct MisskeyStreamConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl StreamConnection for MisskeyStreamConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(map_ws_error)
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let message = match self.ws.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(map_ws_error(e))),
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Binary(bytes) => {
                    return Some(String::from_utf8(bytes.to_vec()).map_err(|_| {
                        TransportError::Malformed("binary frame is not UTF-8".into())
                    }));
                }
                Message::Close(frame) => {
                    tracing::debug!(?frame, "stream closed by remote");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.ws.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http;

    fn connector(url: &str) -> MisskeyStreamConnector {
        MisskeyStreamConnector::new(&InstanceConfig {
            url: url.to_string(),
            access_token: "tok123".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn stream_url_uses_websocket_scheme_and_masks_token() {
        let c = connector("https://misskey.example/");
        assert_eq!(c.url(), "wss://misskey.example/streaming?i=tok123");
        assert_eq!(c.redacted_url(), "wss://misskey.example/streaming?i=***");
        assert_eq!(
            streaming_base("http://127.0.0.1:3000"),
            "ws://127.0.0.1:3000/streaming"
        );
    }

    #[tokio::test]
    async fn exchanges_text_frames_with_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                assert_eq!(req.uri().query(), Some("i=tok123"));
                Ok::<_, ErrorResponse>(resp)
            })
            .await
            .unwrap();
            ws.send(Message::Ping(vec![1u8].into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"channel"}"#.into())).await.unwrap();
            let received = ws.next().await.unwrap().unwrap();
            ws.close(None).await.unwrap();
            received.into_text().unwrap().as_str().to_owned()
        });

        let mut conn = connector(&format!("http://{addr}")).connect().await.unwrap();
        let frame = conn.recv_text().await.unwrap().unwrap();
        assert_eq!(frame, r#"{"type":"channel"}"#);
        conn.send_text(r#"{"type":"connect"}"#.to_string()).await.unwrap();
        assert!(conn.recv_text().await.is_none());

        assert_eq!(server.await.unwrap(), r#"{"type":"connect"}"#);
    }

    #[tokio::test]
    async fn rejected_handshake_is_an_authentication_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = tokio_tungstenite::accept_hdr_async(stream, |_req: &Request, _resp: Response| {
                let rejection: ErrorResponse = http::Response::builder()
                    .status(401)
                    .body(None)
                    .unwrap();
                Err(rejection)
            })
            .await;
        });

        let err = match connector(&format!("http://{addr}")).connect().await {
            Ok(_) => panic!("handshake should fail"),
            Err(e) => e,
        };
        assert!(err.is_fatal());
    }
}
