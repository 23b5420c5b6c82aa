use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use uuid::Uuid;

use crate::crypto::ConnectionKeys;
use crate::signals::{
    AnswerPayload, ClientEvent, ConnIdPayload, OfferPayload, ServerEvent, SignaturePayload,
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);
const CHECK_VERSION: &[u8] = b"beach-rendezvous-pair/1";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Parser, Debug)]
#[command(name = "beach-rendezvous")]
#[command(about = "Signaling rendezvous server and pairing check")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the server (default when no command is given)
    Serve {
        /// Listen port, overriding RENDEZVOUS_PORT
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Pair a throwaway initiator and receiver through a running server
    Pair {
        /// Server URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,
    },
}

/// Steps a successful pairing check went through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReport {
    pub conn_id: String,
    pub steps: Vec<&'static str>,
}

/// Run a full initiator/receiver pairing against `url`.
pub async fn run_pair_check(url: &str) -> Result<PairReport> {
    let keys = ConnectionKeys::generate();
    let conn_id = keys.conn_id();
    let base = url.trim_end_matches('/');
    let mut steps = Vec::new();

    let message = format!("pair-check-{}", Uuid::new_v4());
    let initiator_url = format!(
        "{base}/ws?stage=initiator&connId={conn_id}&message={message}&signed={}&key={}",
        keys.sign(message.as_bytes()),
        keys.public_hex()
    );
    let mut initiator = connect(&initiator_url).await?;
    match recv_event(&mut initiator).await? {
        ServerEvent::Initiated { conn_id: acked } if acked == conn_id => steps.push("initiated"),
        other => bail!("initiator expected `initiated`, got `{}`", other.name()),
    }

    // The receiver learns the pairing secret out of band.
    let shared = ConnectionKeys::from_secret_hex(&keys.secret_hex())
        .map_err(|err| anyhow!("failed to share pairing key: {err}"))?;
    let mut receiver = connect(&format!("{base}/ws?stage=receiver&connId={conn_id}")).await?;
    let to_sign = match recv_event(&mut receiver).await? {
        ServerEvent::Handshake { to_sign } => to_sign,
        other => bail!("receiver expected `handshake`, got `{}`", other.name()),
    };
    steps.push("handshake");

    let challenge = hex::decode(&to_sign).context("challenge is not hex")?;
    let version = shared
        .seal(CHECK_VERSION)
        .map_err(|err| anyhow!("failed to seal version: {err}"))?;
    send_event(
        &mut receiver,
        &ClientEvent::Signature(SignaturePayload {
            signed: shared.sign(&challenge),
            conn_id: conn_id.clone(),
            version,
        }),
    )
    .await?;
    match recv_event(&mut initiator).await? {
        ServerEvent::Confirmation { version, .. } => {
            let opened = keys
                .open(&version)
                .map_err(|err| anyhow!("confirmation did not open: {err}"))?;
            if opened != CHECK_VERSION {
                bail!("confirmation carried an unexpected version");
            }
            steps.push("confirmation");
        }
        other => bail!("initiator expected `confirmation`, got `{}`", other.name()),
    }

    let offer = keys
        .seal(b"pair-check offer")
        .map_err(|err| anyhow!("failed to seal offer: {err}"))?;
    send_event(
        &mut initiator,
        &ClientEvent::OfferSignal(OfferPayload {
            data: offer.clone(),
            conn_id: conn_id.clone(),
            options: None,
        }),
    )
    .await?;
    match recv_event(&mut receiver).await? {
        ServerEvent::Offer { data } if data == offer => steps.push("offer"),
        other => bail!("receiver expected the relayed `offer`, got `{}`", other.name()),
    }

    let answer = shared
        .seal(b"pair-check answer")
        .map_err(|err| anyhow!("failed to seal answer: {err}"))?;
    send_event(
        &mut receiver,
        &ClientEvent::AnswerSignal(AnswerPayload {
            data: answer.clone(),
            conn_id: conn_id.clone(),
        }),
    )
    .await?;
    match recv_event(&mut initiator).await? {
        ServerEvent::Answer { data } if data == answer => steps.push("answer"),
        other => bail!("initiator expected the relayed `answer`, got `{}`", other.name()),
    }

    send_event(
        &mut initiator,
        &ClientEvent::RtcConnected(ConnIdPayload {
            conn_id: conn_id.clone(),
        }),
    )
    .await?;
    for socket in [&mut initiator, &mut receiver] {
        match recv_event(socket).await? {
            ServerEvent::RtcConnected { .. } => {}
            other => bail!("expected `rtcConnected`, got `{}`", other.name()),
        }
    }
    steps.push("rtcConnected");

    let _ = initiator.close(None).await;
    let _ = receiver.close(None).await;
    Ok(PairReport { conn_id, steps })
}

async fn connect(url: &str) -> Result<Socket> {
    debug!("Connecting to {}", url);
    match timeout(STEP_TIMEOUT, connect_async(url)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(err)) => Err(anyhow!("Connection failed: {err}")),
        Err(_) => Err(anyhow!(
            "Connection timeout - is the rendezvous server running?"
        )),
    }
}

pub async fn send_event(socket: &mut Socket, event: &ClientEvent) -> Result<()> {
    let text = serde_json::to_string(event)?;
    socket.send(Message::text(text)).await?;
    Ok(())
}

/// Next server event on `socket`, skipping control frames.
pub async fn recv_event(socket: &mut Socket) -> Result<ServerEvent> {
    let next = timeout(STEP_TIMEOUT, async {
        while let Some(frame) = socket.next().await {
            match frame? {
                Message::Text(text) => {
                    return Ok::<_, anyhow::Error>(serde_json::from_str(text.as_str())?);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(anyhow!("connection closed unexpectedly"))
    })
    .await;
    next.map_err(|_| anyhow!("timed out waiting for server event"))?
}
