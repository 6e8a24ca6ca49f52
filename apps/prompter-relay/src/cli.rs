use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "prompter-relay")]
#[command(about = "Teleprompter sync relay and diagnostic client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Listen port; overrides PROMPTER_RELAY_PORT
    #[arg(long)]
    pub port: Option<u16>,

    /// Access key clients must present; overrides PROMPTER_ACCESS_KEY
    #[arg(long)]
    pub access_key: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to a running relay as a plain client and print every
    /// relayed message
    Tail {
        /// Relay endpoint
        #[arg(short, long, default_value = "ws://localhost:9090/ws")]
        url: String,

        /// Access key, if the relay requires one
        #[arg(short, long)]
        key: Option<String>,
    },
}

pub async fn run_tail(url: String, key: Option<String>) -> Result<()> {
    let mut connect_url = Url::parse(&url).context("invalid relay URL")?;
    if let Some(key) = key {
        connect_url.query_pairs_mut().append_pair("key", &key);
    }

    let (stream, _) = timeout(Duration::from_secs(5), connect_async(connect_url.as_str()))
        .await
        .context("connection timeout, is the relay running?")?
        .context("connection failed")?;
    let (_, mut read) = stream.split();

    println!("connected to {url}, waiting for traffic (ctrl-c to stop)");

    while let Some(frame) = read.next().await {
        match frame? {
            Message::Text(text) => print_frame(&text),
            Message::Close(_) => break,
            other => debug!(?other, "ignoring frame"),
        }
    }

    println!("relay closed the connection");
    Ok(())
}

fn print_frame(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN");
            let from = value
                .get("deviceId")
                .and_then(Value::as_str)
                .unwrap_or("-");
            println!("{kind:<20} from={from} {value}");
        }
        Err(_) => println!("(unparseable) {text}"),
    }
}
