use std::sync::Arc;

use {anyhow::Result, clap::Parser};

use {
    uplink_dispatch::Hub,
    uplink_protocol::{Envelope, STATUS_EVENT},
    uplink_transport::{NavigationAware, Session, SessionConfig, StaticCookies},
};

/// Connects to an uplink server and prints dispatched events as JSON
/// lines. Useful for watching a notification stream during development.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// WebSocket endpoint, e.g. ws://localhost:8080/dip/websocket
    #[arg(long)]
    url: String,

    /// Name of the anti-forgery cookie the server expects.
    #[arg(long, default_value = "xsrf-token")]
    xsrf_cookie: String,

    /// Anti-forgery token value, normally read from the browser cookie.
    #[arg(env = "UPLINK_XSRF_TOKEN", long)]
    xsrf_token: String,

    /// Use the short development-mode reconnect delay.
    #[arg(long)]
    dev: bool,

    /// Event types to print, in addition to connection status events.
    #[arg(long = "listen", value_name = "TYPE")]
    listen: Vec<String>,

    /// Optional one-shot broadcast, as TYPE=JSON. Queued until the
    /// connection is live.
    #[arg(long = "send", value_name = "TYPE=JSON")]
    send: Option<String>,
}

fn print_event(r#type: &str, event: &serde_json::Value) {
    println!(
        "{}",
        serde_json::json!({ "type": r#type, "event": event })
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let hub = Hub::new();
    let _status = hub.register(STATUS_EVENT, |r#type, event| print_event(r#type, event));
    let _listeners: Vec<_> = args
        .listen
        .iter()
        .map(|r#type| hub.register(r#type, |r#type, event| print_event(r#type, event)))
        .collect();

    let mut config = SessionConfig::new(&args.url, &args.xsrf_cookie);
    config.dev_mode = args.dev;
    let cookies = Arc::new(StaticCookies::new().with(&args.xsrf_cookie, &args.xsrf_token));
    let session = Session::new(config, Arc::clone(&hub), cookies, Arc::new(NavigationAware));

    tracing::info!(session_id = session.session_id(), "connecting");
    session.connect();

    if let Some(spec) = &args.send {
        let (r#type, payload) = spec
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--send expects TYPE=JSON"))?;
        let event: serde_json::Value = serde_json::from_str(payload)?;
        // Queued if the connection is not live yet; flushed on connect.
        session.send(Envelope::new(r#type, event));
    }

    tokio::signal::ctrl_c().await?;
    session.shutdown();
    Ok(())
}
