use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use voicesync_core::{SYNC_PATH, default_port};
use voicesync_receiver::{
    ReceiverContext,
    injector::{InjectorSettings, ReceiverEvent},
    platform::SystemInput,
    serve,
};

#[derive(Parser, Debug)]
#[command(name = "voicesync-receiver")]
struct ReceiverArgs {
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Defaults to 4500, or 4501 in debug builds.
    #[arg(long)]
    port: Option<u16>,

    /// Paste received text into the focused application.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    auto_paste: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = ReceiverArgs::parse();
    let port = args.port.unwrap_or_else(default_port);
    let bind_address = format!("{}:{}", args.host, port);

    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {}: {}", bind_address, err);
            std::process::exit(1);
        }
    };

    let settings = InjectorSettings::new(args.auto_paste);
    let context = match ReceiverContext::start(settings, SystemInput::new) {
        Ok(context) => context,
        Err(err) => {
            error!("failed to start injection sequencer: {}", err);
            std::process::exit(1);
        }
    };

    match local_ip_address::local_ip() {
        Ok(ip) => info!("senders can reach this receiver at {}:{}{}", ip, port, SYNC_PATH),
        Err(err) => warn!("could not determine LAN address: {}", err),
    }
    info!(auto_paste = context.auto_paste(), "receiver starting on {}", bind_address);

    tokio::spawn(log_events(context.clone()));

    if let Err(err) = serve(listener, context).await {
        warn!("receiver server exited: {}", err);
    }
}

async fn log_events(context: ReceiverContext) {
    let mut events = context.subscribe();
    loop {
        match events.recv().await {
            Ok(ReceiverEvent::Received(item)) => {
                info!(id = %item.id, chars = item.content.chars().count(), "new message on clipboard");
            }
            Ok(ReceiverEvent::Injected { id, outcome }) => {
                info!(%id, ?outcome, "injection finished");
            }
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}
