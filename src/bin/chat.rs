//! devdash-chat - send one message to the dashboard assistant

use clap::Parser;
use devdash::chat::{validate_message, ChatClient};
use devdash::config::{ChatClientConfig, ConnectionConfig, ValidationMode, DEFAULT_WS_URL};
use devdash::connection::{ConnectionManager, ConnectionState, WsTransport};
use devdash::http::ReqwestTransport;
use serde_json::{json, Value};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ask the dashboard assistant a question
#[derive(Parser, Debug)]
#[command(name = "devdash-chat")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Message to send
    message: String,

    /// Chat endpoint URL
    #[arg(long, env = "DEVDASH_CHAT_ENDPOINT")]
    endpoint: Option<String>,

    /// Retry transient failures with backoff
    #[arg(long)]
    retry: bool,

    /// Send over the WebSocket channel instead of HTTP
    #[arg(long)]
    ws: bool,

    /// WebSocket address used with --ws
    #[arg(long, env = "DEVDASH_WS_URL", default_value = DEFAULT_WS_URL)]
    ws_url: String,

    /// Accept whitespace-only messages
    #[arg(long)]
    lenient: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devdash=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_writer(std::io::stderr),
        )
        .init();

    let mut config = ChatClientConfig::from_env();
    if let Some(endpoint) = cli.endpoint.clone() {
        config.endpoint = endpoint;
    }
    if cli.lenient {
        config.validation = ValidationMode::Lenient;
    }

    if cli.ws {
        send_over_socket(&cli, &config).await
    } else {
        send_over_http(&cli, config).await
    }
}

async fn send_over_http(cli: &Cli, config: ChatClientConfig) -> ExitCode {
    let transport = match ReqwestTransport::new() {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("Failed to initialize HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let client = ChatClient::new(transport, config);

    let result = if cli.retry {
        client.send_chat_message_with_retry(&cli.message).await
    } else {
        client.send_chat_message(&cli.message).await
    };

    match result {
        Ok(reply) => {
            println!("{}", reply.response);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

async fn send_over_socket(cli: &Cli, config: &ChatClientConfig) -> ExitCode {
    if let Err(err) = validate_message(&cli.message, config.validation, config.max_message_chars) {
        eprintln!("{}", err.user_message());
        return ExitCode::FAILURE;
    }

    let manager = ConnectionManager::new(WsTransport, ConnectionConfig::from_env());
    let (tx, mut rx) = mpsc::unbounded_channel::<Result<String, String>>();

    let replies = tx.clone();
    manager.on("chat_response", move |data| {
        let text = data["response"].as_str().unwrap_or_default().to_string();
        let _ = replies.send(Ok(text));
    });
    manager.on("chat_error", move |data| {
        let text = data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Something went wrong while contacting the assistant.")
            .to_string();
        let _ = tx.send(Err(text));
    });
    manager.on_error(|reason| tracing::warn!(reason, "Connection error"));
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    manager.on_status_change(move |state| {
        let _ = status_tx.send(state);
    });

    if let Err(e) = manager.connect(&cli.ws_url).await {
        manager.close();
        eprintln!("Could not connect to {}: {e}", cli.ws_url);
        return ExitCode::FAILURE;
    }
    if !wait_until_connected(&manager, &mut status_rx).await {
        manager.close();
        eprintln!("Could not connect to {}: connection timeout", cli.ws_url);
        return ExitCode::FAILURE;
    }

    manager.emit("chat", json!({ "message": cli.message }));
    let outcome = tokio::time::timeout(config.policy.timeout, rx.recv()).await;
    manager.close();

    match outcome {
        Ok(Some(Ok(response))) => {
            println!("{response}");
            ExitCode::SUCCESS
        }
        Ok(Some(Err(message))) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
        Ok(None) | Err(_) => {
            eprintln!("The request took too long. Please try again.");
            ExitCode::FAILURE
        }
    }
}

/// `connect` can return while another attempt is still opening; wait for it
async fn wait_until_connected(
    manager: &ConnectionManager<WsTransport>,
    status: &mut mpsc::UnboundedReceiver<ConnectionState>,
) -> bool {
    let deadline = manager.config().connection_timeout;
    let wait = async {
        while manager.state() != ConnectionState::Connected {
            if status.recv().await.is_none() {
                return false;
            }
        }
        true
    };
    tokio::time::timeout(deadline, wait).await.unwrap_or(false)
}
