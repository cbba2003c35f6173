//! Parley CLI binary entry point.

use std::io::Write;

use clap::Parser;
use parley::cli::{ChatArgs, Cli, Commands, ServeArgs};
use parley::client::ChatClient;
use parley::config::ParleyConfig;
use parley::protocol::{FrameEvent, ParsedFrame};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("parley=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve(args) => handle_serve(args).await,
        Commands::Chat(args) => handle_chat(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn handle_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ParleyConfig::from_env()?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    tracing::info!(?config, "starting server");
    let state = parley::server::app_state_from_config(&config);
    parley::server::serve(config.bind, state).await?;
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = ChatClient::new(args.url);
    if let Some(thread) = args.thread {
        client = client.with_thread(thread);
    }

    let mut stream = client.start(&args.message).await?;
    let cancel = stream.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    while let Some(frame) = stream.next_frame().await {
        print_frame(&frame?);
    }
    println!(); // newline after streaming

    let transcript = stream.transcript();
    if let Some(id) = transcript.thread_id() {
        eprintln!("thread: {id}");
    }
    if let Some(message) = transcript.error_message() {
        return Err(message.into());
    }
    Ok(())
}

fn print_frame(frame: &ParsedFrame) {
    match frame.kind() {
        Some(FrameEvent::Token) => {
            print!("{}", frame.data);
            let _ = std::io::stdout().flush();
        }
        Some(FrameEvent::ToolStart) => eprintln!("\n[tool] {}", frame.data),
        Some(FrameEvent::ToolOutput) => eprintln!("[tool output] {}", frame.data),
        Some(FrameEvent::Warn) => eprintln!("\n[warn] {}", frame.data),
        Some(FrameEvent::Error) => eprintln!("\n[error] {}", frame.data),
        _ => {}
    }
}
