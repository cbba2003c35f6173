//! CLI entry point for parley.

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// Parley streaming chat server and client
#[derive(Parser, Debug)]
#[command(name = "parley", version, about = "Parley: streaming agent chat server and client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Stream one chat turn from a running server
    Chat(ChatArgs),
}

/// Arguments for `parley serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides PARLEY_BIND)
    #[arg(short, long)]
    pub bind: Option<SocketAddr>,
}

/// Arguments for `parley chat`.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Message to send
    pub message: String,

    /// Continue an existing thread
    #[arg(short, long)]
    pub thread: Option<String>,

    /// Server base URL
    #[arg(short, long, default_value = "http://127.0.0.1:3000")]
    pub url: String,
}
