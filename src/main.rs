//! Chat server binary

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chatring::{ ChatServer, ServerOptions };

/// Multi-room TLS chat fan-out server
#[derive(Debug, Parser)]
#[command(name = "chatring", version)]
struct Args {
    /// Broker URL
    #[arg(long, default_value = "nats://127.0.0.1:4222")]
    broker_url: String,

    /// Directory containing blacklist.json
    #[arg(long, default_value = "./filter")]
    filter_dir: String,

    /// TCP listen address
    #[arg(long, default_value = "0.0.0.0:9999")]
    listen: String,

    /// Shared authentication password
    #[arg(long, default_value = "pw")]
    auth_password: String,

    /// PEM certificate chain; omit to use a self-signed development cert
    #[arg(long, requires = "key_file")]
    cert_file: Option<String>,

    /// PEM private key
    #[arg(long, requires = "cert_file")]
    key_file: Option<String>,
}

impl Args {
    fn into_options(self) -> ServerOptions {
        let mut options = ServerOptions::new()
            .with_broker_url(self.broker_url)
            .with_filter_dir(self.filter_dir)
            .with_listen(self.listen)
            .with_auth_password(self.auth_password);
        if let (Some(cert), Some(key)) = (self.cert_file, self.key_file) {
            options = options.with_tls_files(cert, key);
        }
        options
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let server = ChatServer::new(args.into_options()).await;

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            cancel.cancel();
        }
    });

    server.run().await.context("server exited with error")?;
    Ok(())
}
