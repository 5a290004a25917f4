use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use docwire::config::{load_config, ClientConfig};
use docwire::observability::{logging, metrics};
use docwire::{Client, Method, Protocol, Request, RequestOptions};

#[derive(Parser)]
#[command(name = "docwire")]
#[command(about = "Issue requests against a document database cluster", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server endpoint (host:port); repeatable, overrides the config file
    #[arg(long = "host")]
    hosts: Vec<String>,

    /// Wire protocol, overrides the config file
    #[arg(short, long, value_enum)]
    protocol: Option<ProtocolArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Text,
    Multiplexed,
    Chunked,
}

impl From<ProtocolArg> for Protocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Text => Protocol::Text,
            ProtocolArg::Multiplexed => Protocol::Multiplexed,
            ProtocolArg::Chunked => Protocol::Chunked,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request and print the response body
    Request {
        method: Method,
        path: String,
        /// Request body
        #[arg(short, long)]
        body: Option<String>,
        /// Extra header as NAME:VALUE; repeatable
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        /// Stream transaction id
        #[arg(short, long)]
        transaction: Option<String>,
    },
    /// Refresh the topology and list the known hosts
    Topology,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ClientConfig::default(),
    };
    if !cli.hosts.is_empty() {
        config.hosts = cli.hosts.clone();
    }
    if let Some(protocol) = cli.protocol {
        config.protocol.kind = protocol.into();
    }

    logging::init_logging(&config.observability.log_level);
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let client = Client::new(config)?;
    let result = run(&client, cli.command);
    client.close();
    result
}

fn run(client: &Client, command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Request {
            method,
            path,
            body,
            headers,
            transaction,
        } => {
            let mut request = Request::new(method, path);
            for header in headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| format!("header '{header}' is not NAME:VALUE"))?;
                request = request.header(name.trim(), value.trim());
            }
            if let Some(body) = body {
                request = request
                    .header("content-type", "application/json")
                    .body(body);
            }
            let mut options = RequestOptions::new();
            if let Some(trx) = transaction {
                options = options.transaction(trx);
            }

            let response = client.execute_sync(request, options)?;
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
                Err(_) => println!("{}", String::from_utf8_lossy(&response.body)),
            }
        }
        Commands::Topology => {
            if let Err(e) = client.refresh_topology().wait() {
                eprintln!("Topology refresh failed: {e}");
            }
            for host in client.hosts() {
                println!("{}\t{:?}", host.address, host.health);
            }
        }
    }
    Ok(())
}
