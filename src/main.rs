use clap::{Args, Parser, Subcommand};
use kensho::services::credentials::Credential;
use kensho::services::master_key::key_fingerprint;
use kensho::tunnel::{LivenessSupervisor, TunnelConnection};
use kensho::utils::paths::resolve_store_info;
use kensho::{App, KenshoError};
use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "kensho", version, about = "Remote administration for validator nodes over SSH")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage saved hosts and their credentials
    Hosts {
        #[command(subcommand)]
        cmd: HostsCommand,
    },

    /// Show storage locations and the master key fingerprint
    Key,

    /// Send one request through the tunnel and print the response body
    Request {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Target as seen from the node, e.g. http://localhost:8282/status
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
        /// JSON payload
        #[arg(short, long)]
        body: Option<String>,
        #[arg(long, default_value_t = 10_000)]
        timeout_ms: u64,
    },

    /// Query or command the node's management service
    Node {
        #[command(flatten)]
        connect: ConnectArgs,
        #[command(subcommand)]
        cmd: NodeCommand,
    },

    /// Print server-sent events from a management endpoint
    Events {
        #[command(flatten)]
        connect: ConnectArgs,
        #[arg(default_value = "/events")]
        path: String,
    },

    /// Connect and block until the tunnel terminates
    Watch {
        #[command(flatten)]
        connect: ConnectArgs,
    },
}

#[derive(Subcommand)]
enum HostsCommand {
    List,
    Add {
        host: String,
        #[arg(short, long, default_value_t = 22)]
        port: u16,
        #[arg(short, long)]
        user: String,
        /// Password, or private key (path or PEM contents) with --key. Read from stdin when omitted.
        #[arg(short, long)]
        secret: Option<String>,
        /// Treat the secret as private key material
        #[arg(long)]
        key: bool,
    },
    Show {
        host_id: String,
    },
    Remove {
        host_id: String,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    Status,
    Validator,
    Dashboard,
    SekinStatus,
    Start,
    Stop,
    /// Run sekaid with the given arguments
    Sekaid {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[derive(Args)]
struct ConnectArgs {
    /// Saved host, `host:port`
    host_id: String,
    /// Passphrase for an encrypted private key
    #[arg(long)]
    passphrase: Option<String>,
    /// Expected host key, SHA256:<base64>
    #[arg(long)]
    host_key: Option<String>,
}

impl ConnectArgs {
    async fn connect(&self, app: &App) -> Result<Arc<dyn TunnelConnection>, KenshoError> {
        let tunnel: Arc<dyn TunnelConnection> = app
            .connect(
                &self.host_id,
                self.passphrase.clone(),
                self.host_key.as_deref(),
            )
            .await?;
        Ok(tunnel)
    }
}

fn read_secret_from_stdin() -> Result<String, KenshoError> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| KenshoError::invalid_params(format!("Failed to read secret: {}", err)))?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(KenshoError::invalid_params("secret must not be empty"));
    }
    Ok(secret)
}

fn print_json(value: &serde_json::Value) -> Result<(), KenshoError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| KenshoError::invalid_params(format!("Failed to render JSON: {}", err)))?;
    println!("{}", rendered);
    Ok(())
}

fn print_bytes(bytes: &[u8]) -> Result<(), KenshoError> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(bytes)?;
    if !bytes.ends_with(b"\n") {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;
    Ok(())
}

fn run_hosts(app: &App, cmd: HostsCommand) -> Result<(), KenshoError> {
    match cmd {
        HostsCommand::List => {
            for host_id in app.hosts.list() {
                println!("{}", host_id);
            }
        }
        HostsCommand::Add {
            host,
            port,
            user,
            secret,
            key,
        } => {
            let secret = match secret {
                Some(secret) => secret,
                None => read_secret_from_stdin()?,
            };
            let host_id = app.hosts.add(&host, port, &user, &secret, key)?;
            println!("{}", host_id);
        }
        HostsCommand::Show { host_id } => {
            let credential: Credential = app.hosts.get(&host_id)?;
            print_json(&serde_json::json!({
                "host_id": host_id,
                "user": credential.user,
                "auth": credential.kind_label(),
            }))?;
        }
        HostsCommand::Remove { host_id } => {
            app.hosts.remove(&host_id)?;
        }
    }
    Ok(())
}

async fn run_node(app: &App, connect: &ConnectArgs, cmd: NodeCommand) -> Result<(), KenshoError> {
    let tunnel = connect.connect(app).await?;
    let api = app.node_api(tunnel.clone())?;
    let result = match cmd {
        NodeCommand::Status => api.status().await.and_then(|v| print_json(&v)),
        NodeCommand::Validator => api.validator().await.and_then(|v| print_json(&v)),
        NodeCommand::Dashboard => api.dashboard().await.and_then(|v| print_json(&v)),
        NodeCommand::SekinStatus => api.sekin_status().await.and_then(|v| print_json(&v)),
        NodeCommand::Start => api.start().await.and_then(|b| print_bytes(&b)),
        NodeCommand::Stop => api.stop().await.and_then(|b| print_bytes(&b)),
        NodeCommand::Sekaid { args } => api
            .sekaid(args.as_slice())
            .await
            .and_then(|b| print_bytes(&b)),
    };
    tunnel.close();
    result
}

async fn run(cli: Cli) -> Result<(), KenshoError> {
    let app = App::initialize()?;
    match cli.cmd {
        Commands::Hosts { cmd } => run_hosts(&app, cmd),
        Commands::Key => {
            let key = app.master_key.master_key()?;
            let mut info = resolve_store_info();
            info["key_path"] = serde_json::json!(app.master_key.key_path());
            info["fingerprint"] = serde_json::json!(key_fingerprint(&key));
            print_json(&info)
        }
        Commands::Request {
            connect,
            url,
            method,
            body,
            timeout_ms,
        } => {
            let tunnel = connect.connect(&app).await?;
            let result = app
                .tunnel_client
                .request(
                    tunnel.clone(),
                    &url,
                    &method,
                    body.map(String::into_bytes),
                    Duration::from_millis(timeout_ms),
                )
                .await;
            tunnel.close();
            print_bytes(&result?)
        }
        Commands::Node { connect, cmd } => run_node(&app, &connect, cmd).await,
        Commands::Events { connect, path } => {
            let tunnel = connect.connect(&app).await?;
            let api = app.node_api(tunnel.clone())?;
            let mut events = api.events(&path).await?;
            let outcome = tokio::task::spawn_blocking(move || -> Result<(), KenshoError> {
                while let Some(event) = events.next_event()? {
                    print_json(&serde_json::json!({
                        "event": event.event,
                        "id": event.id,
                        "data": event.data,
                    }))?;
                }
                Ok(())
            })
            .await
            .map_err(|err| KenshoError::transport(format!("Event reader failed: {}", err)))?;
            tunnel.close();
            outcome
        }
        Commands::Watch { connect } => {
            let tunnel = connect.connect(&app).await?;
            let watch = LivenessSupervisor::arm(&app.logger, tunnel)?;
            let termination = tokio::select! {
                termination = watch.terminated() => termination,
                _ = tokio::signal::ctrl_c() => {
                    watch.close();
                    watch.terminated().await
                }
            };
            match termination.error() {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("kensho: {}", err);
        if let Some(hint) = err.hint.as_deref() {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }
}
