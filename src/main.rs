use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use cloudauto::config::Config;
use cloudauto::gcp::auth::GcpCredentials;
use cloudauto::gcp::client::GcpClient;
use cloudauto::gcp::http::format_gcp_error;
use cloudauto::gcp::instance::{InstanceTemplate, MetadataItem};
use cloudauto::gcp::metadata::{self, MetadataClient};
use cloudauto::gcp::{disk, image, instance};
use cloudauto::service;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Compute Engine helpers and demo service
#[derive(Parser, Debug)]
#[command(name = "cloudauto", version, about, long_about = None)]
struct Args {
    /// GCP project to use
    #[arg(short, long, global = true)]
    project: Option<String>,

    /// Default zone for zonal commands
    #[arg(short, long, global = true)]
    zone: Option<String>,

    /// Compute API root (emulators, proxies)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Bearer token to use instead of Application Default Credentials
    #[arg(long, global = true, env = "CLOUDAUTO_ACCESS_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Persistent disks
    #[command(subcommand)]
    Disk(DiskCommand),
    /// Custom images
    #[command(subcommand)]
    Image(ImageCommand),
    /// Metadata server lookups
    #[command(subcommand)]
    Metadata(MetadataCommand),
    /// VM instances
    #[command(subcommand)]
    Instance(InstanceCommand),
    /// Show or change saved defaults
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Run the demo JSON service
    Serve {
        /// Address to bind, e.g. 0.0.0.0:8000
        #[arg(long)]
        addr: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the saved configuration
    Show,
    /// Save the given values; unset flags keep their saved value
    Set {
        #[arg(long = "default-project")]
        project: Option<String>,
        #[arg(long = "default-zone")]
        zone: Option<String>,
        #[arg(long = "default-endpoint")]
        endpoint: Option<String>,
        #[arg(long)]
        bind_addr: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum DiskCommand {
    /// Show a disk
    Get { disk: String },
    /// Print the disk a disk was cloned from
    Source { disk: String },
    /// Create a blank or image-backed disk
    Create {
        disk: String,
        #[arg(long)]
        size_gb: Option<u64>,
        #[arg(long)]
        source_image: Option<String>,
        #[command(flatten)]
        wait: WaitFlag,
    },
    Delete {
        disk: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Create an image from a disk and wait for it
    Create {
        name: String,
        #[arg(long)]
        family: String,
        /// Source disk path (projects/P/zones/Z/disks/D), or a disk name in --zone
        #[arg(long)]
        source_disk: String,
    },
    Get { name: String },
    /// Latest image of a family
    Family { family: String },
    /// Images whose name matches a regular expression
    List { pattern: String },
    Delete {
        name: String,
        #[command(flatten)]
        wait: WaitFlag,
    },
}

#[derive(Subcommand, Debug)]
enum MetadataCommand {
    /// Fetch any key, e.g. instance/zone
    Get { key: String },
    Hostname,
    /// Print the project cloudauto would operate on
    Project,
}

#[derive(Subcommand, Debug)]
enum InstanceCommand {
    /// All instances in the project, name -> zone
    List,
    Get { name: String },
    /// Create an instance from a JSON or YAML template
    Create {
        template: PathBuf,
        /// Return as soon as the insert is accepted
        #[arg(long)]
        no_wait: bool,
        /// Idempotency key; pass the same value to retry an insert safely
        #[arg(long)]
        request_id: Option<String>,
    },
    /// Start TERMINATED instances
    Start { names: Vec<String> },
    Stop { names: Vec<String> },
    Delete { names: Vec<String> },
    /// Merge KEY=VALUE pairs into instance metadata
    SetMetadata {
        name: String,
        #[arg(value_parser = parse_metadata_item)]
        items: Vec<MetadataItem>,
        #[command(flatten)]
        wait: WaitFlag,
    },
}

#[derive(ClapArgs, Debug)]
struct WaitFlag {
    /// Wait for the operation to finish
    #[arg(long)]
    wait: bool,
}

fn parse_metadata_item(s: &str) -> Result<MetadataItem, String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))?;
    Ok(MetadataItem {
        key: key.to_string(),
        value: Some(value.to_string()),
    })
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(
    level: LogLevel,
    log_file: Option<&PathBuf>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let (non_blocking, guard, ansi) = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (writer, guard, false)
        },
        None => {
            let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
            (writer, guard, true)
        },
    };

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(ansi)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudauto started with log level: {:?}", level);

    Ok(Some(guard))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn build_client(args: &Args, config: &Config) -> Result<GcpClient> {
    let metadata_client = MetadataClient::new()?;
    let project = metadata::resolve_project_id(
        config.explicit_project(args.project.as_deref()),
        &metadata_client,
    )
    .await;
    let zone = config.effective_zone(args.zone.as_deref());
    tracing::info!("Using project {} zone {}", project, zone);

    let mut client = match &args.token {
        Some(token) => {
            let credentials = GcpCredentials::from_token(token.clone());
            GcpClient::with_credentials(credentials, &project, &zone)?
        },
        None => GcpClient::new(&project, &zone).await?,
    };

    if let Some(endpoint) = args.endpoint.as_deref().or(config.endpoint.as_deref()) {
        client = client.with_endpoint(endpoint)?;
    }

    Ok(client)
}

async fn run(args: Args, config: Config) -> Result<()> {
    match &args.command {
        Command::Serve { addr } => {
            let addr: SocketAddr = config
                .effective_bind_addr(addr.as_deref())
                .parse()
                .context("Invalid bind address")?;
            service::serve(addr).await
        },
        Command::Config(cmd) => match cmd {
            ConfigCommand::Show => print_json(&config),
            ConfigCommand::Set {
                project,
                zone,
                endpoint,
                bind_addr,
            } => {
                let mut config = config;
                config.merge(Config {
                    project_id: project.clone(),
                    zone: zone.clone(),
                    endpoint: endpoint.clone(),
                    bind_addr: bind_addr.clone(),
                });
                let path = config.save()?;
                tracing::info!("Saved configuration to {}", path.display());
                print_json(&config)
            },
        },
        Command::Metadata(cmd) => {
            let value = match cmd {
                MetadataCommand::Get { key } => metadata::gcp_metadata(key).await,
                MetadataCommand::Hostname => metadata::get_hostname().await,
                MetadataCommand::Project => Some(
                    metadata::resolve_project_id(
                        config.explicit_project(args.project.as_deref()),
                        &MetadataClient::new()?,
                    )
                    .await,
                ),
            };
            print_json(&value)
        },
        Command::Disk(cmd) => {
            let client = build_client(&args, &config).await?;
            let zone = client.zone.clone();
            match cmd {
                DiskCommand::Get { disk: name } => {
                    print_json(&disk::get_disk(&client, &zone, name).await?)
                },
                DiskCommand::Source { disk: name } => {
                    print_json(&disk::get_source_disk(&client, &zone, name).await?)
                },
                DiskCommand::Create {
                    disk: name,
                    size_gb,
                    source_image,
                    wait,
                } => {
                    let request = disk::DiskRequest {
                        name: name.clone(),
                        size_gb: size_gb.map(|s| s.to_string()),
                        source_image: source_image.clone(),
                        disk_type: None,
                    };
                    print_json(&disk::create_disk(&client, &zone, &request, wait.wait).await?)
                },
                DiskCommand::Delete { disk: name, wait } => {
                    print_json(&disk::delete_disk(&client, &zone, name, wait.wait).await?)
                },
            }
        },
        Command::Image(cmd) => {
            let client = build_client(&args, &config).await?;
            match cmd {
                ImageCommand::Create {
                    name,
                    family,
                    source_disk,
                } => {
                    let source = if source_disk.contains('/') {
                        source_disk.clone()
                    } else {
                        disk::disk_path(&client.project_id, &client.zone, source_disk)
                    };
                    print_json(&image::create_image(&client, name, family, &source).await?)
                },
                ImageCommand::Get { name } => print_json(&image::get_image(&client, name).await?),
                ImageCommand::Family { family } => {
                    print_json(&image::get_image_from_family(&client, family).await?)
                },
                ImageCommand::List { pattern } => {
                    print_json(&image::list_images_matching(&client, pattern).await?)
                },
                ImageCommand::Delete { name, wait } => {
                    print_json(&image::delete_image(&client, name, wait.wait).await?)
                },
            }
        },
        Command::Instance(cmd) => {
            let client = build_client(&args, &config).await?;
            let zone = client.zone.clone();
            match cmd {
                InstanceCommand::List => print_json(&instance::list_instances(&client).await?),
                InstanceCommand::Get { name } => {
                    print_json(&instance::get_instance(&client, name, &zone).await?)
                },
                InstanceCommand::Create {
                    template,
                    no_wait,
                    request_id,
                } => {
                    let mut template = InstanceTemplate::load(template)?;
                    if request_id.is_some() {
                        template.request_id = request_id.clone();
                    }
                    print_json(&instance::create_instance(&client, &template, !no_wait).await?)
                },
                InstanceCommand::Start { names } => {
                    print_json(&instance::start_instances(&client, names).await?)
                },
                InstanceCommand::Stop { names } => {
                    print_json(&instance::stop_instances(&client, names).await?)
                },
                InstanceCommand::Delete { names } => {
                    print_json(&instance::delete_instances(&client, names).await?)
                },
                InstanceCommand::SetMetadata { name, items, wait } => {
                    let op =
                        instance::update_instance_metadata(&client, name, &zone, items, wait.wait)
                            .await?;
                    print_json(&op)
                },
            }
        },
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = match setup_logging(args.log_level, args.log_file.as_ref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(2);
        },
    };

    let config = Config::load();

    if let Err(err) = run(args, config).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", format_gcp_error(&err));
        std::process::exit(1);
    }
}
