use clap::Parser;

#[derive(Parser)]
#[command(name = "modelgate", version, about)]
pub(crate) struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MODELGATE_CONFIG", default_value = "modelgate.toml")]
    pub(crate) config: String,
    /// Override the configured listen host.
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured listen port.
    #[arg(long)]
    pub(crate) port: Option<u16>,
}
