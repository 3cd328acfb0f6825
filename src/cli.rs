use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "topoflow",
    version,
    about = "Sampled-flow collector with topology correlation and metadata alerting"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "topoflow.toml")]
    pub config: String,

    /// Override sflow.bind_address
    #[arg(long)]
    pub bind: Option<String>,

    /// Override sflow.port_min
    #[arg(long, value_parser = validate_port)]
    pub port_min: Option<u16>,

    /// Override sflow.port_max
    #[arg(long, value_parser = validate_port)]
    pub port_max: Option<u16>,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn validate_port(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("'{s}' is not a valid port"))?;
    if port == 0 {
        Err("port must be positive".to_string())
    } else {
        Ok(port)
    }
}
