use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use griddle_http::serve;

#[derive(Parser)]
#[command(name = "griddle")]
struct Cli {
    #[arg(long, env = "GRIDDLE_DATA_DIR", default_value = "./data")]
    data_dir: String,
    #[arg(long, env = "GRIDDLE_BIND_ADDR")]
    bind_addr: Option<String>,
    #[arg(long, env = "GRIDDLE_PORT")]
    port: Option<u16>,

    /// Bind to 127.0.0.1:0 (OS-assigned ephemeral port). Prints resolved address at startup.
    #[arg(long)]
    auto_port: bool,

    /// Seconds to wait for indexes to come online after `CREATE INDEX`.
    #[arg(long, env = "GRIDDLE_INDEX_AWAIT_TIMEOUT_SECS")]
    index_await_timeout_secs: Option<u64>,

    /// Populate new indexes on the calling thread instead of a background thread.
    #[arg(long)]
    inline_population: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cmd = Cli::command();
    let matches = cmd.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    let bind_addr = resolve_bind_addr(&cli, &matches)
        .map_err(|msg| std::io::Error::new(std::io::ErrorKind::InvalidInput, msg))?;
    std::env::set_var("GRIDDLE_DATA_DIR", &cli.data_dir);
    std::env::set_var("GRIDDLE_BIND_ADDR", &bind_addr);
    if let Some(secs) = cli.index_await_timeout_secs {
        std::env::set_var("GRIDDLE_INDEX_AWAIT_TIMEOUT_SECS", secs.to_string());
    }
    if cli.inline_population {
        std::env::set_var("GRIDDLE_POPULATE_IN_BACKGROUND", "false");
    }
    serve().await
}

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7700";

/// `--auto-port` overrides addresses that only came from the environment and
/// conflicts with explicit flags. Otherwise `--bind-addr` beats `--port`.
fn resolve_bind_addr(cli: &Cli, matches: &ArgMatches) -> Result<String, String> {
    if cli.auto_port {
        for (arg, flag) in [("bind_addr", "--bind-addr"), ("port", "--port")] {
            if matches.value_source(arg) == Some(ValueSource::CommandLine) {
                return Err(format!("--auto-port cannot be used with {flag}"));
            }
        }
        return Ok("127.0.0.1:0".to_string());
    }

    Ok(match (&cli.bind_addr, cli.port) {
        (Some(addr), _) => addr.clone(),
        (None, Some(port)) => format!("127.0.0.1:{port}"),
        (None, None) => DEFAULT_BIND_ADDR.to_string(),
    })
}
