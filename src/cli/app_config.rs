use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Show where the time goes in an HTTP request: DNS, TCP, TLS, server
/// processing and content transfer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "name: value")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// PEM bundle of CA certificates to trust.
    #[arg(long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    ///  Write the body to file instead of discarding it.
    #[arg(long = "output", short = 'o', value_name = "file")]
    pub file_path_option: Option<String>,
    /// Send the request N times over one client; later runs reuse the connection.
    #[arg(short = 'n', long = "count", value_name = "N", default_value_t = 1)]
    pub count: u32,
    /// Close the connection after each request.
    #[arg(long = "no-keepalive")]
    pub no_keepalive: bool,
    /// Maximum time allowed for each request, in seconds.
    #[arg(short = 'm', long = "max-time", value_name = "seconds", default_value_t = 30)]
    pub max_time: u64,
    /// Print the breakdown as JSON.
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}
