use std::path::PathBuf;

use clap::{ArgAction, Parser};
use httptracer::TransportConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Show where the time goes in one HTTP(S) request", long_about)]
pub struct Cli {
    /// The host or url to trace, like www.google.com or https://www.google.com
    #[arg(long = "Host", value_name = "host")]
    pub host: String,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// CA certificate bundle (PEM) to verify the server with
    #[arg(long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Maximum number of redirects to follow
    #[arg(long = "max-redirs", value_name = "num", default_value_t = 10)]
    pub max_redirects: usize,
    /// Maximum time allowed for the whole trace, in seconds
    #[arg(short = 'm', long = "max-time", value_name = "seconds")]
    pub max_time_option: Option<u64>,
    /// Print the result as JSON
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            insecure: self.skip_certificate_validate,
            ca_cert_path: self.certificate_path_option.clone(),
            max_redirects: self.max_redirects,
            ..TransportConfig::default()
        }
    }
}
