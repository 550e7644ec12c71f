/*!
`spotsys` launches an EC2 spot instance from a JSON request template.

The template holds `RequestSpotInstances` parameters using their EC2 API names, and must include a
`LaunchSpecification`.  spotsys fills in the launch specification's `UserData` with the
benchmark startup script, places the spot request, and logs the spot instance request ID to a
per-run log file and stdout.

Configuration comes from:
* command-line parameters, to specify basic options and the path to the template
* Spotsys.toml, for the region, credentials profile, EC2 endpoint, and log directory

The launched instance runs the benchmarks and uploads its results on its own; spotsys doesn't
wait for it.
*/

mod aws;
mod logging;
mod template;
mod user_data;

use aws::client::{build_client_config, build_ec2_client};
use aws::spot::request::Ec2SpotRequester;
use aws_sdk_ec2::config::Region;
use clap::Parser;
use log::{error, info, trace, LevelFilter};
use snafu::ResultExt;
use spotsys_config::SpotsysConfig;
use std::path::PathBuf;
use std::process;
use tokio::runtime::Runtime;

fn run() -> Result<()> {
    // Parse and store the args passed to the program
    let args = Args::parse();

    // The logger comes up even if Spotsys.toml can't be read, so the failure lands in the run log.
    let config =
        SpotsysConfig::from_path_or_default(&args.config_path).context(error::ConfigSnafu);
    let log_dir = log_directory(&args, config.as_ref().ok());
    let log_path = logging::init(args.log_level, &log_dir).context(error::LoggerSnafu)?;
    info!("Logging to {}", log_path.display());
    let config = config.map_err(|e| {
        error!("{}", e);
        e
    })?;
    trace!("Parsed config: {:?}", config);

    let region = config.region(args.region.as_deref());
    let profile = config.profile(args.profile.as_deref());
    let endpoint = config.aws.as_ref().and_then(|aws| aws.endpoint.as_ref());

    let rt = Runtime::new().context(error::RuntimeSnafu)?;
    rt.block_on(async {
        let client_config =
            build_client_config(&Region::new(region.clone()), profile.as_deref()).await;
        let ec2_client = build_ec2_client(&client_config, endpoint);
        let requester = Ec2SpotRequester::new(ec2_client, &region);
        aws::spot::run(&args, &requester)
            .await
            .context(error::SpotSnafu)
    })?;

    // A missing template is reported in the log but isn't a failure for the caller.
    Ok(())
}

/// Picks the run log directory: --log-dir, then log.directory in Spotsys.toml if it was readable,
/// then the current directory.
fn log_directory(args: &Args, config: Option<&SpotsysConfig>) -> PathBuf {
    let log_dir = args.log_dir.as_deref();
    match config {
        Some(config) => config.log_directory(log_dir),
        None => SpotsysConfig::default().log_directory(log_dir),
    }
}

fn main() {
    let result = run();
    log::logger().flush();
    if let Err(e) = result {
        eprintln!("{}", e);
        process::exit(1);
    }
}

/// Launches an EC2 spot instance from a request template
#[derive(Debug, Parser)]
pub(crate) struct Args {
    #[arg(long, default_value = "INFO")]
    /// How much detail to log; from least to most: ERROR, WARN, INFO, DEBUG, TRACE
    log_level: LevelFilter,

    #[arg(long)]
    /// Directory for run logs; defaults to log.directory in Spotsys.toml, then the current
    /// directory
    log_dir: Option<PathBuf>,

    #[arg(long, default_value = "Spotsys.toml")]
    /// Path to Spotsys.toml; defaults are used if it doesn't exist
    config_path: PathBuf,

    #[arg(long)]
    /// Region to place the spot request in; defaults to aws.region in Spotsys.toml, then us-east-1
    region: Option<String>,

    #[arg(long)]
    /// AWS credentials profile; defaults to aws.profile in Spotsys.toml, then the default
    /// credentials chain
    profile: Option<String>,

    #[arg(long)]
    /// If specified, save the created spot request IDs in JSON at this path
    pub(crate) request_output: Option<PathBuf>,

    /// Path to the JSON spot request template
    pub(crate) template_path: Option<PathBuf>,
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("Error reading config: {}", source))]
        Config { source: spotsys_config::Error },

        #[snafu(display("{}", source))]
        Logger { source: crate::logging::Error },

        #[snafu(display("Failed to create async runtime: {}", source))]
        Runtime { source: std::io::Error },

        #[snafu(display("Failed to launch spot instance: {}", source))]
        Spot { source: crate::aws::spot::Error },
    }
}
type Result<T> = std::result::Result<T, error::Error>;
