//! Binary entry point for the shakedown acceptance-test agent.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::{Duration, Instant};

use clap::Parser;
use thiserror::Error;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use shakedown::{
    HarnessError, HttpOrchestratorClient, KeyProbeWorkload, MasterConfig, ProbeError,
    ReleaseTester, ResilienceConfig, ResiliencyHarness, SessionError, SuiteOutcome, TesterError,
    report,
};

#[derive(Debug, Parser)]
#[command(
    name = "shakedown",
    about = "Exercise a software release on a remote orchestrator: supply, instantiate, tear down, and verify failover",
    arg_required_else_help = true
)]
enum Cli {
    #[command(
        name = "lifecycle",
        about = "Install a release, start an instance, and drive it through stop and destroy"
    )]
    Lifecycle(LifecycleCommand),
    #[command(
        name = "resiliency",
        about = "Push a payload to a resilient deployment and verify it survives clone takeovers"
    )]
    Resiliency(ResiliencyCommand),
}

#[derive(Debug, Parser)]
struct LifecycleCommand {
    /// Software release URL to exercise.
    #[arg(long)]
    release_url: String,
    /// Logical partition reference the instance is requested under.
    #[arg(long)]
    partition: String,
    /// Node to supply the release on; omit for a test without a supply stage.
    #[arg(long)]
    node: Option<String>,
    /// Instantiation parameters as a JSON object; omit for a software-only
    /// test with no instance stage.
    #[arg(long)]
    parameters: Option<String>,
}

#[derive(Debug, Parser)]
struct ResiliencyCommand {
    /// Software release URL of the resilient deployment.
    #[arg(long)]
    release_url: String,
    /// Node hosting the deployment.
    #[arg(long)]
    node: String,
    /// Partition the takeover is issued from.
    #[arg(long)]
    partition: String,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid instance parameters: {0}")]
    InvalidParameters(String),
    #[error("invalid test target: {0}")]
    Target(String),
    #[error("lifecycle test failed: {0}")]
    Lifecycle(#[from] TesterError),
    #[error("resiliency session rejected: {0}")]
    Session(#[from] SessionError),
    #[error("resiliency suite failed to run: {0}")]
    Resiliency(#[from] HarnessError<ProbeError>),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Lifecycle(command) => run_lifecycle(command).await,
        Cli::Resiliency(command) => run_resiliency(command).await,
    }
}

async fn run_lifecycle(args: LifecycleCommand) -> Result<i32, CliError> {
    let config =
        MasterConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let client = HttpOrchestratorClient::new(config.master_url.clone(), config.token.clone());
    let target = shakedown::TestTarget::builder()
        .release_url(args.release_url)
        .partition_name(args.partition)
        .node_id(args.node)
        .parameters(parse_parameters(args.parameters.as_deref())?)
        .build()
        .map_err(|err| CliError::Target(err.to_string()))?;
    tracing::info!("starting lifecycle test\n{}", report::describe(&target));

    let mut tester = ReleaseTester::new(
        client,
        target,
        Duration::from_secs(config.software_timeout_secs),
        Duration::from_secs(config.instance_timeout_secs),
    );
    let tick_interval = Duration::from_secs(config.tick_interval_secs);

    loop {
        match tester.tick(Instant::now()).await {
            Ok(None) => {
                tracing::info!("lifecycle test passed");
                return Ok(0);
            }
            Ok(Some(_)) => sleep(tick_interval).await,
            Err(err) => {
                write_report(io::stderr(), &report::last_message(tester.history()));
                return Err(CliError::Lifecycle(err));
            }
        }
    }
}

async fn run_resiliency(args: ResiliencyCommand) -> Result<i32, CliError> {
    let master =
        MasterConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    master
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let config = ResilienceConfig::load_without_cli_args()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let session = config
        .as_session(&args.release_url, &args.node, &args.partition)
        .map_err(|err| CliError::Config(err.to_string()))?;

    let client = HttpOrchestratorClient::new(master.master_url.clone(), master.token.clone());
    let harness = ResiliencyHarness::new(client, session)?
        .with_replication_wait(Duration::from_secs(config.replication_wait_secs));
    let mut workload =
        KeyProbeWorkload::new(&config.probe_address_key).with_service_port(config.probe_port);

    match harness.run_suite(&mut workload).await? {
        SuiteOutcome::Passed => {
            tracing::info!("resiliency suite passed");
            Ok(0)
        }
        SuiteOutcome::Failed { clone_index } => {
            tracing::error!(clone_index, "resiliency suite failed");
            Ok(1)
        }
    }
}

fn parse_parameters(raw: Option<&str>) -> Result<Option<BTreeMap<String, String>>, CliError> {
    raw.map(|value| {
        serde_json::from_str::<BTreeMap<String, String>>(value)
            .map_err(|err| CliError::InvalidParameters(err.to_string()))
    })
    .transpose()
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

fn write_report(mut target: impl Write, summary: &str) {
    writeln!(target, "{summary}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_parameters_accepts_json_objects() {
        let parsed = parse_parameters(Some("{\"memory\":\"2G\",\"disk\":\"10G\"}"))
            .expect("object should parse")
            .expect("parameters should be present");
        assert_eq!(parsed.get("memory").map(String::as_str), Some("2G"));
        assert_eq!(parsed.get("disk").map(String::as_str), Some("10G"));
    }

    #[test]
    fn parse_parameters_passes_through_absence() {
        let parsed = parse_parameters(None).expect("absence should be fine");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_parameters_rejects_non_objects() {
        let err = parse_parameters(Some("[1,2]")).expect_err("arrays should be rejected");
        assert!(matches!(err, CliError::InvalidParameters(_)));
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(String::from("missing master_url"));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert!(
            rendered.contains("configuration error: missing master_url"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn write_report_appends_newline() {
        let mut buf = Vec::new();
        write_report(&mut buf, "No message");
        assert_eq!(buf, b"No message\n");
    }
}
