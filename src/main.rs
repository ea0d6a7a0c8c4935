use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use jobber::{
    apply_overrides, init_logging, parse_assignment, ClusterApi, Configuration, EventFormatter,
    EventReporter, KubeCluster, TemplateFunctions, TestRunner,
};
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(name = "jobber", version, about = "Run a Kubernetes performance-test pipeline")]
struct Args {
    /// YAML configuration file
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,

    /// kubeconfig file; the default client inference applies when unset
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Override a configuration value, e.g. `Test.Cases.[100TPS].Values.TPS=200`.
    /// May be repeated.
    #[arg(long = "set", value_name = "PATH=VALUE")]
    overrides: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jobber: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Configuration::from_file(&args.config)?;

    let overrides = args
        .overrides
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    apply_overrides(&mut config, &overrides).context("failed to apply --set overrides")?;
    config.validate()?;

    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeCluster::connect(args.kubeconfig.as_deref())
            .await
            .context("failed to connect to the cluster")?,
    );
    let templates = Arc::new(TemplateFunctions::with_cluster_functions(
        cluster.clone(),
        Handle::current(),
    )?);

    let formatter = EventFormatter::for_configuration(&config);
    let (reporter, mut events) = EventReporter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", formatter.format(&event));
        }
    });

    let mut runner = TestRunner::new(config, cluster, templates, reporter);
    let result = runner.run().await;
    drop(runner);
    printer.await.context("event printer stopped")?;

    result.context("test run aborted")
}
