//! logroute - compiles log routing objects into fluentd or syslog-ng configuration

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use kube::{Client, CustomResourceExt};
use tracing::{info, warn};

use logroute_common::crd::{ClusterFlow, ClusterSink, Flow, LogPipeline, LogRoute, Sink};
use logroute_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use logroute_compiler::{
    CompileContext, CompiledPipeline, Compiler, KubeResourceSource, KubeStatusWriter,
    ManifestSource, StatusWriter, ValidationReconciler,
};

/// logroute - declarative log routing for fluentd and syslog-ng
#[derive(Parser, Debug)]
#[command(name = "logroute", version, about, long_about = None)]
struct Cli {
    /// Log line format (json or plain)
    #[arg(long, env = "LOGROUTE_LOG_FORMAT", default_value = "json", global = true)]
    log_format: LogFormat,

    /// Log the rendered configuration after every pass
    #[arg(long, env = "LOGROUTE_SHOW_FLOW_CONFIG", global = true)]
    show_flow_config: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the CRD manifests and exit
    Crd,

    /// Compile a pipeline from manifest files, without a cluster
    ///
    /// Reads every LogPipeline, Flow, ClusterFlow, Sink, ClusterSink, LogRoute,
    /// Namespace and Secret found in the given files or directories.
    Compile(CompileArgs),

    /// Compile a pipeline from the objects in the cluster
    Render(PipelineArgs),

    /// Evaluate every object of a pipeline and write their statuses
    Validate(PipelineArgs),
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// LogPipeline to compile
    #[arg(long, env = "LOGROUTE_PIPELINE", default_value = "main")]
    pipeline: String,
}

#[derive(Args, Debug)]
struct CompileArgs {
    #[command(flatten)]
    target: PipelineArgs,

    /// Manifest files or directories
    #[arg(short = 'f', long = "filename", required = true)]
    manifests: Vec<PathBuf>,

    /// Node count used to size syslog-ng connection limits
    #[arg(long, default_value_t = 0)]
    nodes: usize,

    /// Write the configuration here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Crd = cli.command {
        return print_crds();
    }

    init_telemetry(TelemetryConfig {
        service_name: "logroute".to_string(),
        format: cli.log_format,
    })?;

    let context = Arc::new(CompileContext::new().with_show_flow_config(cli.show_flow_config));

    match cli.command {
        Commands::Crd => Ok(()),
        Commands::Compile(args) => run_compile(args, context).await,
        Commands::Render(args) => run_render(args, context).await,
        Commands::Validate(args) => run_validate(args).await,
    }
}

fn print_crds() -> anyhow::Result<()> {
    let crds = [
        LogPipeline::crd(),
        Flow::crd(),
        ClusterFlow::crd(),
        Sink::crd(),
        ClusterSink::crd(),
        LogRoute::crd(),
    ];
    for crd in crds {
        let yaml = serde_yaml::to_string(&crd)
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("---\n{yaml}");
    }
    Ok(())
}

fn report(compiled: &CompiledPipeline) {
    for (key, status) in &compiled.statuses {
        for problem in &status.problems {
            warn!(resource = %key, problem = %problem, "resource excluded");
        }
    }
    for binding in &compiled.mount_bindings {
        info!(
            secret = %format!("{}/{}", binding.reference.namespace, binding.reference.name),
            key = %binding.reference.key,
            path = %binding.path,
            "secret mount required"
        );
    }
    info!(
        pipeline = %compiled.pipeline,
        backend = %compiled.backend,
        config_hash = %compiled.config_hash,
        with_problems = compiled.resources_with_problems(),
        "pipeline compiled"
    );
}

async fn run_compile(args: CompileArgs, context: Arc<CompileContext>) -> anyhow::Result<()> {
    let source = ManifestSource::from_paths(&args.manifests)
        .await?
        .with_node_count(args.nodes);
    let compiler = Compiler::new(source, context);
    let compiled = compiler.compile(&args.target.pipeline).await?;
    report(&compiled);

    match args.output {
        Some(path) => tokio::fs::write(&path, &compiled.text)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?,
        None => print!("{}", compiled.text),
    }
    Ok(())
}

async fn run_render(args: PipelineArgs, context: Arc<CompileContext>) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let compiler = Compiler::new(KubeResourceSource::new(client.clone()), context);
    let compiled = compiler.compile(&args.pipeline).await?;
    report(&compiled);

    let writer = KubeStatusWriter::new(client);
    writer
        .write_pipeline_status(&args.pipeline, &compiled.pipeline_status())
        .await?;
    print!("{}", compiled.text);
    Ok(())
}

async fn run_validate(args: PipelineArgs) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    let reconciler = ValidationReconciler::new(
        KubeResourceSource::new(client.clone()),
        KubeStatusWriter::new(client),
    );
    let report = reconciler.reconcile(&args.pipeline).await?;
    if report.failed > 0 {
        anyhow::bail!("{} status writes failed", report.failed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_requires_manifests() {
        assert!(Cli::try_parse_from(["logroute", "compile"]).is_err());

        let cli = Cli::try_parse_from([
            "logroute",
            "--log-format",
            "plain",
            "compile",
            "-f",
            "manifests/",
            "--pipeline",
            "edge",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Plain);
        let Commands::Compile(args) = cli.command else {
            panic!("expected compile");
        };
        assert_eq!(args.target.pipeline, "edge");
        assert_eq!(args.manifests, vec![PathBuf::from("manifests/")]);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["logroute", "--log-format", "xml", "crd"]).is_err());
    }

    #[test]
    fn every_crd_serializes() {
        print_crds().unwrap();
    }
}
