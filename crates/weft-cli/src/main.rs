mod operators;
mod signal;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use weft_core::app::{InProcessScaler, PipelineController, PipelineManager, serve_operator};
use weft_core::domain::{OperatorRef, PipelineSpec};
use weft_core::impls::{
    BucketStore, FsStore, LocalBus, MachineAffinityStore, MemoryStore, RedisBus, serve_store,
};
use weft_core::ports::{ContentStore, SnowflakeGenerator, StaticMachineId, SystemClock};
use weft_core::Settings;

use crate::operators::builtin_registry;

#[derive(Parser)]
#[command(name = "weft")]
#[command(about = "Distributed task-routing pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline in-process and write its first output to stdout
    ///
    /// Stages share one in-process bus that delivers every task to every
    /// replica, so keep `replicas` at 1 for this command.
    Run {
        /// Pipeline definition (JSON)
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Input file (stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Serve one stage replica over Redis (configured via WEFT_* variables)
    Stage {
        /// Operator to run, overrides WEFT_OPERATOR
        #[arg(short, long)]
        operator: Option<OperatorRef>,
    },

    /// Check a pipeline definition and print its stage graph
    Validate {
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// List built-in operators
    Operators,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("weft=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            input,
            timeout,
        } => run(pipeline, input, timeout.map(Duration::from_secs)).await,
        Commands::Stage { operator } => stage(operator).await,
        Commands::Validate { pipeline } => validate(pipeline),
        Commands::Operators => {
            for operator in builtin_registry()?.operators() {
                println!("{operator}");
            }
            Ok(())
        }
    }
}

async fn run(
    pipeline: PathBuf,
    input: Option<PathBuf>,
    timeout: Option<Duration>,
) -> anyhow::Result<()> {
    let spec = PipelineSpec::from_json_file(&pipeline)
        .with_context(|| format!("loading {}", pipeline.display()))?;

    let data = match &input {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            buf
        }
    };

    let store = MemoryStore::new();
    let root = PipelineController::new(
        Arc::new(LocalBus::new()),
        Arc::new(store),
        Arc::new(SnowflakeGenerator::new(SystemClock, 0)),
        Arc::new(StaticMachineId::new("local")),
    );
    let scaler = InProcessScaler::new(root.clone(), Arc::new(builtin_registry()?));
    let manager = PipelineManager::new(root, Arc::new(scaler));

    let run = manager.instantiate(spec)?;
    run.start().await?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            signal::shutdown_signal().await;
            cancel.cancel();
        })
    };

    let submitted = match timeout {
        Some(limit) => run.submit_with_timeout(&cancel, limit, data).await,
        None => run.submit(&cancel, data).await,
    };
    let completion = match submitted {
        Ok(pending) => {
            info!(task = %pending.task_id(), pipeline = %run.scope(), "task submitted");
            pending.wait().await
        }
        Err(e) => Err(e),
    };

    interrupt.abort();
    if let Err(e) = run.stop().await {
        error!(error = %e, "failed to stop pipeline");
    }

    let output = completion?;
    if output.paths().len() > 1 {
        info!(outputs = output.paths().len(), "writing the first output only");
    }
    let mut reader = output.open(0).await?;
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout).await?;
    stdout.flush().await?;
    Ok(())
}

async fn stage(operator: Option<OperatorRef>) -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    let Some(operator) = operator.or(settings.operator.clone()) else {
        bail!("no operator given, pass --operator or set WEFT_OPERATOR");
    };
    let handler = builtin_registry()?.get(&operator)?;

    let machine = Arc::new(StaticMachineId::new(settings.machine_id.clone()));
    let shutdown = CancellationToken::new();
    // a bucket is visible from every node, so only the filesystem store needs the sidecar
    let (store, sidecar): (Arc<dyn ContentStore>, _) = match &settings.s3_bucket {
        Some(bucket) => (
            Arc::new(BucketStore::s3(bucket, settings.s3_endpoint.as_deref())?),
            None,
        ),
        None => {
            let local = Arc::new(FsStore::new(&settings.store_root));
            let sidecar = tokio::spawn(serve_store(
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.store_port)),
                local.clone(),
                shutdown.clone(),
            ));
            let store = MachineAffinityStore::new(local, machine.clone())
                .with_port(settings.store_port);
            (Arc::new(store), Some(sidecar))
        }
    };

    let bus = RedisBus::connect(&settings.redis_url).await?;
    let root = PipelineController::new(
        Arc::new(bus.clone()),
        store,
        Arc::new(SnowflakeGenerator::new(SystemClock, settings.worker_id)),
        machine,
    );
    let controller = root.with_scope(&settings.scope);

    let runtime = serve_operator(&controller, &settings.stage, handler).await?;
    info!(
        scope = %settings.scope,
        stage = %settings.stage,
        operator = %operator,
        machine = %settings.machine_id,
        "stage replica ready"
    );

    signal::shutdown_signal().await;

    info!(in_flight = runtime.in_flight(), "draining stage replica");
    runtime.unsubscribe().await;
    bus.close();
    shutdown.cancel();
    if let Some(sidecar) = sidecar {
        match sidecar.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "store sidecar failed"),
            Err(e) => error!(error = %e, "store sidecar panicked"),
        }
    }
    info!("stage replica stopped");
    Ok(())
}

fn validate(pipeline: PathBuf) -> anyhow::Result<()> {
    let spec = PipelineSpec::from_json_file(&pipeline)
        .with_context(|| format!("loading {}", pipeline.display()))?;
    let graph = spec.graph();

    println!(
        "{} ({} stages, {} -> {})",
        spec.ref_id(),
        spec.stages.len(),
        spec.starts,
        spec.ends
    );
    for (name, stage) in &spec.stages {
        let mut next: Vec<&str> = graph.successors(name);
        if *name == spec.ends {
            next.push("$output");
        }
        println!("  {name} [{}] x{} -> {}", stage.uses, stage.options.replicas, next.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_pipeline_runs_one_replica_per_stage() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/pipelines/shout.json");
        let spec = PipelineSpec::from_json_file(path).unwrap();
        let registry = builtin_registry().unwrap();

        for (name, stage) in &spec.stages {
            // the in-process bus delivers every task to every replica
            assert_eq!(stage.options.replicas, 1, "stage {name}");
            assert!(registry.get(&stage.uses).is_ok(), "stage {name}");
        }
    }
}
