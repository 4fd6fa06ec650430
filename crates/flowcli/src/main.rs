// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowcore::{FlowDefinition, TaskSpec, Value};
use flowruntime::{
    collect_results, load_definition, ActionConfig, ActionFactory, ActivityRegistry,
    ChannelResultHandler, FlowManager, InMemoryRecorder, InitContext, InstanceState, RunContext,
    RunOp, RunOptions, RunRequest, SpanTracer, FILE_PREFIX, MAX_STEP_COUNT, STATE_RECORDING_MODE,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow file
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// How to launch the instance
        #[arg(long, value_enum, default_value_t = Op::Start)]
        op: Op,

        /// Instance state JSON file, required for restart and resume
        #[arg(long)]
        state: Option<PathBuf>,

        /// Step to restart from
        #[arg(long, default_value_t = 0)]
        step: u64,

        /// State recording mode: off, step, snapshot or full
        #[arg(long, default_value = "off")]
        recording_mode: String,

        /// Write the last recorded snapshot here, for a later restart
        #[arg(long)]
        save_state: Option<PathBuf>,

        /// Upper bound on steps per run
        #[arg(long)]
        max_steps: Option<u64>,

        /// Print the instance id before the result
        #[arg(long)]
        return_id: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a flow file
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available activity types
    Activities,

    /// Create a new example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Op {
    Start,
    Restart,
    Resume,
}

impl From<Op> for RunOp {
    fn from(op: Op) -> Self {
        match op {
            Op::Start => RunOp::Start,
            Op::Restart => RunOp::Restart,
            Op::Resume => RunOp::Resume,
        }
    }
}

struct RunArgs {
    file: PathBuf,
    input: Option<String>,
    op: Op,
    state: Option<PathBuf>,
    step: u64,
    recording_mode: String,
    save_state: Option<PathBuf>,
    max_steps: Option<u64>,
    return_id: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            op,
            state,
            step,
            recording_mode,
            save_state,
            max_steps,
            return_id,
            verbose,
        } => {
            init_logging(verbose);
            run_flow(RunArgs {
                file,
                input,
                op,
                state,
                step,
                recording_mode,
                save_state,
                max_steps,
                return_id,
            })
            .await?;
        }

        Commands::Validate { file } => {
            validate_flow(file).await?;
        }

        Commands::Activities => {
            list_activities();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn standard_registry() -> ActivityRegistry {
    let mut registry = ActivityRegistry::new();
    flowactivities::register_all(&mut registry);
    registry
}

fn parse_inputs(input: Option<String>) -> Result<HashMap<String, Value>> {
    let Some(input) = input else {
        return Ok(HashMap::new());
    };
    match serde_json::from_str::<serde_json::Value>(&input)? {
        serde_json::Value::Object(obj) => Ok(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect()),
        _ => Err(anyhow::anyhow!("Input must be a JSON object")),
    }
}

fn file_uri(path: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(path)
        .with_context(|| format!("cannot open flow file {}", path.display()))?;
    Ok(format!("{}{}", FILE_PREFIX, absolute.display()))
}

async fn run_flow(args: RunArgs) -> Result<()> {
    println!("🚀 Loading flow from: {}", args.file.display());

    let initial_state = match &args.state {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("cannot read state file {}", path.display()))?;
            Some(serde_json::from_str::<InstanceState>(&json)?)
        }
        None => None,
    };

    let recorder = Arc::new(InMemoryRecorder::new());
    let mut init = InitContext::new(standard_registry())
        .with_resolver(Arc::new(FlowManager::new()))
        .with_tracer(Arc::new(SpanTracer))
        .with_recorder(recorder.clone())
        .with_setting(STATE_RECORDING_MODE, args.recording_mode.as_str());
    if let Some(max_steps) = args.max_steps {
        init = init.with_setting(MAX_STEP_COUNT, max_steps as f64);
    }

    let factory = ActionFactory::new();
    factory.initialize(init)?;

    let uri = file_uri(&args.file)?;
    tracing::debug!("Resolved flow URI: {}", uri);
    let action = factory.new_action(ActionConfig::for_flow(uri.clone())).await?;

    let mut options = RunOptions {
        op: args.op.into(),
        return_id: args.return_id,
        init_step_id: args.step,
        initial_state,
        ..RunOptions::default()
    };
    // A state file saved from another path still runs against this file.
    if let Some(state) = options.initial_state.as_mut() {
        state.flow_uri = uri;
    }

    let request = RunRequest::from_inputs(parse_inputs(args.input)?)?;
    let request = RunRequest {
        inputs: request.inputs,
        options: merge_options(request.options, options),
    };

    let return_id = request.options.return_id;

    let (handler, mut rx) = ChannelResultHandler::new();
    action
        .run(RunContext::default(), request, Arc::new(handler))
        .await?;

    let results = collect_results(&mut rx).await;
    let mut failed = false;
    let mut instance_id = None;
    for result in results {
        match result {
            Ok(outputs) if return_id && instance_id.is_none() => {
                let id = outputs.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                println!("🆔 Instance: {}", id);
                instance_id = Some(id);
            }
            Ok(outputs) => {
                println!("✨ Flow completed");
                println!();
                println!("📤 Outputs:");
                let json = serde_json::Value::from(Value::Object(outputs));
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            Err(e) => {
                println!("💥 Flow failed: {}", e);
                failed = true;
            }
        }
    }

    if let Some(path) = &args.save_state {
        save_last_snapshot(&recorder, instance_id.as_deref(), path).await?;
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Flags win over `_run_options` passed in the input, except where the
/// flags were left at their defaults.
fn merge_options(from_input: RunOptions, from_flags: RunOptions) -> RunOptions {
    RunOptions {
        op: match from_flags.op {
            RunOp::Start => from_input.op,
            op => op,
        },
        return_id: from_flags.return_id || from_input.return_id,
        init_step_id: if from_flags.init_step_id > 0 {
            from_flags.init_step_id
        } else {
            from_input.init_step_id
        },
        initial_state: from_flags.initial_state.or(from_input.initial_state),
        ..from_input
    }
}

async fn save_last_snapshot(
    recorder: &InMemoryRecorder,
    instance_id: Option<&str>,
    path: &Path,
) -> Result<()> {
    let id = match instance_id {
        Some(id) => id.to_string(),
        None => recorder
            .instance_ids()
            .into_iter()
            .next()
            .context("nothing was recorded")?,
    };
    let history = recorder.history(&id).context("no history for instance")?;
    let snapshot = history
        .snapshot_at(u64::MAX)
        .context("no snapshot recorded, use --recording-mode snapshot or full")?;

    tokio::fs::write(path, serde_json::to_string_pretty(snapshot)?).await?;
    println!("💾 Saved state of {} at step {} to {}", id, snapshot.step_count, path.display());
    Ok(())
}

async fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());

    let definition = load_definition(&file).await?;
    let registry = standard_registry();
    let unknown: Vec<&TaskSpec> = definition
        .tasks
        .iter()
        .filter(|t| !registry.contains(&t.activity))
        .collect();

    if !unknown.is_empty() {
        for task in &unknown {
            println!("❌ Task {} uses unknown activity {}", task.id, task.activity);
        }
        return Err(anyhow::anyhow!("{} task(s) use unknown activities", unknown.len()));
    }

    for task in &definition.tasks {
        let missing = registry.unmapped_inputs(task);
        if !missing.is_empty() {
            println!("⚠️  Task {} does not map required input(s): {}", task.id, missing.join(", "));
        }
    }

    println!("✅ Flow is valid:");
    println!("   Name: {}", definition.name);
    println!("   Tasks: {}", definition.tasks.len());
    println!("   Links: {}", definition.links.len());

    Ok(())
}

fn list_activities() {
    println!("📦 Available Activity Types:");
    println!();

    let registry = standard_registry();
    for activity_type in registry.list_activity_types() {
        if let Some(metadata) = registry.get_metadata(&activity_type) {
            println!("  • {} ({})", activity_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", activity_type);
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = FlowDefinition::new("Example Order Flow")
        .with_input("price")
        .with_input("quantity")
        .with_output("total");
    flow.description = Some("Multiplies price by quantity, then logs the total".to_string());

    let multiply = flow.add_task(
        TaskSpec::new("subtotal", "math.multiply")
            .with_name("Compute Total")
            .with_input("value", "$.price")
            .with_input("factor", "$.quantity")
            .with_output("result", "total"),
    );
    let log = flow.add_task(
        TaskSpec::new("announce", "log")
            .with_name("Log Total")
            .with_input("message", "$.total"),
    );
    flow.link(multiply, log);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"price\": 2.5, \"quantity\": 4}}'",
        output.display()
    );

    Ok(())
}
