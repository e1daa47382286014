//! # Griffin - CLI Operacional do Runner
//!
//! Ponto de entrada do binário `griffin`. Três subcomandos:
//!
//! 1. **execute**: roda um plano local uma vez e gera o relatório
//! 2. **validate**: só valida (schema + grafo), sem executar
//! 3. **worker**: sobe o processo completo: scheduler + fila em
//!    memória + um worker por location
//!
//! ## Códigos de saída
//!
//! - `0`: sucesso
//! - `1`: erro de usuário ou run que falhou
//! - `2`: falha de validação
//!
//! A variável `GRIFFIN_ENV` sobrescreve o argumento `--environment`.
//!
//! ## Arquitetura do processo `worker`
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────────────┐
//! │ Scheduler │ → │ MemoryQueue  │ → │ Worker (por loc.) │
//! └───────────┘   └──────────────┘   └─────────┬─────────┘
//!                                              │
//!                                     ┌────────▼────────┐
//!                                     │   PlanRunner    │
//!                                     │ (reqwest + env/ │
//!                                     │  vault secrets) │
//!                                     └─────────────────┘
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use uuid::Uuid;

use griffin_runner::client::ReqwestClient;
use griffin_runner::engine::{EngineOptions, PlanRunner};
use griffin_runner::errors::{ErrorCode, StructuredError};
use griffin_runner::events::durable::{DurableSink, DurableSinkConfig, StreamAdapter};
use griffin_runner::events::{EventSink, LocalSink};
use griffin_runner::limits::ExecutionLimits;
use griffin_runner::loader;
use griffin_runner::protocol::{ExecutionReport, ExecutionSummary, Plan, WireError};
use griffin_runner::queue::memory::MemoryQueue;
use griffin_runner::scheduler::{Scheduler, SchedulerConfig};
use griffin_runner::secrets::vault::VaultProvider;
use griffin_runner::secrets::{EnvProvider, SecretRegistry};
use griffin_runner::store::{MemoryStore, PlanStore};
use griffin_runner::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig};
use griffin_runner::validation;
use griffin_runner::variables;
use griffin_runner::worker::{Worker, WorkerConfig};

// ============================================================================
// CÓDIGOS DE SAÍDA
// ============================================================================

const EXIT_OK: u8 = 0;
const EXIT_RUN_ERROR: u8 = 1;
const EXIT_VALIDATION: u8 = 2;

// ============================================================================
// CLI
// ============================================================================

#[derive(Parser)]
#[command(name = "griffin")]
#[command(about = "Griffin synthetic monitoring runner", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Habilita export de traces OTLP.
    #[arg(long, global = true, default_value = "false")]
    otel: bool,

    /// Endpoint do coletor OTLP (senão, OTEL_EXPORTER_OTLP_ENDPOINT).
    #[arg(long, global = true)]
    otel_endpoint: Option<String>,

    /// Modo silencioso: apenas erros no stderr.
    #[arg(long, short = 's', global = true, default_value = "false")]
    silent: bool,

    /// Modo verbose: logs de debug e fluxo de eventos no terminal.
    #[arg(long, short = 'v', global = true, default_value = "false")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Executa um plano local uma vez e imprime/salva o relatório.
    Execute {
        /// Caminho para o arquivo JSON do plano.
        #[arg(short, long)]
        file: PathBuf,

        /// Onde salvar o relatório (senão, stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ambiente alvo. A variável `GRIFFIN_ENV` tem precedência
        /// sobre este argumento.
        #[arg(long)]
        environment: Option<String>,

        /// Location reportada nos eventos.
        #[arg(long, default_value = "local")]
        location: String,

        /// ID de execução customizado (senão, UUID v4).
        #[arg(long)]
        execution_id: Option<String>,

        /// Valores para folhas `{$variable}` do plano (repetível).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Valida um plano (schema + grafo) sem executar.
    Validate {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Sobe scheduler + fila em memória + um worker por location.
    Worker {
        /// Diretório com os planos (*.json).
        #[arg(long)]
        plans_dir: PathBuf,

        /// Locations atendidas por este processo, separadas por vírgula.
        #[arg(long, default_value = "local")]
        locations: String,

        /// Intervalo de tick do scheduler em segundos.
        #[arg(long)]
        tick_secs: Option<u64>,

        /// Endpoint HTTP do stream durável de eventos (opcional).
        #[arg(long)]
        events_endpoint: Option<String>,
    },
}

// ============================================================================
// MAIN
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut telemetry_config = TelemetryConfig::from_env();
    telemetry_config.log_level = if cli.silent {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    if cli.otel {
        if let Some(endpoint) = &cli.otel_endpoint {
            telemetry_config.otlp_endpoint = Some(endpoint.clone());
        } else if telemetry_config.otlp_endpoint.is_none() {
            telemetry_config.otlp_endpoint = Some("http://localhost:4317".to_string());
        }
    }
    if let Err(e) = init_telemetry(telemetry_config) {
        if !cli.silent {
            eprintln!("Warning: failed to initialize telemetry: {e}");
        }
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    let code = match &cli.command {
        Commands::Execute {
            file,
            output,
            environment,
            location,
            execution_id,
            vars,
        } => {
            let execution_id = execution_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            execute_command(
                file,
                output.as_deref(),
                environment.as_deref(),
                location,
                &execution_id,
                vars,
                cli.verbose,
                cli.silent,
            )
            .await
        }
        Commands::Validate { file } => validate_command(file),
        Commands::Worker {
            plans_dir,
            locations,
            tick_secs,
            events_endpoint,
        } => {
            worker_command(plans_dir, locations, *tick_secs, events_endpoint.as_deref()).await
        }
    };

    shutdown_telemetry();
    ExitCode::from(code)
}

// ============================================================================
// FALHAS NA CLI
// ============================================================================

/// Uma linha de erro, mais o hint esmaecido logo abaixo.
fn report_failure(error: &StructuredError) {
    eprintln!("error: {}", error.user_message());
    eprintln!("  \x1b[2m{}\x1b[0m", error.code.hint());
}

/// Carrega um plano traduzindo a falha para código de saída: leitura e
/// parse são erro de usuário (1); schema e versão são validação (2).
fn load_plan_or_exit_code(file: &PathBuf) -> Result<Plan, u8> {
    match loader::load_plan_from_file(file) {
        Ok(plan) => Ok(plan),
        Err(e) => match e.downcast_ref::<WireError>() {
            Some(wire) => {
                let code = match wire {
                    WireError::UnsupportedVersion { .. } => ErrorCode::UNSUPPORTED_WIRE_VERSION,
                    WireError::Schema { .. } | WireError::Deserialize(_) => {
                        ErrorCode::PLAN_SCHEMA
                    }
                };
                report_failure(&StructuredError::new(code, e.to_string()));
                Err(EXIT_VALIDATION)
            }
            None => {
                // Arquivo ausente ou JSON quebrado: erro de usuário.
                eprintln!("error: {e}");
                eprintln!("  \x1b[2mcheck the file path and that it contains a JSON plan\x1b[0m");
                Err(EXIT_RUN_ERROR)
            }
        },
    }
}

fn validate_or_exit_code(plan: &Plan) -> Result<(), u8> {
    if let Err(errors) = validation::validate_plan(plan) {
        for e in &errors {
            report_failure(&StructuredError::new(
                ErrorCode::GRAPH_MALFORMED,
                e.to_string(),
            ));
        }
        return Err(EXIT_VALIDATION);
    }
    Ok(())
}

/// Registry de segredos do processo: `env` sempre; `vault` quando
/// `VAULT_ADDR` e `VAULT_TOKEN` estão presentes (com sonda de token).
async fn build_secret_registry() -> Result<SecretRegistry, u8> {
    let vault = match (std::env::var("VAULT_ADDR"), std::env::var("VAULT_TOKEN")) {
        (Ok(address), Ok(token)) => Some(VaultProvider::new(address, token)),
        _ => None,
    };

    let mut builder = SecretRegistry::builder();
    builder = builder
        .register("env", Arc::new(EnvProvider))
        .await
        .expect("env provider has no probe");

    if let Some(vault) = vault {
        match builder.register("vault", Arc::new(vault)).await {
            Ok(b) => builder = b,
            Err(e) => {
                report_failure(&StructuredError::new(
                    ErrorCode::PROVIDER_RESOLUTION_FAILED,
                    e.to_string(),
                ));
                return Err(EXIT_RUN_ERROR);
            }
        }
    }

    Ok(builder.build())
}

// ============================================================================
// EXECUTE
// ============================================================================

async fn execute_command(
    file: &PathBuf,
    output: Option<&std::path::Path>,
    environment: Option<&str>,
    location: &str,
    execution_id: &str,
    vars: &[String],
    verbose: bool,
    silent: bool,
) -> u8 {
    let start_time = chrono::Utc::now();

    let plan = match load_plan_or_exit_code(file) {
        Ok(plan) => plan,
        Err(code) => return code,
    };

    // Resolução de variáveis (lado CLI, antes de validar/executar).
    let values: std::collections::HashMap<String, String> = vars
        .iter()
        .filter_map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();
    let plan = match variables::resolve_plan(&plan, &values) {
        Ok(plan) => plan,
        Err(e) => {
            report_failure(&StructuredError::new(
                ErrorCode::UNRESOLVED_VARIABLE,
                e.to_string(),
            ));
            return EXIT_VALIDATION;
        }
    };

    if let Err(code) = validate_or_exit_code(&plan) {
        return code;
    }

    let limits = ExecutionLimits::from_env();
    if let Err(violation) = limits.check(&plan) {
        report_failure(&StructuredError::new(
            ErrorCode::GRAPH_MALFORMED,
            violation.to_string(),
        ));
        return EXIT_VALIDATION;
    }

    // GRIFFIN_ENV sobrescreve o argumento; o plano é o último fallback.
    let environment = std::env::var("GRIFFIN_ENV")
        .ok()
        .or_else(|| environment.map(String::from))
        .unwrap_or_else(|| plan.environment.clone());
    if !silent {
        info!(
            plan_id = %plan.id,
            plan_name = %plan.name,
            %environment,
            fingerprint = %plan.fingerprint(),
            "plan loaded"
        );
    }

    let registry = match build_secret_registry().await {
        Ok(registry) => registry,
        Err(code) => return code,
    };

    let sink = Arc::new(LocalSink::new());
    if verbose {
        sink.subscribe(|event| {
            eprintln!(
                "  [{:>3}] {} {}",
                event.envelope.seq,
                event.kind.name(),
                serde_json::to_string(&event.kind).unwrap_or_default()
            );
        });
    }

    let runner = PlanRunner::new(Arc::new(ReqwestClient::new()), Arc::new(registry))
        .with_sink(sink.clone() as Arc<dyn EventSink>)
        .with_options(EngineOptions {
            http_timeout: limits.http_timeout,
            plan_timeout: Some(limits.max_plan_duration),
            organization_id: "local".to_string(),
        });

    // Ctrl-C cancela cooperativamente (NODE_END/PLAN_END ainda saem).
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = runner
        .execute(&plan, execution_id, location, None, cancel)
        .await;

    let end_time = chrono::Utc::now();
    let report = ExecutionReport {
        execution_id: execution_id.to_string(),
        plan_id: plan.id.clone(),
        plan_fingerprint: plan.fingerprint(),
        status: if outcome.success { "passed" } else { "failed" }.to_string(),
        start_time: start_time.to_rfc3339(),
        end_time: end_time.to_rfc3339(),
        summary: ExecutionSummary::from_outcome(&outcome),
        results: outcome.results.clone(),
        errors: outcome.errors.clone(),
    };

    let json = serde_json::to_string_pretty(&report).expect("report serializes");
    if let Some(path) = output {
        if let Err(e) = std::fs::write(path, &json) {
            error!(error = %e, "failed to write report");
            return EXIT_RUN_ERROR;
        }
        if !silent {
            println!("report saved to {}", path.display());
        }
    } else if !silent {
        println!("{json}");
    }

    if outcome.success {
        EXIT_OK
    } else {
        for line in &outcome.errors {
            report_failure(&StructuredError::new(
                ErrorCode::ASSERTION_FAILED,
                line.as_str(),
            ));
        }
        EXIT_RUN_ERROR
    }
}

// ============================================================================
// VALIDATE
// ============================================================================

fn validate_command(file: &PathBuf) -> u8 {
    let plan = match load_plan_or_exit_code(file) {
        Ok(plan) => plan,
        Err(code) => return code,
    };
    match validate_or_exit_code(&plan) {
        Ok(()) => {
            println!(
                "plan '{}' is well-formed ({} nodes, {} edges)",
                plan.name,
                plan.nodes.len(),
                plan.edges.len()
            );
            EXIT_OK
        }
        Err(code) => code,
    }
}

// ============================================================================
// WORKER
// ============================================================================

async fn worker_command(
    plans_dir: &PathBuf,
    locations: &str,
    tick_secs: Option<u64>,
    events_endpoint: Option<&str>,
) -> u8 {
    // Carrega todos os planos do diretório para o store em memória.
    let store = Arc::new(MemoryStore::new());
    let entries = match std::fs::read_dir(plans_dir) {
        Ok(entries) => entries,
        Err(e) => {
            report_failure(&StructuredError::new(
                ErrorCode::INTERNAL,
                format!("cannot read plans dir {}: {e}", plans_dir.display()),
            ));
            return EXIT_RUN_ERROR;
        }
    };

    let mut loaded = 0usize;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match loader::load_plan_from_file(&path) {
            Ok(plan) => match validation::validate_plan(&plan) {
                Ok(()) => {
                    info!(plan_id = %plan.id, file = %path.display(), "plan loaded");
                    let _ = store.upsert(plan).await;
                    loaded += 1;
                }
                Err(errors) => {
                    warn!(file = %path.display(), errors = errors.len(), "skipping malformed plan");
                }
            },
            Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable plan"),
        }
    }
    if loaded == 0 {
        report_failure(&StructuredError::new(
            ErrorCode::PLAN_SCHEMA,
            format!("no valid plan found in {}", plans_dir.display()),
        ));
        return EXIT_VALIDATION;
    }
    info!(loaded, "plans loaded into memory store");

    let registry = match build_secret_registry().await {
        Ok(registry) => registry,
        Err(code) => return code,
    };

    let sink: Option<Arc<dyn EventSink>> = events_endpoint.map(|endpoint| {
        Arc::new(DurableSink::new(
            Arc::new(StreamAdapter::new(endpoint)),
            DurableSinkConfig::default(),
        )) as Arc<dyn EventSink>
    });

    let limits = ExecutionLimits::from_env();
    let mut runner = PlanRunner::new(Arc::new(ReqwestClient::new()), Arc::new(registry))
        .with_options(EngineOptions {
            http_timeout: limits.http_timeout,
            plan_timeout: Some(limits.max_plan_duration),
            organization_id: "local".to_string(),
        });
    if let Some(sink) = sink {
        runner = runner.with_sink(sink);
    }
    let runner = Arc::new(runner);

    let queue = Arc::new(MemoryQueue::new());

    let mut scheduler_config = SchedulerConfig::from_env();
    if let Some(secs) = tick_secs {
        scheduler_config.tick_interval = std::time::Duration::from_secs(secs.max(1));
    }
    let scheduler = Arc::new(
        Scheduler::new(store.clone(), store.clone(), queue.clone())
            .with_config(scheduler_config),
    );

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    {
        let scheduler = scheduler.clone();
        tasks.push(tokio::spawn(async move { scheduler.run().await }));
    }

    for location in locations.split(',').map(str::trim).filter(|l| !l.is_empty()) {
        let worker = Arc::new(
            Worker::new(
                location,
                queue.clone(),
                store.clone(),
                store.clone(),
                runner.clone(),
            )
            .with_config(WorkerConfig::from_limits(&limits)),
        );
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { worker.run(token).await }));
    }

    info!("griffin worker process up; Ctrl-C to stop");
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");

    scheduler.stop();
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    EXIT_OK
}
