//! # Módulo de Telemetria
//!
//! Observabilidade do runner em duas camadas:
//!
//! 1. **Spans de domínio** ([`execution_span`], [`node_span`]): cada
//!    execução de plano é um trace; cada nó visitado é um span filho
//!    com os campos `griffin.*` (plano, execução, location, nó). O
//!    motor cria esses spans na travessia e grava o veredito neles ao
//!    final, então o trace conta a história completa de uma run:
//!
//!    ```text
//!    plan_execution {griffin.plan_id, griffin.execution_id, ...}
//!    ├── node {griffin.node_id = "get-users"}
//!    │   └── http_request {http.method, http.url}
//!    ├── node {griffin.node_id = "pause"}
//!    └── node {griffin.node_id = "check"}
//!    ```
//!
//! 2. **Bootstrap** ([`init_telemetry`]): logging de console filtrado
//!    por `RUST_LOG` e, com endpoint configurado, export OTLP (gRPC)
//!    dos spans acima para Jaeger, Grafana Tempo ou similar.
//!
//! ## Variáveis de ambiente
//!
//! - `OTEL_SERVICE_NAME`: nome do serviço (padrão "griffin-runner")
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: URL do coletor OTLP
//! - `OTEL_TRACES_SAMPLER_ARG`: taxa de sampling (0.0-1.0); a decisão
//!   é herdada do span pai, então uma execução é amostrada inteira ou
//!   não é

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::runtime::Tokio;
use opentelemetry_sdk::trace::{Sampler, Tracer};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use tracing::{Level, Span};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SPANS DE DOMÍNIO
// ============================================================================

/// Span raiz de uma execução de plano.
///
/// Os campos `griffin.success` e `griffin.nodes` nascem vazios; o motor
/// os grava quando a travessia termina.
pub fn execution_span(plan_id: &str, execution_id: &str, location: &str) -> Span {
    tracing::info_span!(
        "plan_execution",
        otel.kind = "internal",
        griffin.plan_id = %plan_id,
        griffin.execution_id = %execution_id,
        griffin.location = %location,
        griffin.success = tracing::field::Empty,
        griffin.nodes = tracing::field::Empty,
    )
}

/// Span de um nó visitado, filho do span da execução.
///
/// `griffin.node_success` é gravado pelo motor no NODE_END.
pub fn node_span(node_id: &str, node_type: &str) -> Span {
    tracing::info_span!(
        "node",
        griffin.node_id = %node_id,
        griffin.node_type = %node_type,
        griffin.node_success = tracing::field::Empty,
    )
}

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

/// Configuração do bootstrap de telemetria.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Nome do serviço nos traces.
    pub service_name: String,

    /// Endpoint OTLP (gRPC). `None` = apenas console.
    pub otlp_endpoint: Option<String>,

    /// Taxa de sampling (0.0 a 1.0).
    pub sampling_ratio: f64,

    /// Logging de console junto com o export OTLP.
    pub enable_console_logging: bool,

    /// Nível mínimo de log quando RUST_LOG não está definido.
    pub log_level: Level,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "griffin-runner".to_string(),
            otlp_endpoint: None,
            sampling_ratio: 1.0,
            enable_console_logging: true,
            log_level: Level::INFO,
        }
    }
}

impl TelemetryConfig {
    /// Configuração a partir das variáveis de ambiente padrão OTEL.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let sampling_ratio = std::env::var("OTEL_TRACES_SAMPLER_ARG")
            .ok()
            .and_then(|raw| raw.parse::<f64>().ok())
            .map(|ratio| ratio.clamp(0.0, 1.0))
            .unwrap_or(defaults.sampling_ratio);

        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            sampling_ratio,
            ..defaults
        }
    }
}

// ============================================================================
// BOOTSTRAP
// ============================================================================

/// Inicializa o subscriber global: filtro de ambiente, console opcional
/// e, com endpoint configurado, a layer OTLP.
///
/// As duas layers entram como `Option`: ausente vira no-op, sem
/// duplicar a montagem do subscriber por combinação.
pub fn init_telemetry(config: TelemetryConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    let otlp_layer = match &config.otlp_endpoint {
        Some(endpoint) => Some(OpenTelemetryLayer::new(otlp_tracer(&config, endpoint)?)),
        None => None,
    };
    let console_layer = config
        .enable_console_logging
        .then(|| tracing_subscriber::fmt::layer().compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(otlp_layer)
        .with(console_layer)
        .init();

    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::info!(
            service_name = %config.service_name,
            %endpoint,
            sampling_ratio = config.sampling_ratio,
            "exporting execution traces via OTLP"
        );
    }
    Ok(())
}

/// Tracer OTLP registrado globalmente: batch exporter gRPC, sampler
/// derivado da taxa e resource identificando este runner.
fn otlp_tracer(config: &TelemetryConfig, endpoint: &str) -> anyhow::Result<Tracer> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()?;

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            sdktrace::Config::default()
                .with_sampler(sampler_for(config.sampling_ratio))
                .with_resource(runner_resource(&config.service_name)),
        )
        .build();

    let tracer = provider.tracer(config.service_name.clone());
    opentelemetry::global::set_tracer_provider(provider);
    Ok(tracer)
}

/// Sampler pela taxa. Entre 0 e 1 a decisão é *parent-based*: os spans
/// de nó herdam a decisão do span da execução, nunca meia-run no trace.
fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(ratio)))
    }
}

/// Resource com a identidade deste runner.
fn runner_resource(service_name: &str) -> Resource {
    Resource::new([
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ])
}

/// Flush e encerramento do provider global. Chamar antes de sair do
/// processo, ou os spans do último batch são perdidos.
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}
