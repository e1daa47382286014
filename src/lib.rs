//! # Griffin Runner - Núcleo de Monitoramento Sintético
//!
//! Este crate é o núcleo da plataforma Griffin: o motor que executa
//! planos de teste HTTP (grafos de requisições, esperas e assertions),
//! o scheduler que decide *quando* executar, e a fila durável que
//! decide *onde* (em qual location) executar.
//!
//! ## Arquitetura
//!
//! ```text
//! ┌───────────┐    ┌─────────┐    ┌────────┐    ┌────────────┐
//! │ Scheduler │ →  │  Queue  │ →  │ Worker │ →  │   Engine   │
//! │ (cadência)│    │ (claim) │    │ (1/loc)│    │ (travessia)│
//! └───────────┘    └─────────┘    └────────┘    └─────┬──────┘
//!                                                     │
//!                                          ┌──────────▼─────────┐
//!                                          │  Events → Sink     │
//!                                          │  (local │ durável) │
//!                                          └────────────────────┘
//! ```
//!
//! O servidor hub (CRUD de planos/runs) e a CLI de autoria (DSL em
//! TypeScript) são colaboradores externos: consomem este crate através
//! dos traits de `store`, `queue` e `events`.

/// Módulo de cliente HTTP: trait `HttpClient`, implementação reqwest e stub.
pub mod client;

/// Módulo do motor de execução: travessia do grafo e resultados por nó.
pub mod engine;

/// Módulo de erros: códigos estruturados (E1xxx..E6xxx) e hints de CLI.
pub mod errors;

/// Módulo de eventos: emissor sequenciado, sink local e sink durável.
pub mod events;

/// Módulo de limites: proteções de execução (nós, timeout, slots).
pub mod limits;

/// Módulo de carregamento: lê, valida (schema) e migra arquivos de plano.
pub mod loader;

/// Módulo de protocolo: estruturas de dados do formato de fio "1.0".
pub mod protocol;

/// Módulo da fila durável: enqueue/claim/ack/fail com lease por job.
pub mod queue;

/// Módulo do scheduler: loop de tick que enfileira planos vencidos.
pub mod scheduler;

/// Módulo de segredos: registry de providers (env, aws, vault).
pub mod secrets;

/// Módulo de armazenamento: contratos de planos e runs + memória.
pub mod store;

/// Módulo de telemetria: integração tracing + OpenTelemetry.
pub mod telemetry;

/// Módulo de variáveis: resolução de folhas `{$variable}` (lado CLI).
pub mod variables;

/// Módulo de validação: boa-formação do grafo do plano.
pub mod validation;

/// Módulo do worker: loop de claim por location e ciclo de vida do run.
pub mod worker;
