//! # Módulo de Protocolo - Formato de Fio dos Planos
//!
//! Este módulo define todas as **estruturas de dados** que representam
//! um plano de monitoramento Griffin e seus resultados de execução.
//!
//! ## O que é um plano?
//!
//! Um plano é um grafo acíclico dirigido (DAG) de nós. Cada nó é uma
//! ação atômica: uma requisição HTTP, uma espera, ou um bloco de
//! assertions sobre a resposta capturada anteriormente.
//!
//! ## Estrutura de um plano (JSON, versão "1.0"):
//!
//! ```json
//! {
//!   "id": "plan-123",
//!   "name": "checkout-health",
//!   "project": "shop",
//!   "environment": "production",
//!   "version": "1.0",
//!   "frequency": { "every": 5, "unit": "MINUTE" },
//!   "locations": ["us-east-1", "eu-west-1"],
//!   "nodes": [
//!     { "type": "HttpRequest", "id": "get-users",
//!       "method": "GET",
//!       "base": { "$literal": "https://api.example.com" },
//!       "path": { "$literal": "/users" },
//!       "response_format": "JSON" }
//!   ],
//!   "edges": [
//!     { "source": "__START__", "target": "get-users" },
//!     { "source": "get-users", "target": "__END__" }
//!   ]
//! }
//! ```
//!
//! ## Hierarquia de tipos:
//!
//! ```text
//! Plan
//! ├── Frequency (cadência de agendamento)
//! ├── Node[] (HttpRequest | Wait | Assertions)
//! │   ├── StringValue ($literal | $secret | $variable)
//! │   └── Assertion[] (status | latency | headers | body)
//! │       └── Predicate (unary | binary)
//! └── Edge[] (source → target, com sentinelas __START__/__END__)
//! ```
//!
//! O plano é **imutável** depois de criado: versões novas são planos
//! novos. A autoria (DSL em TypeScript) acontece fora deste crate; aqui
//! o JSON serializado é tratado como entrada não confiável.

pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// SENTINELAS E VERSÃO
// ============================================================================

/// Sentinela de entrada do grafo. Não corresponde a nenhum nó real.
pub const START_NODE: &str = "__START__";

/// Sentinela de saída do grafo.
pub const END_NODE: &str = "__END__";

/// Nó sintético usado apenas em eventos, quando a resolução de segredos
/// falha antes de qualquer nó real executar.
pub const SECRETS_NODE: &str = "__SECRETS__";

/// Versão atual do formato de fio.
///
/// A leitura é migrate-on-read: versões antigas registradas em
/// [`migrate_to_current`] são aceitas e migradas; versões desconhecidas
/// são rejeitadas.
pub const WIRE_VERSION: &str = "1.0";

fn default_wire_version() -> String {
    WIRE_VERSION.to_string()
}

// ============================================================================
// ERROS DE FIO
// ============================================================================

/// Erros ao interpretar o JSON de um plano (antes da validação do grafo).
#[derive(Debug, Error)]
pub enum WireError {
    /// O campo `version` não corresponde a nenhuma versão registrada.
    #[error("unsupported plan wire version '{version}' (current: {current})")]
    UnsupportedVersion { version: String, current: String },

    /// O JSON não passou no schema embutido (entrada não confiável).
    #[error("plan schema validation failed: {details}")]
    Schema { details: String },

    /// O JSON não pôde ser desserializado para [`Plan`].
    #[error("plan deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),
}

// ============================================================================
// PLANO
// ============================================================================

/// Um plano de monitoramento completo: o DAG mais a cadência e as
/// locations de execução.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Identificador único do plano (atribuído pelo hub na criação).
    pub id: String,

    /// Nome legível, único por (project, environment).
    pub name: String,

    /// Projeto ao qual o plano pertence.
    pub project: String,

    /// Ambiente alvo (ex: "staging", "production").
    pub environment: String,

    /// Versão do formato de fio. Sempre "1.0" após migração.
    #[serde(default = "default_wire_version")]
    pub version: String,

    /// Cadência de agendamento. `None` desliga o agendamento; o plano
    /// só roda por trigger manual.
    #[serde(default)]
    pub frequency: Option<Frequency>,

    /// Locations onde cada grupo de execução roda (uma run por location).
    /// Vazio significa a location única "local".
    #[serde(default)]
    pub locations: Vec<String>,

    /// Nós do grafo. IDs devem ser únicos dentro do plano.
    pub nodes: Vec<Node>,

    /// Arestas do grafo. Endpoints são IDs de nós ou as sentinelas.
    pub edges: Vec<Edge>,
}

impl Plan {
    /// Fingerprint SHA-256 do JSON canônico do plano.
    ///
    /// Usado em logs para correlacionar execuções com o conteúdo exato
    /// do plano, independente de id/versão.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&canonical);
        format!("{:x}", digest)
    }

    /// Locations efetivas: as declaradas, ou `["local"]` se nenhuma.
    pub fn effective_locations(&self) -> Vec<String> {
        if self.locations.is_empty() {
            vec!["local".to_string()]
        } else {
            self.locations.clone()
        }
    }

    /// Procura um nó pelo ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == id)
    }
}

/// Cadência de agendamento: "a cada N unidades".
///
/// Sem expressões cron: a dupla `{every, unit}` é deliberadamente o
/// único formato suportado. Frequências menores que o intervalo de tick
/// do scheduler são arredondadas para cima implicitamente (o plano roda
/// no primeiro tick em que está vencido).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequency {
    /// Multiplicador da unidade. Deve ser ≥ 1 (validado).
    pub every: u32,

    /// Unidade de tempo.
    pub unit: FrequencyUnit,
}

impl Frequency {
    /// Converte a cadência para uma duração de chrono.
    pub fn as_duration(&self) -> chrono::Duration {
        let every = i64::from(self.every);
        match self.unit {
            FrequencyUnit::Minute => chrono::Duration::minutes(every),
            FrequencyUnit::Hour => chrono::Duration::hours(every),
            FrequencyUnit::Day => chrono::Duration::days(every),
        }
    }
}

/// Unidades de cadência suportadas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyUnit {
    Minute,
    Hour,
    Day,
}

/// Uma aresta dirigida do grafo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// ID do nó de origem (ou `__START__`).
    pub source: String,
    /// ID do nó de destino (ou `__END__`).
    pub target: String,
}

// ============================================================================
// NÓS
// ============================================================================

/// Um nó do grafo: variante etiquetada pelo campo `type`.
///
/// O match sobre a tag é exaustivo por construção; um `type`
/// desconhecido falha já na desserialização (e antes, no schema).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    /// Requisição HTTP contra o alvo monitorado.
    HttpRequest(HttpRequestNode),
    /// Pausa não ocupada (sleep assíncrono).
    Wait(WaitNode),
    /// Bloco de assertions sobre a resposta capturada mais recente.
    Assertions(AssertionsNode),
}

impl Node {
    /// ID do nó, independente da variante.
    pub fn id(&self) -> &str {
        match self {
            Node::HttpRequest(n) => &n.id,
            Node::Wait(n) => &n.id,
            Node::Assertions(n) => &n.id,
        }
    }

    /// Nome da variante, para logs e eventos.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::HttpRequest(_) => "HttpRequest",
            Node::Wait(_) => "Wait",
            Node::Assertions(_) => "Assertions",
        }
    }
}

/// Nó de requisição HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestNode {
    pub id: String,

    /// Método HTTP.
    pub method: HttpMethod,

    /// URL base. Concatenada com `path` sem templating de parâmetros.
    pub base: StringValue,

    /// Caminho da requisição.
    pub path: StringValue,

    /// Headers da requisição. Valores podem ser segredos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, StringValue>>,

    /// Body da requisição: qualquer árvore JSON. Folhas `{$secret}` são
    /// substituídas na resolução de segredos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,

    /// Formato esperado da resposta. Apenas JSON é executável; XML é
    /// reservado no schema mas falha na execução.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

/// Métodos HTTP aceitos no formato de fio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
        }
    }
}

/// Formato de resposta declarado em um nó HttpRequest ou em uma
/// assertion de body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
}

/// Nó de espera.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitNode {
    pub id: String,

    /// Duração da pausa em milissegundos. A espera nunca é encurtada,
    /// mas pode ser abortada por cancelamento.
    pub duration_ms: u64,
}

/// Nó de assertions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionsNode {
    pub id: String,
    pub assertions: Vec<Assertion>,
}

// ============================================================================
// STRING VALUE: $literal | $secret | $variable
// ============================================================================

/// Uma folha de string no plano: literal, referência a segredo, ou
/// referência a variável.
///
/// Variáveis são resolvidas antes da persistência (lado CLI, módulo
/// `variables`); segredos são resolvidos no momento da execução (módulo
/// `secrets`). Depois das duas resoluções toda folha é `Literal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StringValue {
    Literal {
        #[serde(rename = "$literal")]
        literal: String,
    },
    Secret {
        #[serde(rename = "$secret")]
        secret: SecretRef,
    },
    Variable {
        #[serde(rename = "$variable")]
        variable: VariableRef,
    },
}

impl StringValue {
    /// Constrói uma folha literal.
    pub fn literal(value: impl Into<String>) -> Self {
        StringValue::Literal {
            literal: value.into(),
        }
    }

    /// Retorna a string se a folha já for literal.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StringValue::Literal { literal } => Some(literal),
            _ => None,
        }
    }
}

/// Referência a um segredo: `{provider, ref, version?, field?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Nome do provider no registry ("env", "aws", "vault", ...).
    pub provider: String,

    /// Identificador do segredo dentro do provider.
    #[serde(rename = "ref")]
    pub reference: String,

    /// Pin de versão (suportado pelo provider aws).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Campo a extrair quando o segredo é um documento JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Referência a uma variável de autoria: `{key, template?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableRef {
    pub key: String,

    /// Template opcional. O valor resolvido substitui o marcador
    /// `${value}` dentro do template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

// ============================================================================
// ASSERTIONS E PREDICADOS
// ============================================================================

/// Uma assertion, discriminada pelo campo `subject`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "subject", rename_all = "lowercase")]
pub enum Assertion {
    /// Sujeito: o status HTTP inteiro. Predicado sempre binário.
    Status { predicate: Predicate },

    /// Sujeito: a latência (`duration_ms`) da resposta.
    Latency { predicate: Predicate },

    /// Sujeito: um header, procurado sem distinção de maiúsculas.
    Headers {
        #[serde(rename = "headerName")]
        header_name: String,
        predicate: Predicate,
    },

    /// Sujeito: um caminho dentro do body.
    ///
    /// Para JSON o caminho é navegado da esquerda para a direita;
    /// segmentos numéricos indexam arrays, os demais indexam objetos.
    /// XML é reservado no schema e falha na avaliação.
    Body {
        #[serde(rename = "responseType")]
        response_type: ResponseFormat,
        path: Vec<String>,
        predicate: Predicate,
    },
}

impl Assertion {
    /// Descrição curta do sujeito, usada em mensagens de falha.
    pub fn subject_label(&self) -> String {
        match self {
            Assertion::Status { .. } => "status".to_string(),
            Assertion::Latency { .. } => "latency".to_string(),
            Assertion::Headers { header_name, .. } => format!("header {}", header_name),
            Assertion::Body { path, .. } => format!("body.{}", path.join(".")),
        }
    }
}

/// Um predicado: unário (sem operando) ou binário (com valor esperado).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Predicate {
    Unary { operator: UnaryOperator },
    Binary { operator: BinaryOperator, expected: Value },
}

/// Operadores unários.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnaryOperator {
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
    IsEmpty,
    IsNotEmpty,
}

/// Operadores binários.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinaryOperator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
}

// ============================================================================
// RUNS
// ============================================================================

/// Status de uma run. Transições PENDING→RUNNING→(COMPLETED|FAILED)
/// são monotônicas; TIMEOUT é um terminal alternativo a FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

/// Origem do disparo de uma run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggeredBy {
    Scheduled,
    Manual,
    Retry,
}

/// Uma execução de um plano em uma location.
///
/// Criada PENDING no enqueue; o worker a move para RUNNING ao começar
/// e para COMPLETED/FAILED ao terminar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: uuid::Uuid,

    #[serde(rename = "planId")]
    pub plan_id: String,

    /// Agrupa as runs disparadas juntas (uma por location) para um
    /// mesmo instante vencido.
    #[serde(rename = "executionGroupId")]
    pub execution_group_id: uuid::Uuid,

    pub location: String,
    pub environment: String,
    pub status: RunStatus,

    #[serde(rename = "triggeredBy")]
    pub triggered_by: TriggeredBy,

    #[serde(rename = "startedAt")]
    pub started_at: chrono::DateTime<chrono::Utc>,

    #[serde(rename = "completedAt", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

// ============================================================================
// PAYLOAD DE JOB
// ============================================================================

/// Payload serializado dentro de um job da fila.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobData {
    /// Executar um plano em nome de uma run já criada.
    #[serde(rename = "execute-plan")]
    ExecutePlan {
        #[serde(rename = "planId")]
        plan_id: String,
        #[serde(rename = "jobRunId")]
        job_run_id: uuid::Uuid,
        environment: String,
        #[serde(rename = "scheduledAt")]
        scheduled_at: chrono::DateTime<chrono::Utc>,
    },
}

// ============================================================================
// RESULTADOS DE EXECUÇÃO
// ============================================================================

/// Resultado de um nó após a travessia.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    #[serde(rename = "nodeId")]
    pub node_id: String,

    pub success: bool,

    /// Body da resposta (apenas nós HttpRequest bem-sucedidos).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,

    /// Headers da resposta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Status HTTP registrado (não é, por si, uma falha).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// Mensagem de erro quando o nó falhou.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,
}

/// Saída do motor para uma execução completa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// `true` sse todo nó visitado teve sucesso.
    pub success: bool,

    /// Resultados na ordem de travessia.
    pub results: Vec<NodeResult>,

    /// Uma entrada `"<nodeId>: <erro>"` por nó que falhou, ou uma única
    /// mensagem descritiva em falhas fatais (grafo, segredos).
    pub errors: Vec<String>,

    #[serde(rename = "totalDuration_ms")]
    pub total_duration_ms: u64,
}

/// Relatório de execução gerado pela CLI `execute`.
#[derive(Debug, Serialize)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub plan_id: String,
    pub plan_fingerprint: String,
    pub status: String,
    pub start_time: String,
    pub end_time: String,
    pub summary: ExecutionSummary,
    pub results: Vec<NodeResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Contagens do relatório.
#[derive(Debug, Serialize)]
pub struct ExecutionSummary {
    pub total_nodes: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let passed = outcome.results.iter().filter(|r| r.success).count();
        Self {
            total_nodes: outcome.results.len(),
            passed,
            failed: outcome.results.len() - passed,
            duration_ms: outcome.total_duration_ms,
        }
    }
}

// ============================================================================
// MIGRATE-ON-READ
// ============================================================================

/// Migra o JSON cru de um plano para a versão atual do formato.
///
/// Cada versão antiga registrada tem uma função de migração que leva ao
/// formato seguinte; as funções são aplicadas em cadeia até alcançar
/// [`WIRE_VERSION`]. Hoje "1.0" é a única versão registrada, então a
/// cadeia é vazia - o ponto de extensão existe para que um leitor "2.0"
/// continue aceitando corpos "1.0".
pub fn migrate_to_current(raw: Value) -> Result<Value, WireError> {
    let version = raw
        .get("version")
        .and_then(|v| v.as_str())
        .unwrap_or(WIRE_VERSION)
        .to_string();

    // Cadeia de migrações: (versão de origem, transformação).
    let migrations: &[(&str, fn(Value) -> Value)] = &[];

    if version == WIRE_VERSION {
        return Ok(raw);
    }

    let mut current = raw;
    let mut at = version.clone();
    for (from, migrate) in migrations {
        if at == *from {
            current = migrate(current);
            at = current
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or(WIRE_VERSION)
                .to_string();
        }
    }

    if at == WIRE_VERSION {
        Ok(current)
    } else {
        Err(WireError::UnsupportedVersion {
            version,
            current: WIRE_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_tag_roundtrip() {
        let node: Node = serde_json::from_value(json!({
            "type": "HttpRequest",
            "id": "get-users",
            "method": "GET",
            "base": { "$literal": "https://api.example.com" },
            "path": { "$literal": "/users" }
        }))
        .unwrap();

        assert_eq!(node.id(), "get-users");
        assert_eq!(node.kind(), "HttpRequest");

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], "HttpRequest");
        assert_eq!(back["response_format"], "JSON"); // default
    }

    #[test]
    fn test_wait_node_parses() {
        let node: Node = serde_json::from_value(json!({
            "type": "Wait",
            "id": "pause",
            "duration_ms": 100
        }))
        .unwrap();
        assert_eq!(node.kind(), "Wait");
    }

    #[test]
    fn test_unknown_node_tag_rejected() {
        let result: Result<Node, _> = serde_json::from_value(json!({
            "type": "Browser",
            "id": "x"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_string_value_forms() {
        let literal: StringValue =
            serde_json::from_value(json!({ "$literal": "hello" })).unwrap();
        assert_eq!(literal.as_literal(), Some("hello"));

        let secret: StringValue = serde_json::from_value(json!({
            "$secret": { "provider": "env", "ref": "API_TOKEN" }
        }))
        .unwrap();
        match secret {
            StringValue::Secret { secret } => {
                assert_eq!(secret.provider, "env");
                assert_eq!(secret.reference, "API_TOKEN");
                assert!(secret.version.is_none());
            }
            other => panic!("expected secret leaf, got {:?}", other),
        }

        let variable: StringValue = serde_json::from_value(json!({
            "$variable": { "key": "base_url", "template": "https://${value}" }
        }))
        .unwrap();
        assert!(matches!(variable, StringValue::Variable { .. }));
    }

    #[test]
    fn test_assertion_subject_discriminant() {
        let assertion: Assertion = serde_json::from_value(json!({
            "subject": "body",
            "responseType": "JSON",
            "path": ["users", "0", "id"],
            "predicate": { "type": "binary", "operator": "EQUAL", "expected": 1 }
        }))
        .unwrap();

        assert_eq!(assertion.subject_label(), "body.users.0.id");

        let header: Assertion = serde_json::from_value(json!({
            "subject": "headers",
            "headerName": "Content-Type",
            "predicate": { "type": "unary", "operator": "IS_NOT_NULL" }
        }))
        .unwrap();
        assert_eq!(header.subject_label(), "header Content-Type");
    }

    #[test]
    fn test_predicate_operator_spelling() {
        let predicate: Predicate = serde_json::from_value(json!({
            "type": "binary",
            "operator": "GREATER_THAN_OR_EQUAL",
            "expected": 10
        }))
        .unwrap();
        match predicate {
            Predicate::Binary { operator, .. } => {
                assert_eq!(operator, BinaryOperator::GreaterThanOrEqual)
            }
            _ => panic!("expected binary predicate"),
        }
    }

    #[test]
    fn test_frequency_duration() {
        let frequency = Frequency {
            every: 5,
            unit: FrequencyUnit::Minute,
        };
        assert_eq!(frequency.as_duration(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_effective_locations_default_local() {
        let plan: Plan = serde_json::from_value(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [], "edges": []
        }))
        .unwrap();
        assert_eq!(plan.effective_locations(), vec!["local".to_string()]);
        assert_eq!(plan.version, WIRE_VERSION);
    }

    #[test]
    fn test_migrate_current_version_is_identity() {
        let raw = json!({ "version": "1.0", "name": "x" });
        let migrated = migrate_to_current(raw.clone()).unwrap();
        assert_eq!(migrated, raw);
    }

    #[test]
    fn test_migrate_unknown_version_rejected() {
        let raw = json!({ "version": "9.9", "name": "x" });
        let err = migrate_to_current(raw).unwrap_err();
        assert!(err.to_string().contains("9.9"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let plan: Plan = serde_json::from_value(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [], "edges": []
        }))
        .unwrap();
        let mut other = plan.clone();
        assert_eq!(plan.fingerprint(), other.fingerprint());

        other.name = "renamed".to_string();
        assert_ne!(plan.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_job_data_wire_shape() {
        let data = JobData::ExecutePlan {
            plan_id: "p1".to_string(),
            job_run_id: uuid::Uuid::nil(),
            environment: "dev".to_string(),
            scheduled_at: chrono::Utc::now(),
        };
        let value = serde_json::to_value(&data).unwrap();
        assert_eq!(value["type"], "execute-plan");
        assert_eq!(value["planId"], "p1");
    }
}
