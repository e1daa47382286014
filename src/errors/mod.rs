//! # Módulo de Códigos de Erro Estruturados
//!
//! Define códigos de erro padronizados para melhor UX e integração
//! com sistemas externos (CI/CD, dashboards, alertas).
//!
//! ## Categorias de Erro
//!
//! | Faixa  | Categoria          | Descrição                              |
//! |--------|--------------------|----------------------------------------|
//! | E1xxx  | Validação          | Plano malformado (grafo, schema)       |
//! | E2xxx  | Transporte         | Falha HTTP contra o alvo monitorado    |
//! | E3xxx  | Assertion          | A resposta não é a esperada            |
//! | E4xxx  | Segredos           | Provider ausente ou resolução falhou   |
//! | E5xxx  | Fila/Scheduler     | Backend da fila indisponível           |
//! | E6xxx  | Interno            | Bug no próprio runner                  |
//!
//! ## Por que códigos numéricos?
//!
//! 1. **Automação**: CI/CD pode agir baseado no código
//! 2. **Pesquisa**: Fácil buscar na documentação
//! 3. **Logs**: Mais compacto que mensagens longas
//!
//! A CLI exibe o erro em uma linha, seguida de um hint esmaecido com a
//! sugestão de correção (ver [`ErrorCode::hint`]).

use std::fmt;

// ============================================================================
// CÓDIGO DE ERRO
// ============================================================================

/// Código de erro estruturado com categoria e número.
///
/// O código é um número de 4 dígitos onde o primeiro dígito é a
/// categoria (1-6) e os três últimos identificam o erro específico.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(u16);

impl ErrorCode {
    // ========================================================================
    // E1xxx: Validação
    // ========================================================================
    // Problema está no plano serializado. Recuperável na borda da API
    // (400); fatal se chegar à execução.

    /// JSON do plano não passou no schema embutido.
    pub const PLAN_SCHEMA: Self = Self(1001);

    /// Versão do formato de fio não registrada.
    pub const UNSUPPORTED_WIRE_VERSION: Self = Self(1002);

    /// Grafo malformado: endpoint desconhecido, aresta nas sentinelas.
    pub const GRAPH_MALFORMED: Self = Self(1003);

    /// Ciclo detectado no grafo.
    pub const GRAPH_CYCLE: Self = Self(1004);

    /// Folha `{$variable}` não resolvida chegou à execução.
    pub const UNRESOLVED_VARIABLE: Self = Self(1005);

    /// response_format XML em um nó HttpRequest.
    pub const UNSUPPORTED_RESPONSE_FORMAT: Self = Self(1006);

    // ========================================================================
    // E2xxx: Transporte
    // ========================================================================
    // Falha ao falar com o alvo sob teste. Registrada por nó;
    // nunca aborta a run.

    /// Timeout na requisição HTTP.
    pub const HTTP_TIMEOUT: Self = Self(2001);

    /// Erro de conexão (DNS, rede, recusa).
    pub const CONNECTION_ERROR: Self = Self(2002);

    /// Erro TLS/SSL.
    pub const TLS_ERROR: Self = Self(2003);

    // ========================================================================
    // E3xxx: Assertions
    // ========================================================================

    /// Um predicado avaliou como falso.
    pub const ASSERTION_FAILED: Self = Self(3001);

    /// O sujeito da assertion é indefinido (nó anterior falhou,
    /// caminho inexistente, header ausente).
    pub const ASSERTION_SUBJECT_UNDEFINED: Self = Self(3002);

    /// Assertion de body XML (reservado no schema, não implementado).
    pub const XML_NOT_SUPPORTED: Self = Self(3003);

    // ========================================================================
    // E4xxx: Segredos
    // ========================================================================
    // Abortam a run antes de qualquer nó executar.

    /// Provider não registrado.
    pub const UNKNOWN_PROVIDER: Self = Self(4001);

    /// O resolver do provider falhou.
    pub const PROVIDER_RESOLUTION_FAILED: Self = Self(4002);

    /// O campo pedido não existe no documento JSON do segredo.
    pub const SECRET_FIELD_MISSING: Self = Self(4003);

    // ========================================================================
    // E5xxx: Fila / Scheduler
    // ========================================================================

    /// Backend da fila inacessível.
    pub const QUEUE_BACKEND_UNAVAILABLE: Self = Self(5001);

    /// Payload de job não desserializável.
    pub const JOB_PAYLOAD_INVALID: Self = Self(5002);

    /// Job esgotou maxAttempts.
    pub const RETRIES_EXHAUSTED: Self = Self(5003);

    // ========================================================================
    // E6xxx: Interno
    // ========================================================================

    /// Erro interno inesperado. Se você ver este, reporte.
    pub const INTERNAL: Self = Self(6001);

    /// Execução cancelada (cancelamento cooperativo ou timeout do plano).
    pub const EXECUTION_CANCELLED: Self = Self(6002);

    // ========================================================================
    // MÉTODOS
    // ========================================================================

    /// Retorna o código numérico.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// Retorna o código formatado com prefixo "E".
    pub fn formatted(&self) -> String {
        format!("E{:04}", self.0)
    }

    /// Categoria derivada do primeiro dígito.
    pub fn category(&self) -> ErrorCategory {
        match self.0 / 1000 {
            1 => ErrorCategory::Validation,
            2 => ErrorCategory::Transport,
            3 => ErrorCategory::Assertion,
            4 => ErrorCategory::Secrets,
            5 => ErrorCategory::Queue,
            6 => ErrorCategory::Internal,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Descrição curta do erro, para logs.
    pub fn description(&self) -> &'static str {
        match self.0 {
            1001 => "Plano reprovado no schema",
            1002 => "Versão de formato não suportada",
            1003 => "Grafo malformado",
            1004 => "Ciclo no grafo",
            1005 => "Variável não resolvida",
            1006 => "Formato de resposta não suportado",
            2001 => "Timeout HTTP",
            2002 => "Erro de conexão",
            2003 => "Erro TLS/SSL",
            3001 => "Assertion falhou",
            3002 => "Sujeito da assertion indefinido",
            3003 => "Assertions XML não suportadas",
            4001 => "Provider de segredo desconhecido",
            4002 => "Resolução de segredo falhou",
            4003 => "Campo ausente no segredo",
            5001 => "Backend da fila indisponível",
            5002 => "Payload de job inválido",
            5003 => "Tentativas esgotadas",
            6001 => "Erro interno",
            6002 => "Execução cancelada",
            _ => "Erro desconhecido",
        }
    }

    /// Hint exibido esmaecido pela CLI, abaixo da linha de erro.
    pub fn hint(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Validation => "verifique o plano com `griffin validate --file <plano>`",
            ErrorCategory::Transport => "o alvo monitorado está acessível a partir desta location?",
            ErrorCategory::Assertion => "compare a resposta real com o valor esperado no plano",
            ErrorCategory::Secrets => "confira o registry de providers e as credenciais do ambiente",
            ErrorCategory::Queue => "o backend da fila está no ar? o scheduler tenta de novo no próximo tick",
            ErrorCategory::Internal => "isto é um bug do runner; abra um issue com o log",
            ErrorCategory::Unknown => "código fora das faixas conhecidas",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

// ============================================================================
// CATEGORIA
// ============================================================================

/// Categoria de erro baseada no primeiro dígito do código.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Transport,
    Assertion,
    Secrets,
    Queue,
    Internal,
    Unknown,
}

impl ErrorCategory {
    /// Nome usado no campo `errorName` de eventos ERROR.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::Transport => "TransportError",
            Self::Assertion => "AssertionFailure",
            Self::Secrets => "SecretResolutionError",
            Self::Queue => "QueueError",
            Self::Internal => "InternalError",
            Self::Unknown => "UnknownError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

// ============================================================================
// ERRO ESTRUTURADO
// ============================================================================

/// Erro com código, mensagem e contexto opcional (nó, plano).
#[derive(Debug)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub message: String,
    pub node_id: Option<String>,
}

impl StructuredError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Linha única exibida ao usuário.
    pub fn user_message(&self) -> String {
        match &self.node_id {
            Some(node_id) => format!("[{}] {} (nó: {})", self.code, self.message, node_id),
            None => format!("[{}] {}", self.code, self.message),
        }
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for StructuredError {}
