//! # Módulo de Segredos
//!
//! Planos referenciam credenciais como folhas `{$secret: {provider,
//! ref, version?, field?}}`. Este módulo resolve essas folhas **no
//! momento da execução**: o plano persistido nunca contém o valor.
//!
//! ## Providers
//!
//! Cada provider é identificado por um prefixo de nome:
//! - `env`: lê uma variável de ambiente do processo
//! - `aws`: busca em um cliente Secrets Manager (com pin de `version`
//!   e extração de `field` de documentos JSON) - ver [`aws`]
//! - `vault`: GET HTTP com header de token - ver [`vault`]
//!
//! O [`SecretRegistry`] é montado na inicialização e **somente leitura**
//! depois disso: pode ser compartilhado entre execuções sem locks.
//! Providers podem implementar uma sonda `validate()` chamada durante o
//! registro (o Vault faz um token lookup, por exemplo).
//!
//! ## Falha
//!
//! Um provider desconhecido ou um resolver que falha aborta a run
//! inteira **antes** de qualquer nó executar; o motor emite
//! `NODE_START`/`NODE_END` no nó sintético `__SECRETS__` para que a
//! falha apareça no fluxo de eventos.

pub mod aws;
pub mod vault;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::protocol::{Node, Plan, SecretRef, StringValue};

// ============================================================================
// ERROS
// ============================================================================

/// Falhas de resolução de segredos. Sempre fatais para a run.
#[derive(Debug, Error)]
pub enum SecretResolutionError {
    /// O nome do provider não está no registry.
    #[error("unknown secret provider '{provider}' (ref '{reference}')")]
    UnknownProvider { provider: String, reference: String },

    /// O resolver do provider falhou (rede, permissão, segredo ausente).
    #[error("provider '{provider}' failed to resolve '{reference}': {cause}")]
    ResolutionFailed {
        provider: String,
        reference: String,
        cause: String,
    },

    /// O documento JSON do segredo não tem o campo pedido.
    #[error("secret '{reference}' has no field '{field}'")]
    FieldMissing { reference: String, field: String },
}

// ============================================================================
// CONTRATO DE PROVIDER
// ============================================================================

/// Opções repassadas ao resolver de um provider.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Pin de versão do segredo (quando o provider suporta).
    pub version: Option<String>,
    /// Campo a extrair de um documento JSON.
    pub field: Option<String>,
}

impl ResolveOptions {
    fn from_ref(secret: &SecretRef) -> Self {
        Self {
            version: secret.version.clone(),
            field: secret.field.clone(),
        }
    }
}

/// Um resolver opaco: `resolve(ref, {version?, field?}) → string`.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    async fn resolve(
        &self,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<String, SecretResolutionError>;

    /// Sonda opcional chamada uma vez, durante o registro.
    async fn validate(&self) -> Result<(), SecretResolutionError> {
        Ok(())
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Mapa nome → provider, montado na inicialização.
pub struct SecretRegistry {
    providers: HashMap<String, Arc<dyn SecretProvider>>,
}

/// Builder do registry. O `register` roda a sonda `validate()` do
/// provider; um provider que não valida não entra no mapa.
#[derive(Default)]
pub struct SecretRegistryBuilder {
    providers: HashMap<String, Arc<dyn SecretProvider>>,
}

impl std::fmt::Debug for SecretRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRegistryBuilder")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretRegistryBuilder {
    pub async fn register(
        mut self,
        name: &str,
        provider: Arc<dyn SecretProvider>,
    ) -> Result<Self, SecretResolutionError> {
        provider.validate().await?;
        debug!(provider = name, "secret provider registered");
        self.providers.insert(name.to_string(), provider);
        Ok(self)
    }

    pub fn build(self) -> SecretRegistry {
        SecretRegistry {
            providers: self.providers,
        }
    }
}

impl SecretRegistry {
    pub fn builder() -> SecretRegistryBuilder {
        SecretRegistryBuilder::default()
    }

    /// Registry vazio: toda folha `{$secret}` falha como provider
    /// desconhecido. Útil em testes e em planos sem segredos.
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry padrão de processo: apenas o provider `env`.
    pub fn with_env() -> Self {
        let mut providers: HashMap<String, Arc<dyn SecretProvider>> = HashMap::new();
        providers.insert("env".to_string(), Arc::new(EnvProvider));
        Self { providers }
    }

    /// Resolve uma referência de segredo.
    pub async fn resolve(&self, secret: &SecretRef) -> Result<String, SecretResolutionError> {
        let provider = self.providers.get(&secret.provider).ok_or_else(|| {
            SecretResolutionError::UnknownProvider {
                provider: secret.provider.clone(),
                reference: secret.reference.clone(),
            }
        })?;

        provider
            .resolve(&secret.reference, &ResolveOptions::from_ref(secret))
            .await
    }
}

// ============================================================================
// SUBSTITUIÇÃO NO PLANO
// ============================================================================

/// Resolve todas as folhas `{$secret}` de um plano, devolvendo uma
/// cópia onde cada folha virou string pura.
///
/// A caminhada cobre, uniformemente: `base`, `path`, valores de
/// `headers` e a árvore inteira de `body`. Depois desta função nenhuma
/// folha com a forma `{$secret: …}` sobrevive no plano.
pub async fn resolve_plan(
    plan: &Plan,
    registry: &SecretRegistry,
) -> Result<Plan, SecretResolutionError> {
    let mut resolved = plan.clone();

    for node in &mut resolved.nodes {
        let Node::HttpRequest(http) = node else {
            continue;
        };

        http.base = resolve_leaf(&http.base, registry).await?;
        http.path = resolve_leaf(&http.path, registry).await?;

        if let Some(headers) = &mut http.headers {
            for leaf in headers.values_mut() {
                *leaf = resolve_leaf(leaf, registry).await?;
            }
        }

        if let Some(body) = &mut http.body {
            *body = resolve_value(body, registry).await?;
        }
    }

    Ok(resolved)
}

async fn resolve_leaf(
    leaf: &StringValue,
    registry: &SecretRegistry,
) -> Result<StringValue, SecretResolutionError> {
    match leaf {
        StringValue::Secret { secret } => {
            Ok(StringValue::literal(registry.resolve(secret).await?))
        }
        other => Ok(other.clone()),
    }
}

/// Caminhada recursiva sobre uma árvore JSON substituindo objetos
/// `{"$secret": …}` pelo valor resolvido.
///
/// Recursão em `async fn` exige o box do future (tamanho conhecido).
fn resolve_value<'a>(
    value: &'a Value,
    registry: &'a SecretRegistry,
) -> std::pin::Pin<
    Box<dyn std::future::Future<Output = Result<Value, SecretResolutionError>> + Send + 'a>,
> {
    Box::pin(async move {
        if let Some(secret) = as_secret_leaf(value) {
            return Ok(Value::String(registry.resolve(&secret).await?));
        }

        match value {
            Value::Array(items) => {
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    result.push(resolve_value(item, registry).await?);
                }
                Ok(Value::Array(result))
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), resolve_value(v, registry).await?);
                }
                Ok(Value::Object(out))
            }
            primitive => Ok(primitive.clone()),
        }
    })
}

fn as_secret_leaf(value: &Value) -> Option<SecretRef> {
    let map = value.as_object()?;
    if map.len() != 1 {
        return None;
    }
    serde_json::from_value(map.get("$secret")?.clone()).ok()
}

/// `true` se alguma folha `{$secret}` existe no plano (headers, body,
/// base ou path). O motor usa isto para pular a resolução quando o
/// plano não tem segredos.
pub fn has_secret_leaves(plan: &Plan) -> bool {
    plan.nodes.iter().any(|node| {
        let Node::HttpRequest(http) = node else {
            return false;
        };
        let leaf_is_secret = |leaf: &StringValue| matches!(leaf, StringValue::Secret { .. });

        leaf_is_secret(&http.base)
            || leaf_is_secret(&http.path)
            || http
                .headers
                .as_ref()
                .is_some_and(|headers| headers.values().any(leaf_is_secret))
            || http.body.as_ref().is_some_and(value_has_secret)
    })
}

fn value_has_secret(value: &Value) -> bool {
    if as_secret_leaf(value).is_some() {
        return true;
    }
    match value {
        Value::Array(items) => items.iter().any(value_has_secret),
        Value::Object(map) => map.values().any(value_has_secret),
        _ => false,
    }
}

// ============================================================================
// PROVIDER ENV
// ============================================================================

/// Provider `env`: lê variáveis de ambiente do processo.
///
/// `version` não se aplica e é ignorado; `field` extrai um campo quando
/// o valor da variável é um documento JSON.
pub struct EnvProvider;

#[async_trait]
impl SecretProvider for EnvProvider {
    async fn resolve(
        &self,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<String, SecretResolutionError> {
        let raw = std::env::var(reference).map_err(|_| {
            SecretResolutionError::ResolutionFailed {
                provider: "env".to_string(),
                reference: reference.to_string(),
                cause: "environment variable not set".to_string(),
            }
        })?;

        match &options.field {
            Some(field) => extract_field(&raw, field, reference),
            None => Ok(raw),
        }
    }
}

/// Extrai `field` de um documento JSON serializado.
pub(crate) fn extract_field(
    raw: &str,
    field: &str,
    reference: &str,
) -> Result<String, SecretResolutionError> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| SecretResolutionError::ResolutionFailed {
            provider: "json".to_string(),
            reference: reference.to_string(),
            cause: format!("secret is not a JSON document: {e}"),
        })?;

    match document.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(SecretResolutionError::FieldMissing {
            reference: reference.to_string(),
            field: field.to_string(),
        }),
    }
}
