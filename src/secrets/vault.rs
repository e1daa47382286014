//! Provider `vault`: HashiCorp Vault via HTTP.
//!
//! A resolução é um GET em `{addr}/v1/{ref}` com o header
//! `X-Vault-Token`. O corpo de resposta cobre os dois layouts de KV:
//! v2 (`data.data`) e v1 (`data`). O campo extraído é `field`, ou
//! `"value"` quando ausente. Um pin de `version` vira query string
//! (`?version=N`, KV v2).
//!
//! A sonda `validate()` faz o token lookup
//! (`/v1/auth/token/lookup-self`) durante o registro: um token inválido
//! impede o provider de entrar no registry, em vez de falhar runs mais
//! tarde.

use async_trait::async_trait;
use serde_json::Value;

use super::{ResolveOptions, SecretProvider, SecretResolutionError};

/// Campo padrão quando a referência não pede um `field` explícito.
const DEFAULT_FIELD: &str = "value";

pub struct VaultProvider {
    address: String,
    token: String,
    client: reqwest::Client,
}

impl VaultProvider {
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Monta a URL do segredo preservando as barras do caminho e
    /// escapando cada segmento individualmente.
    fn secret_url(&self, reference: &str, version: Option<&str>) -> String {
        let encoded: Vec<String> = reference
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let mut url = format!(
            "{}/v1/{}",
            self.address.trim_end_matches('/'),
            encoded.join("/")
        );
        if let Some(version) = version {
            url.push_str(&format!("?version={}", urlencoding::encode(version)));
        }
        url
    }

    fn failed(&self, reference: &str, cause: impl Into<String>) -> SecretResolutionError {
        SecretResolutionError::ResolutionFailed {
            provider: "vault".to_string(),
            reference: reference.to_string(),
            cause: cause.into(),
        }
    }
}

#[async_trait]
impl SecretProvider for VaultProvider {
    async fn resolve(
        &self,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<String, SecretResolutionError> {
        let url = self.secret_url(reference, options.version.as_deref());

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| self.failed(reference, e.to_string()))?;

        if !response.status().is_success() {
            return Err(self.failed(
                reference,
                format!("vault returned status {}", response.status().as_u16()),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| self.failed(reference, format!("invalid vault response: {e}")))?;

        // KV v2 aninha o documento em data.data; KV v1 usa data direto.
        let document = body
            .pointer("/data/data")
            .or_else(|| body.pointer("/data"))
            .ok_or_else(|| self.failed(reference, "response has no data envelope"))?;

        let field = options.field.as_deref().unwrap_or(DEFAULT_FIELD);
        match document.get(field) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(SecretResolutionError::FieldMissing {
                reference: reference.to_string(),
                field: field.to_string(),
            }),
        }
    }

    /// Token lookup: garante que o token é utilizável antes do registro.
    async fn validate(&self) -> Result<(), SecretResolutionError> {
        let url = format!(
            "{}/v1/auth/token/lookup-self",
            self.address.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| self.failed("auth/token/lookup-self", e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.failed(
                "auth/token/lookup-self",
                format!("token lookup failed with status {}", response.status().as_u16()),
            ))
        }
    }
}
