//! Provider `aws`: Secrets Manager.
//!
//! O provider fala com um cliente Secrets Manager através do trait
//! [`SecretsManagerClient`], injetado na construção. A costura existe
//! pela mesma razão do trait `HttpClient` do motor: o binding concreto
//! (SDK, assinatura de requisições, credenciais) pertence à camada de
//! implantação, e os testes usam um cliente em memória.
//!
//! Suporta pin de `version` e extração de `field` quando o segredo é um
//! documento JSON (`SecretString`) - o caso comum de credenciais
//! `{"username": …, "password": …}`. Segredos binários chegam em base64
//! e são decodificados para UTF-8.

use async_trait::async_trait;
use base64::Engine;

use super::{extract_field, ResolveOptions, SecretProvider, SecretResolutionError};

/// Payload devolvido pelo Secrets Manager: string ou binário (base64).
#[derive(Debug, Clone, Default)]
pub struct SecretPayload {
    pub secret_string: Option<String>,
    pub secret_binary_b64: Option<String>,
}

/// Cliente mínimo do Secrets Manager.
#[async_trait]
pub trait SecretsManagerClient: Send + Sync {
    async fn get_secret_value(
        &self,
        secret_id: &str,
        version: Option<&str>,
    ) -> Result<SecretPayload, String>;
}

/// Provider registrado sob o nome `aws`.
pub struct AwsSecretsProvider {
    client: Box<dyn SecretsManagerClient>,
}

impl AwsSecretsProvider {
    pub fn new(client: Box<dyn SecretsManagerClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretProvider for AwsSecretsProvider {
    async fn resolve(
        &self,
        reference: &str,
        options: &ResolveOptions,
    ) -> Result<String, SecretResolutionError> {
        let payload = self
            .client
            .get_secret_value(reference, options.version.as_deref())
            .await
            .map_err(|cause| SecretResolutionError::ResolutionFailed {
                provider: "aws".to_string(),
                reference: reference.to_string(),
                cause,
            })?;

        let raw = match (payload.secret_string, payload.secret_binary_b64) {
            (Some(s), _) => s,
            (None, Some(b64)) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| SecretResolutionError::ResolutionFailed {
                        provider: "aws".to_string(),
                        reference: reference.to_string(),
                        cause: format!("invalid base64 secret binary: {e}"),
                    })?;
                String::from_utf8(bytes).map_err(|_| {
                    SecretResolutionError::ResolutionFailed {
                        provider: "aws".to_string(),
                        reference: reference.to_string(),
                        cause: "secret binary is not valid UTF-8".to_string(),
                    }
                })?
            }
            (None, None) => {
                return Err(SecretResolutionError::ResolutionFailed {
                    provider: "aws".to_string(),
                    reference: reference.to_string(),
                    cause: "secret has neither string nor binary payload".to_string(),
                })
            }
        };

        match &options.field {
            Some(field) => extract_field(&raw, field, reference),
            None => Ok(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Cliente em memória: (secret_id, version?) → payload.
    #[derive(Default)]
    struct FakeSecretsManager {
        secrets: Mutex<HashMap<(String, Option<String>), SecretPayload>>,
    }

    impl FakeSecretsManager {
        fn with(self, id: &str, version: Option<&str>, payload: SecretPayload) -> Self {
            self.secrets.lock().unwrap().insert(
                (id.to_string(), version.map(String::from)),
                payload,
            );
            self
        }
    }

    #[async_trait]
    impl SecretsManagerClient for FakeSecretsManager {
        async fn get_secret_value(
            &self,
            secret_id: &str,
            version: Option<&str>,
        ) -> Result<SecretPayload, String> {
            self.secrets
                .lock()
                .unwrap()
                .get(&(secret_id.to_string(), version.map(String::from)))
                .cloned()
                .ok_or_else(|| format!("ResourceNotFoundException: {secret_id}"))
        }
    }

    fn string_payload(value: &str) -> SecretPayload {
        SecretPayload {
            secret_string: Some(value.to_string()),
            secret_binary_b64: None,
        }
    }

    #[tokio::test]
    async fn test_resolves_secret_string() {
        let client = FakeSecretsManager::default().with(
            "prod/db",
            None,
            string_payload("hunter2"),
        );
        let provider = AwsSecretsProvider::new(Box::new(client));

        let value = provider
            .resolve("prod/db", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "hunter2");
    }

    #[tokio::test]
    async fn test_version_pin_is_forwarded() {
        let client = FakeSecretsManager::default()
            .with("prod/db", None, string_payload("current"))
            .with("prod/db", Some("v1"), string_payload("pinned"));
        let provider = AwsSecretsProvider::new(Box::new(client));

        let options = ResolveOptions {
            version: Some("v1".to_string()),
            field: None,
        };
        assert_eq!(provider.resolve("prod/db", &options).await.unwrap(), "pinned");
    }

    #[tokio::test]
    async fn test_field_extraction_from_json_document() {
        let client = FakeSecretsManager::default().with(
            "prod/db",
            None,
            string_payload("{\"username\":\"svc\",\"password\":\"pw\"}"),
        );
        let provider = AwsSecretsProvider::new(Box::new(client));

        let options = ResolveOptions {
            version: None,
            field: Some("password".to_string()),
        };
        assert_eq!(provider.resolve("prod/db", &options).await.unwrap(), "pw");
    }

    #[tokio::test]
    async fn test_binary_secret_is_base64_decoded() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("raw-bytes");
        let client = FakeSecretsManager::default().with(
            "prod/blob",
            None,
            SecretPayload {
                secret_string: None,
                secret_binary_b64: Some(encoded),
            },
        );
        let provider = AwsSecretsProvider::new(Box::new(client));

        let value = provider
            .resolve("prod/blob", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(value, "raw-bytes");
    }

    #[tokio::test]
    async fn test_missing_secret_maps_to_resolution_failed() {
        let provider = AwsSecretsProvider::new(Box::new(FakeSecretsManager::default()));
        let err = provider
            .resolve("ghost", &ResolveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SecretResolutionError::ResolutionFailed { provider, .. } if provider == "aws"
        ));
    }
}
