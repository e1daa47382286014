//! # Módulo de Limites de Execução
//!
//! Proteções contra planos desproporcionais: a DSL de autoria é entrada
//! não confiável, e nada impede um plano serializado de declarar
//! milhares de nós ou esperas de horas. Os limites valem tanto na CLI
//! (`execute`) quanto nos workers.
//!
//! | Limite            | Padrão | Variável de ambiente       |
//! |-------------------|--------|----------------------------|
//! | max_nodes         | 100    | `GRIFFIN_MAX_NODES`        |
//! | max_plan_secs     | 300    | `GRIFFIN_MAX_PLAN_SECS`    |
//! | http_timeout_secs | 30     | `GRIFFIN_HTTP_TIMEOUT_SECS`|
//! | worker_slots      | 1      | `GRIFFIN_WORKER_SLOTS`     |

use std::time::Duration;
use thiserror::Error;

use crate::protocol::Plan;

/// Máximo de nós por plano.
pub const DEFAULT_MAX_NODES: usize = 100;

/// Timeout padrão da execução inteira, em segundos.
pub const DEFAULT_MAX_PLAN_SECS: u64 = 300;

/// Timeout HTTP padrão por requisição, em segundos.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Execuções simultâneas em voo por worker.
pub const DEFAULT_WORKER_SLOTS: usize = 1;

#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Planos maiores que isto são rejeitados antes de executar.
    pub max_nodes: usize,

    /// Timeout da execução inteira; estourar equivale a cancelamento.
    pub max_plan_duration: Duration,

    /// Timeout por requisição HTTP.
    pub http_timeout: Duration,

    /// Teto de execuções em voo por worker (o padrão mantém uma por
    /// vez; locations com muitos planos podem subir via ambiente).
    pub worker_slots: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_nodes: DEFAULT_MAX_NODES,
            max_plan_duration: Duration::from_secs(DEFAULT_MAX_PLAN_SECS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            worker_slots: DEFAULT_WORKER_SLOTS,
        }
    }
}

impl ExecutionLimits {
    /// Limites a partir das variáveis de ambiente (valores inválidos
    /// caem no padrão).
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(value) = std::env::var("GRIFFIN_MAX_NODES") {
            if let Ok(n) = value.parse() {
                limits.max_nodes = n;
            }
        }
        if let Ok(value) = std::env::var("GRIFFIN_MAX_PLAN_SECS") {
            if let Ok(secs) = value.parse() {
                limits.max_plan_duration = Duration::from_secs(secs);
            }
        }
        if let Ok(value) = std::env::var("GRIFFIN_HTTP_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse() {
                limits.http_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(value) = std::env::var("GRIFFIN_WORKER_SLOTS") {
            if let Ok(slots) = value.parse::<usize>() {
                limits.worker_slots = slots.max(1);
            }
        }

        limits
    }

    /// Verifica um plano contra os limites estruturais.
    pub fn check(&self, plan: &Plan) -> Result<(), LimitViolation> {
        if plan.nodes.len() > self.max_nodes {
            return Err(LimitViolation::TooManyNodes {
                nodes: plan.nodes.len(),
                max: self.max_nodes,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LimitViolation {
    #[error("plano com {nodes} nós excede o limite de {max}")]
    TooManyNodes { nodes: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_nodes, 100);
        assert_eq!(limits.http_timeout, Duration::from_secs(30));
        assert_eq!(limits.max_plan_duration, Duration::from_secs(300));
        assert_eq!(limits.worker_slots, 1);
    }

    #[test]
    fn test_worker_slots_from_env() {
        std::env::set_var("GRIFFIN_WORKER_SLOTS", "4");
        assert_eq!(ExecutionLimits::from_env().worker_slots, 4);

        // Zero não desliga o worker: o mínimo é um slot.
        std::env::set_var("GRIFFIN_WORKER_SLOTS", "0");
        assert_eq!(ExecutionLimits::from_env().worker_slots, 1);
        std::env::remove_var("GRIFFIN_WORKER_SLOTS");
    }

    #[test]
    fn test_node_count_check() {
        let limits = ExecutionLimits {
            max_nodes: 1,
            ..Default::default()
        };

        let plan: Plan = serde_json::from_value(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "Wait", "id": "a", "duration_ms": 1 },
                { "type": "Wait", "id": "b", "duration_ms": 1 }
            ],
            "edges": []
        }))
        .unwrap();

        assert!(matches!(
            limits.check(&plan),
            Err(LimitViolation::TooManyNodes { nodes: 2, max: 1 })
        ));
    }
}
