//! # Módulo de Validação de Planos
//!
//! Valida a boa-formação do grafo de um plano antes da execução.
//!
//! ## Por que validar?
//!
//! O schema de fio permite arestas arbitrárias: nada impede a DSL de
//! autoria (ou um cliente malicioso do hub) de serializar um ciclo, uma
//! aresta para um nó inexistente, ou uma aresta entrando em `__START__`.
//! O motor confia na validação para poder atravessar o grafo sem
//! verificações defensivas em cada passo.
//!
//! ## Regras de boa-formação (com as sentinelas adicionadas):
//!
//! 1. IDs de nós são únicos dentro do plano e não usam nomes reservados
//! 2. Todo endpoint de aresta é um ID de nó ou uma sentinela
//! 3. `__START__` não tem arestas de entrada; `__END__` não tem de saída
//! 4. O grafo é acíclico
//! 5. `frequency.every ≥ 1` quando a cadência está presente
//! 6. Nenhuma folha `{$variable}` sobrevive até a execução (variáveis
//!    são resolvidas no lado da CLI, antes da persistência)
//!
//! Todos os erros são coletados (não paramos no primeiro), no estilo
//! "reporte tudo de uma vez" que a CLI espera.

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::protocol::{
    Edge, Node, Plan, StringValue, END_NODE, SECRETS_NODE, START_NODE,
};

// ============================================================================
// TIPOS DE ERRO
// ============================================================================

/// Erros de boa-formação de um plano.
///
/// Recuperáveis na borda da API (400); fatais durante a execução.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// ID de nó vazio ou só espaços.
    #[error("nó com ID vazio não é permitido")]
    EmptyNodeId,

    /// Dois nós com o mesmo ID.
    #[error("nó '{node_id}': ID duplicado no plano")]
    DuplicateNodeId { node_id: String },

    /// Nó usando um nome reservado das sentinelas.
    #[error("nó '{node_id}': nome reservado para sentinelas do grafo")]
    ReservedNodeId { node_id: String },

    /// Aresta referencia um endpoint que não é nó nem sentinela.
    #[error("aresta '{edge_source}' → '{target}': endpoint '{endpoint}' não existe no plano")]
    UnknownEdgeEndpoint {
        edge_source: String,
        target: String,
        endpoint: String,
    },

    /// Aresta entrando na sentinela de início.
    #[error("aresta '{edge_source}' → '__START__': a sentinela de início não aceita entradas")]
    EdgeIntoStart { edge_source: String },

    /// Aresta saindo da sentinela de fim.
    #[error("aresta '__END__' → '{target}': a sentinela de fim não tem saídas")]
    EdgeOutOfEnd { target: String },

    /// Ciclo detectado no grafo.
    #[error("nó '{node_id}': ciclo detectado no grafo")]
    CycleDetected { node_id: String },

    /// Cadência com multiplicador zero.
    #[error("frequency.every deve ser ≥ 1 (recebido {every})")]
    InvalidFrequency { every: u32 },

    /// Folha `{$variable}` não resolvida chegou à validação de execução.
    #[error("nó '{node_id}': variável '{key}' não foi resolvida antes da execução")]
    UnresolvedVariable { node_id: String, key: String },
}

/// Resultado da validação: `Ok(())` ou a lista completa de problemas.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

// ============================================================================
// FUNÇÃO PRINCIPAL
// ============================================================================

/// Valida um plano completo, coletando todos os erros encontrados.
pub fn validate_plan(plan: &Plan) -> ValidationResult {
    let mut errors = Vec::new();

    if let Some(frequency) = &plan.frequency {
        if frequency.every == 0 {
            errors.push(ValidationError::InvalidFrequency { every: 0 });
        }
    }

    // IDs únicos e não reservados.
    let mut seen: HashSet<&str> = HashSet::new();
    for node in &plan.nodes {
        let id = node.id();
        if id.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeId);
            continue;
        }
        if id == START_NODE || id == END_NODE || id == SECRETS_NODE {
            errors.push(ValidationError::ReservedNodeId {
                node_id: id.to_string(),
            });
        }
        if !seen.insert(id) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: id.to_string(),
            });
        }
    }

    // Endpoints de aresta e regras das sentinelas.
    for edge in &plan.edges {
        for endpoint in [edge.source.as_str(), edge.target.as_str()] {
            let is_sentinel = endpoint == START_NODE || endpoint == END_NODE;
            if !is_sentinel && !seen.contains(endpoint) {
                errors.push(ValidationError::UnknownEdgeEndpoint {
                    edge_source: edge.source.clone(),
                    target: edge.target.clone(),
                    endpoint: endpoint.to_string(),
                });
            }
        }
        if edge.target == START_NODE {
            errors.push(ValidationError::EdgeIntoStart {
                edge_source: edge.source.clone(),
            });
        }
        if edge.source == END_NODE {
            errors.push(ValidationError::EdgeOutOfEnd {
                target: edge.target.clone(),
            });
        }
    }

    // Ciclos (só faz sentido com endpoints coerentes).
    if errors.is_empty() {
        detect_cycles(&plan.edges, &mut errors);
    }

    // Variáveis não resolvidas.
    for node in &plan.nodes {
        collect_unresolved_variables(node, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

// ============================================================================
// DETECÇÃO DE CICLOS
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// DFS de três cores sobre a adjacência das arestas.
///
/// Um back-edge (aresta para um nó ainda InProgress) denuncia um ciclo.
/// Percorremos a partir de todos os vértices, não apenas de `__START__`,
/// para também rejeitar ciclos em componentes inalcançáveis.
fn detect_cycles(edges: &[Edge], errors: &mut Vec<ValidationError>) {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let vertices: Vec<&str> = adjacency.keys().copied().collect();

    for vertex in vertices {
        if matches!(
            marks.get(vertex).copied().unwrap_or(Mark::Unvisited),
            Mark::Unvisited
        ) {
            visit(vertex, &adjacency, &mut marks, errors);
        }
    }
}

fn visit<'a>(
    vertex: &'a str,
    adjacency: &HashMap<&'a str, Vec<&'a str>>,
    marks: &mut HashMap<&'a str, Mark>,
    errors: &mut Vec<ValidationError>,
) {
    marks.insert(vertex, Mark::InProgress);

    if let Some(successors) = adjacency.get(vertex) {
        for &successor in successors {
            match marks.get(successor).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => {
                    errors.push(ValidationError::CycleDetected {
                        node_id: successor.to_string(),
                    });
                }
                Mark::Unvisited => visit(successor, adjacency, marks, errors),
                Mark::Done => {}
            }
        }
    }

    marks.insert(vertex, Mark::Done);
}

// ============================================================================
// VARIÁVEIS NÃO RESOLVIDAS
// ============================================================================

fn collect_unresolved_variables(node: &Node, errors: &mut Vec<ValidationError>) {
    let Node::HttpRequest(http) = node else {
        return;
    };

    let mut check_leaf = |leaf: &StringValue| {
        if let StringValue::Variable { variable } = leaf {
            errors.push(ValidationError::UnresolvedVariable {
                node_id: http.id.clone(),
                key: variable.key.clone(),
            });
        }
    };

    check_leaf(&http.base);
    check_leaf(&http.path);
    if let Some(headers) = &http.headers {
        for leaf in headers.values() {
            check_leaf(leaf);
        }
    }
    if let Some(body) = &http.body {
        for variable in crate::variables::variable_leaves(body) {
            errors.push(ValidationError::UnresolvedVariable {
                node_id: http.id.clone(),
                key: variable,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan_from(value: serde_json::Value) -> Plan {
        serde_json::from_value(value).unwrap()
    }

    fn linear_plan() -> Plan {
        plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "HttpRequest", "id": "a", "method": "GET",
                  "base": { "$literal": "https://x" }, "path": { "$literal": "/a" } },
                { "type": "Wait", "id": "b", "duration_ms": 10 }
            ],
            "edges": [
                { "source": "__START__", "target": "a" },
                { "source": "a", "target": "b" },
                { "source": "b", "target": "__END__" }
            ]
        }))
    }

    #[test]
    fn test_valid_plan_passes() {
        assert!(validate_plan(&linear_plan()).is_ok());
    }

    #[test]
    fn test_empty_plan_is_valid() {
        // __START__ → __END__ apenas: no-op bem-sucedido, não um erro.
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [],
            "edges": [{ "source": "__START__", "target": "__END__" }]
        }));
        assert!(validate_plan(&plan).is_ok());
    }

    #[test]
    fn test_duplicate_node_id() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "Wait", "id": "a", "duration_ms": 1 },
                { "type": "Wait", "id": "a", "duration_ms": 2 }
            ],
            "edges": []
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateNodeId { node_id } if node_id == "a")));
    }

    #[test]
    fn test_unknown_edge_endpoint() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [{ "type": "Wait", "id": "a", "duration_ms": 1 }],
            "edges": [{ "source": "__START__", "target": "ghost" }]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::UnknownEdgeEndpoint { endpoint, .. } if endpoint == "ghost"
        )));
    }

    #[test]
    fn test_edge_into_start_rejected() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [{ "type": "Wait", "id": "a", "duration_ms": 1 }],
            "edges": [{ "source": "a", "target": "__START__" }]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::EdgeIntoStart { .. })));
    }

    #[test]
    fn test_edge_out_of_end_rejected() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [{ "type": "Wait", "id": "a", "duration_ms": 1 }],
            "edges": [{ "source": "__END__", "target": "a" }]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::EdgeOutOfEnd { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "Wait", "id": "a", "duration_ms": 1 },
                { "type": "Wait", "id": "b", "duration_ms": 1 }
            ],
            "edges": [
                { "source": "__START__", "target": "a" },
                { "source": "a", "target": "b" },
                { "source": "b", "target": "a" }
            ]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected { .. })));
    }

    #[test]
    fn test_unreachable_cycle_also_rejected() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "Wait", "id": "a", "duration_ms": 1 },
                { "type": "Wait", "id": "x", "duration_ms": 1 },
                { "type": "Wait", "id": "y", "duration_ms": 1 }
            ],
            "edges": [
                { "source": "__START__", "target": "a" },
                { "source": "a", "target": "__END__" },
                { "source": "x", "target": "y" },
                { "source": "y", "target": "x" }
            ]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected { .. })));
    }

    #[test]
    fn test_self_edge_is_a_cycle() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [{ "type": "Wait", "id": "a", "duration_ms": 1 }],
            "edges": [{ "source": "a", "target": "a" }]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::CycleDetected { node_id } if node_id == "a")));
    }

    #[test]
    fn test_zero_frequency_rejected() {
        let mut plan = linear_plan();
        plan.frequency = Some(crate::protocol::Frequency {
            every: 0,
            unit: crate::protocol::FrequencyUnit::Minute,
        });
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidFrequency { .. })));
    }

    #[test]
    fn test_unresolved_variable_rejected() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "HttpRequest", "id": "a", "method": "GET",
                  "base": { "$variable": { "key": "base_url" } },
                  "path": { "$literal": "/a" } }
            ],
            "edges": [
                { "source": "__START__", "target": "a" },
                { "source": "a", "target": "__END__" }
            ]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::UnresolvedVariable { key, .. } if key == "base_url"
        )));
    }

    #[test]
    fn test_errors_are_collected_not_short_circuited() {
        let plan = plan_from(json!({
            "id": "p1", "name": "n", "project": "proj", "environment": "dev",
            "nodes": [
                { "type": "Wait", "id": "a", "duration_ms": 1 },
                { "type": "Wait", "id": "a", "duration_ms": 1 }
            ],
            "edges": [
                { "source": "__START__", "target": "ghost" },
                { "source": "a", "target": "__START__" }
            ]
        }));
        let errors = validate_plan(&plan).unwrap_err();
        assert!(errors.len() >= 3);
    }
}
