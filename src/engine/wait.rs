//! Execução de nós Wait.
//!
//! A pausa usa o sleep assíncrono do Tokio (não ocupa a thread) e
//! nunca é encurtada; o cancelamento da execução pode abortá-la, mas
//! isso é tratado pelo motor, que envolve cada nó no token de
//! cancelamento.

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::info;

use crate::events::{EventEmitter, EventKind};
use crate::protocol::{NodeResult, WaitNode};

/// Executa um nó Wait. Sempre passa; a duração real reportada pode ser
/// ligeiramente maior que a pedida (overhead do runtime).
pub async fn execute(node: &WaitNode, emitter: &EventEmitter) -> NodeResult {
    let start = Instant::now();

    emitter.emit(EventKind::WaitStart {
        node_id: node.id.clone(),
        duration_ms: node.duration_ms,
    });

    info!(node_id = %node.id, duration_ms = node.duration_ms, "waiting");
    sleep(Duration::from_millis(node.duration_ms)).await;

    NodeResult {
        node_id: node.id.clone(),
        success: true,
        response: None,
        headers: None,
        status: None,
        error: None,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventEmitter, LocalSink};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_sleeps_at_least_requested_duration() {
        let sink = Arc::new(LocalSink::new());
        let emitter = EventEmitter::new("p1", "e1", "org", Some(sink.clone()));
        let node = WaitNode {
            id: "pause".to_string(),
            duration_ms: 100,
        };

        let result = execute(&node, &emitter).await;

        assert!(result.success);
        assert!(result.duration_ms >= 100);
        assert!(result.duration_ms < 500); // mas não muito mais

        let events = sink.events();
        assert_eq!(events.len(), 1);
        match &events[0].kind {
            EventKind::WaitStart { duration_ms, .. } => assert_eq!(*duration_ms, 100),
            other => panic!("expected WAIT_START, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_duration_wait_is_valid() {
        let emitter = EventEmitter::new("p1", "e1", "org", None);
        let node = WaitNode {
            id: "noop".to_string(),
            duration_ms: 0,
        };
        let result = execute(&node, &emitter).await;
        assert!(result.success);
    }
}
