//! Sink durável: lotes + adapter com retry limitado.
//!
//! O [`DurableSink`] acumula eventos e publica quando o lote alcança
//! `batch_size` **ou** quando `flush_interval` expira, o que vier
//! primeiro. A publicação passa pelo trait [`EventAdapter`]; uma falha
//! do adapter é retentada até `max_retries` vezes com atraso fixo e,
//! persistindo, o lote é descartado com log - nunca propagada à run.
//!
//! Dentro de um lote a ordem de `seq` é preservada: `emit` entrega por
//! um canal FIFO e a task de fundo drena na ordem de chegada.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use super::{EventSink, ExecutionEvent};

// ============================================================================
// ADAPTER
// ============================================================================

/// Destino durável de lotes de eventos.
#[async_trait]
pub trait EventAdapter: Send + Sync {
    async fn publish(&self, events: &[ExecutionEvent]) -> anyhow::Result<()>;
}

// ============================================================================
// CONFIGURAÇÃO
// ============================================================================

#[derive(Debug, Clone)]
pub struct DurableSinkConfig {
    /// Tamanho máximo de um lote.
    pub batch_size: usize,
    /// Intervalo máximo entre publicações com lote não vazio.
    pub flush_interval: Duration,
    /// Tentativas extras após a primeira falha de publicação.
    pub max_retries: u32,
    /// Atraso fixo entre tentativas.
    pub retry_delay: Duration,
}

impl Default for DurableSinkConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(1),
            max_retries: 3,
            retry_delay: Duration::from_millis(200),
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

enum Command {
    Event(Box<ExecutionEvent>),
    Flush(oneshot::Sender<()>),
}

/// Sink com task de fundo. Ver documentação do módulo.
pub struct DurableSink {
    sender: mpsc::UnboundedSender<Command>,
}

impl DurableSink {
    pub fn new(adapter: Arc<dyn EventAdapter>, config: DurableSinkConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(batch_loop(receiver, adapter, config));
        Self { sender }
    }
}

#[async_trait]
impl EventSink for DurableSink {
    fn emit(&self, event: ExecutionEvent) {
        // Canal sem limite: o envio nunca bloqueia. Falha só quando a
        // task de fundo morreu, e aí o evento é perdido com log.
        if self.sender.send(Command::Event(Box::new(event))).is_err() {
            error!("durable sink task is gone; event dropped");
        }
    }

    async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).is_err() {
            error!("durable sink task is gone; flush skipped");
            return;
        }
        let _ = done.await;
    }
}

async fn batch_loop(
    mut receiver: mpsc::UnboundedReceiver<Command>,
    adapter: Arc<dyn EventAdapter>,
    config: DurableSinkConfig,
) {
    let mut buffer: Vec<ExecutionEvent> = Vec::with_capacity(config.batch_size);
    let mut ticker = tokio::time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = receiver.recv() => {
                match command {
                    Some(Command::Event(event)) => {
                        buffer.push(*event);
                        if buffer.len() >= config.batch_size {
                            publish_with_retry(&adapter, &mut buffer, &config).await;
                        }
                    }
                    Some(Command::Flush(ack)) => {
                        publish_with_retry(&adapter, &mut buffer, &config).await;
                        let _ = ack.send(());
                    }
                    None => {
                        // Emissores foram dropados: drena e encerra.
                        publish_with_retry(&adapter, &mut buffer, &config).await;
                        return;
                    }
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    publish_with_retry(&adapter, &mut buffer, &config).await;
                }
            }
        }
    }
}

async fn publish_with_retry(
    adapter: &Arc<dyn EventAdapter>,
    buffer: &mut Vec<ExecutionEvent>,
    config: &DurableSinkConfig,
) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);

    let mut attempt = 0u32;
    loop {
        match adapter.publish(&batch).await {
            Ok(()) => {
                debug!(batch_len = batch.len(), "event batch published");
                return;
            }
            Err(e) if attempt < config.max_retries => {
                attempt += 1;
                warn!(
                    error = %e,
                    attempt,
                    max_retries = config.max_retries,
                    "event batch publish failed, retrying"
                );
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    batch_len = batch.len(),
                    "event batch dropped after retries"
                );
                return;
            }
        }
    }
}

// ============================================================================
// ADAPTERS
// ============================================================================

/// Adapter em memória, para testes e inspeção.
#[derive(Default)]
pub struct InMemoryAdapter {
    batches: std::sync::Mutex<Vec<Vec<ExecutionEvent>>>,
    /// Quantas publicações iniciais devem falhar (injeção de falha).
    fail_first: std::sync::atomic::AtomicU32,
}

impl InMemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(times: u32) -> Self {
        let adapter = Self::default();
        adapter
            .fail_first
            .store(times, std::sync::atomic::Ordering::SeqCst);
        adapter
    }

    pub fn batches(&self) -> Vec<Vec<ExecutionEvent>> {
        self.batches.lock().expect("in-memory adapter lock").clone()
    }

    /// Todos os eventos publicados, achatados na ordem.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl EventAdapter for InMemoryAdapter {
    async fn publish(&self, events: &[ExecutionEvent]) -> anyhow::Result<()> {
        use std::sync::atomic::Ordering;
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("injected publish failure ({remaining} left)");
        }
        self.batches
            .lock()
            .expect("in-memory adapter lock")
            .push(events.to_vec());
        Ok(())
    }
}

/// Adapter estilo Kinesis: particiona por `executionId` e publica cada
/// partição como um registro JSON em um endpoint HTTP.
pub struct StreamAdapter {
    endpoint: String,
    client: reqwest::Client,
}

impl StreamAdapter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EventAdapter for StreamAdapter {
    async fn publish(&self, events: &[ExecutionEvent]) -> anyhow::Result<()> {
        use std::collections::BTreeMap;

        // Partição por execução: eventos da mesma execução viajam
        // juntos e em ordem de seq.
        let mut partitions: BTreeMap<&str, Vec<&ExecutionEvent>> = BTreeMap::new();
        for event in events {
            partitions
                .entry(event.envelope.execution_id.as_str())
                .or_default()
                .push(event);
        }

        for (partition_key, records) in partitions {
            let payload = serde_json::json!({
                "partitionKey": partition_key,
                "records": records,
            });
            let response = self
                .client
                .post(&self.endpoint)
                .json(&payload)
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!(
                    "stream endpoint returned status {}",
                    response.status().as_u16()
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventEmitter, EventKind};

    fn emitter(sink: Arc<dyn EventSink>) -> EventEmitter {
        EventEmitter::new("p1", "e1", "org", Some(sink))
    }

    fn plan_end() -> EventKind {
        EventKind::PlanEnd {
            success: true,
            errors: vec![],
            total_duration_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_batch_published_when_size_reached() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 3,
                flush_interval: Duration::from_secs(60),
                ..Default::default()
            },
        ));

        let emitter = emitter(sink.clone());
        for _ in 0..3 {
            emitter.emit(plan_end());
        }
        // Dá tempo para a task de fundo processar o lote cheio.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let batches = adapter.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_interval_flushes_partial_batch() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 100,
                flush_interval: Duration::from_millis(50),
                ..Default::default()
            },
        ));

        emitter(sink.clone()).emit(plan_end());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(adapter.events().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_drains_pending_events() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 100,
                flush_interval: Duration::from_secs(60),
                ..Default::default()
            },
        ));

        let emitter = emitter(sink.clone());
        emitter.emit(plan_end());
        emitter.emit(plan_end());
        emitter.flush().await;

        assert_eq!(adapter.events().len(), 2);
    }

    #[tokio::test]
    async fn test_seq_order_preserved_within_batches() {
        let adapter = Arc::new(InMemoryAdapter::new());
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 4,
                flush_interval: Duration::from_secs(60),
                ..Default::default()
            },
        ));

        let emitter = emitter(sink.clone());
        for _ in 0..10 {
            emitter.emit(plan_end());
        }
        emitter.flush().await;

        let seqs: Vec<u64> = adapter.events().iter().map(|e| e.envelope.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_publish_retries_then_succeeds() {
        let adapter = Arc::new(InMemoryAdapter::failing_first(2));
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 1,
                flush_interval: Duration::from_secs(60),
                max_retries: 3,
                retry_delay: Duration::from_millis(10),
            },
        ));

        emitter(sink.clone()).emit(plan_end());
        sink.flush().await;

        assert_eq!(adapter.events().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_dropped_after_max_retries() {
        let adapter = Arc::new(InMemoryAdapter::failing_first(10));
        let sink = Arc::new(DurableSink::new(
            adapter.clone(),
            DurableSinkConfig {
                batch_size: 1,
                flush_interval: Duration::from_secs(60),
                max_retries: 2,
                retry_delay: Duration::from_millis(5),
            },
        ));

        emitter(sink.clone()).emit(plan_end());
        sink.flush().await;

        // 1ª tentativa + 2 retries falharam: lote descartado.
        assert!(adapter.events().is_empty());
    }

    #[tokio::test]
    async fn test_stream_adapter_partitions_by_execution() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2) // duas execuções → duas partições
            .mount(&server)
            .await;

        let adapter = StreamAdapter::new(server.uri());

        let mut events = Vec::new();
        for execution_id in ["e1", "e2"] {
            events.push(ExecutionEvent {
                envelope: crate::events::EventEnvelope {
                    event_id: uuid::Uuid::new_v4(),
                    seq: 0,
                    timestamp: 0,
                    plan_id: "p1".to_string(),
                    execution_id: execution_id.to_string(),
                    organization_id: "org".to_string(),
                },
                kind: plan_end(),
            });
        }

        adapter.publish(&events).await.unwrap();
    }
}
