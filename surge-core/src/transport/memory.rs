//! In-process broker: producers publish to an outbound queue, a responder turns
//! outbound envelopes into inbound messages for the scenario's consumer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{MessageConsumer, MessageProducer, ProducerFactory, TransportError};

/// A message as a producer sent it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel: String,
    pub payload: Bytes,
    pub headers: Vec<(String, String)>,
}

impl Envelope {
    pub fn payload_utf8(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or_default()
    }
}

#[derive(Debug)]
struct Shared {
    outbound_tx: mpsc::UnboundedSender<Envelope>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    inbound_tx: mpsc::UnboundedSender<Bytes>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    opened: AtomicU64,
    closed: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                outbound_tx,
                outbound_rx: Mutex::new(Some(outbound_rx)),
                inbound_tx,
                inbound_rx: Mutex::new(Some(inbound_rx)),
                opened: AtomicU64::new(0),
                closed: AtomicU64::new(0),
            }),
        }
    }

    pub fn producers(&self) -> Arc<dyn ProducerFactory> {
        Arc::new(MemoryProducerFactory {
            shared: self.shared.clone(),
        })
    }

    /// The inbound stream. Only the first call gets it.
    pub fn consumer(&self) -> Option<MemoryConsumer> {
        take(&self.shared.inbound_rx).map(|rx| MemoryConsumer { rx })
    }

    /// Everything producers send. Only the first call gets it.
    pub fn outbound(&self) -> Option<mpsc::UnboundedReceiver<Envelope>> {
        take(&self.shared.outbound_rx)
    }

    /// Pushes a message onto the inbound stream.
    pub fn publish(&self, payload: impl Into<Bytes>) {
        let _ = self.shared.inbound_tx.send(payload.into());
    }

    /// Answers every outbound envelope with whatever `reply` returns.
    ///
    /// Returns `None` when the outbound queue was already taken.
    pub fn spawn_responder<F>(&self, mut reply: F) -> Option<JoinHandle<()>>
    where
        F: FnMut(&Envelope) -> Vec<Bytes> + Send + 'static,
    {
        let mut outbound = self.outbound()?;
        let inbound = self.shared.inbound_tx.clone();
        Some(tokio::spawn(async move {
            while let Some(envelope) = outbound.recv().await {
                for payload in reply(&envelope) {
                    if inbound.send(payload).is_err() {
                        return;
                    }
                }
            }
        }))
    }

    pub fn opened_producers(&self) -> u64 {
        self.shared.opened.load(Ordering::Relaxed)
    }

    pub fn closed_producers(&self) -> u64 {
        self.shared.closed.load(Ordering::Relaxed)
    }
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(|p| p.into_inner()).take()
}

#[derive(Debug)]
struct MemoryProducerFactory {
    shared: Arc<Shared>,
}

#[async_trait]
impl ProducerFactory for MemoryProducerFactory {
    async fn open(&self) -> Result<Box<dyn MessageProducer>, TransportError> {
        self.shared.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryProducer {
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryProducer {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[async_trait]
impl MessageProducer for MemoryProducer {
    async fn send(
        &self,
        channel: &str,
        payload: Bytes,
        headers: &[(String, String)],
    ) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.shared
            .outbound_tx
            .send(Envelope {
                channel: channel.to_string(),
                payload,
                headers: headers.to_vec(),
            })
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shared.closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct MemoryConsumer {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn next(&mut self) -> Option<Result<Bytes, TransportError>> {
        self.rx.recv().await.map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responder_turns_sends_into_inbound_messages() {
        let broker = MemoryBroker::new();
        let mut consumer = broker
            .consumer()
            .unwrap_or_else(|| panic!("consumer already taken"));
        assert!(broker.consumer().is_none());

        let _responder = broker
            .spawn_responder(|env| vec![Bytes::from(format!("ack:{}", env.payload_utf8()))]);

        let producer = broker
            .producers()
            .open()
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));
        producer
            .send("orders", Bytes::from_static(b"one"), &[])
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));

        let got = consumer
            .next()
            .await
            .unwrap_or_else(|| panic!("stream ended"))
            .unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(&got[..], b"ack:one");
    }

    #[tokio::test]
    async fn closed_producer_rejects_sends() {
        let broker = MemoryBroker::new();
        let producer = broker
            .producers()
            .open()
            .await
            .unwrap_or_else(|e| panic!("{e:#}"));
        producer.close().await;
        producer.close().await;

        let err = producer.send("x", Bytes::new(), &[]).await;
        assert!(matches!(err, Err(TransportError::Closed)));
        assert_eq!(broker.opened_producers(), 1);
        assert_eq!(broker.closed_producers(), 1);
    }
}
