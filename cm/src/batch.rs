//! Batched one-way requests
//!
//! Requests made through a batch-mode proxy are queued here and handed to the
//! [`RequestSink`] on flush, grouped by target so each target receives one
//! batch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use crate::error::{CommunicatorError, Result};
use crate::proxy::Proxy;
use crate::stats::Stats;

/// One queued request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub proxy: Proxy,
    pub operation: String,
    pub payload: Vec<u8>,
}

impl BatchRequest {
    /// Key grouping requests that travel together
    pub fn target(&self) -> String {
        let proxy = &self.proxy;
        if !proxy.endpoints().is_empty() {
            proxy.endpoints().iter().map(ToString::to_string).collect::<Vec<_>>().join(":")
        } else if !proxy.adapter_id().is_empty() {
            format!("@ {}", proxy.adapter_id())
        } else {
            proxy.identity().to_string()
        }
    }

    fn protocol(&self) -> &str {
        self.proxy.endpoints().first().map(|e| e.transport()).unwrap_or("indirect")
    }
}

/// Delivers flushed batches
pub trait RequestSink: Send + Sync {
    fn send_batch(&self, target: &str, requests: &[BatchRequest]) -> Result<()>;
}

/// Sink that drops every batch
#[derive(Debug, Default)]
pub struct DiscardingSink;

impl RequestSink for DiscardingSink {
    fn send_batch(&self, target: &str, requests: &[BatchRequest]) -> Result<()> {
        debug!(%target, count = requests.len(), "DiscardingSink::send_batch: dropped");
        Ok(())
    }
}

/// Pending batch requests of a communicator
pub struct BatchRequestQueue {
    sink: Arc<dyn RequestSink>,
    stats: Arc<dyn Stats>,
    pending: Mutex<Vec<BatchRequest>>,
    destroyed: AtomicBool,
}

impl BatchRequestQueue {
    pub fn new(sink: Arc<dyn RequestSink>, stats: Arc<dyn Stats>) -> Self {
        Self {
            sink,
            stats,
            pending: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Queue a request; the proxy must use a batch invocation mode
    pub fn queue(&self, proxy: &Proxy, operation: &str, payload: Vec<u8>) -> Result<()> {
        debug!(%proxy, %operation, bytes = payload.len(), "BatchRequestQueue::queue: called");
        if !proxy.mode().is_batch() {
            return Err(CommunicatorError::InvalidMode {
                proxy: proxy.to_string(),
                mode: proxy.mode(),
            });
        }
        // Checked under the lock so `destroy` cannot miss an accepted request
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        pending.push(BatchRequest {
            proxy: proxy.clone(),
            operation: operation.to_string(),
            payload,
        });
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Send all pending requests; returns how many the sink accepted
    pub fn flush(&self) -> Result<usize> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(CommunicatorError::AlreadyDestroyed);
        }
        Ok(self.send_pending())
    }

    fn send_pending(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let mut batches: BTreeMap<String, Vec<BatchRequest>> = BTreeMap::new();
        for request in pending {
            batches.entry(request.target()).or_default().push(request);
        }

        let mut sent = 0;
        for (target, requests) in batches {
            match self.sink.send_batch(&target, &requests) {
                Ok(()) => {
                    let bytes = requests.iter().map(|r| r.payload.len()).sum();
                    self.stats.bytes_sent(requests[0].protocol(), bytes);
                    sent += requests.len();
                }
                Err(e) => warn!(%target, count = requests.len(), error = %e, "BatchRequestQueue::flush: batch dropped"),
            }
        }
        debug!(sent, "BatchRequestQueue::flush: done");
        sent
    }

    /// Flush what is pending and refuse further requests
    pub fn destroy(&self) {
        {
            let _pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if self.destroyed.swap(true, Ordering::AcqRel) {
                return;
            }
        }
        let sent = self.send_pending();
        debug!(sent, "BatchRequestQueue::destroy: called");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::identity::Identity;
    use crate::proxy::InvocationMode;
    use crate::stats::CountingStats;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<(String, usize)>>,
    }

    impl RequestSink for RecordingSink {
        fn send_batch(&self, target: &str, requests: &[BatchRequest]) -> Result<()> {
            self.batches.lock().unwrap().push((target.to_string(), requests.len()));
            Ok(())
        }
    }

    fn batch_proxy(port: &str) -> Proxy {
        Proxy::new(Identity::named("printer"))
            .with_mode(InvocationMode::BatchOneway)
            .with_endpoints(vec![Endpoint::new("tcp").with_option("-p", Some(port))])
    }

    #[test]
    fn test_rejects_non_batch_proxy() {
        let queue = BatchRequestQueue::new(Arc::new(DiscardingSink), Arc::new(CountingStats::new()));
        let proxy = Proxy::new(Identity::named("printer"));
        let err = queue.queue(&proxy, "print", vec![1]).unwrap_err();
        assert!(matches!(err, CommunicatorError::InvalidMode { mode: InvocationMode::Twoway, .. }));
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn test_flush_groups_by_target() {
        let sink = Arc::new(RecordingSink::default());
        let stats = Arc::new(CountingStats::new());
        let queue = BatchRequestQueue::new(sink.clone(), stats.clone());

        queue.queue(&batch_proxy("1"), "print", vec![0; 4]).unwrap();
        queue.queue(&batch_proxy("1"), "print", vec![0; 4]).unwrap();
        queue.queue(&batch_proxy("2"), "print", vec![0; 2]).unwrap();

        assert_eq!(queue.flush().unwrap(), 3);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(stats.total_sent(), 10);
        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.as_slice(), &[("tcp -p 1".to_string(), 2), ("tcp -p 2".to_string(), 1)]);
    }

    #[test]
    fn test_destroy_flushes_then_rejects() {
        let sink = Arc::new(RecordingSink::default());
        let queue = BatchRequestQueue::new(sink.clone(), Arc::new(CountingStats::new()));
        queue.queue(&batch_proxy("1"), "print", vec![]).unwrap();

        queue.destroy();
        assert_eq!(sink.batches.lock().unwrap().len(), 1);
        assert!(queue.flush().unwrap_err().is_destroyed());
        assert!(queue.queue(&batch_proxy("1"), "print", vec![]).unwrap_err().is_destroyed());
    }

    #[test]
    fn test_requests_accepted_during_destroy_are_delivered() {
        let sink = Arc::new(RecordingSink::default());
        let queue = Arc::new(BatchRequestQueue::new(sink.clone(), Arc::new(CountingStats::new())));

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut accepted = 0;
                    for _ in 0..500 {
                        match queue.queue(&batch_proxy("1"), "print", vec![1]) {
                            Ok(()) => accepted += 1,
                            Err(e) => {
                                assert!(e.is_destroyed());
                                break;
                            }
                        }
                    }
                    accepted
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(1));
        queue.destroy();
        let accepted: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();

        let delivered: usize = sink.batches.lock().unwrap().iter().map(|(_, count)| count).sum();
        assert_eq!(delivered, accepted);
        assert_eq!(queue.pending_count(), 0);
    }
}
