//! FIFO buffer for envelopes accepted while disconnected.

use std::collections::VecDeque;

use uplink_protocol::Envelope;

use crate::error::Result;

/// Ordered, unbounded queue of outbound envelopes. Drained in full on each
/// transition to the live state; never reordered, never drops entries.
#[derive(Default)]
pub struct OutboundQueue {
    items: VecDeque<Envelope>,
}

impl OutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, envelope: Envelope) {
        self.items.push_back(envelope);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transmit queued envelopes head-to-tail. An envelope is removed only
    /// after `transmit` accepts it, so a mid-flush failure leaves the
    /// failed envelope and the untransmitted remainder queued, in order,
    /// for the next reconnect. Nothing is ever transmitted twice.
    pub fn flush<F>(&mut self, mut transmit: F) -> Result<()>
    where
        F: FnMut(&Envelope) -> Result<()>,
    {
        while let Some(envelope) = self.items.front() {
            transmit(envelope)?;
            self.items.pop_front();
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn envelope(r#type: &str) -> Envelope {
        Envelope::new(r#type, serde_json::json!({}))
    }

    #[test]
    fn flush_preserves_fifo_order_and_clears() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(envelope("a"));
        queue.enqueue(envelope("b"));
        queue.enqueue(envelope("c"));

        let mut sent = Vec::new();
        queue
            .flush(|e| {
                sent.push(e.r#type.clone());
                Ok(())
            })
            .unwrap();

        assert_eq!(sent, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn flush_of_empty_queue_is_a_no_op() {
        let mut queue = OutboundQueue::new();
        let mut calls = 0;
        queue
            .flush(|_| {
                calls += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn failed_transmit_requeues_remainder_without_duplicates() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(envelope("a"));
        queue.enqueue(envelope("b"));
        queue.enqueue(envelope("c"));

        let mut sent = Vec::new();
        let result = queue.flush(|e| {
            if e.r#type == "b" {
                return Err(Error::message("writer gone"));
            }
            sent.push(e.r#type.clone());
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(sent, vec!["a"]);
        assert_eq!(queue.len(), 2);

        // Next flush picks up exactly where the failed one stopped.
        queue
            .flush(|e| {
                sent.push(e.r#type.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(sent, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }
}
