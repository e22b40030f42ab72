use std::collections::BTreeMap;

use tracing::debug;
use tracing::error;

use crate::Message;
use crate::Result;
use crate::Topic;
use crate::LOG_BATCH_SIZE_METRIC;
use crate::LOG_MESSAGES_FLUSHED;

/// Pending log writes of one destination topic, in write order.
#[derive(Debug, Default)]
pub struct LogBuffer {
    msgs: Vec<Message>,
    message_count: usize,
}

impl LogBuffer {
    pub fn len(&self) -> usize {
        self.message_count
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    /// Takes every pending message, resetting messages and count together.
    fn take(&mut self) -> Vec<Message> {
        self.message_count = 0;
        std::mem::take(&mut self.msgs)
    }
}

/// Per-topic accumulation of outbound log writes.
#[derive(Debug)]
pub struct LogBufferPool {
    buffers: BTreeMap<Topic, LogBuffer>,
    batch_size: usize,
}

impl LogBufferPool {
    pub fn new(batch_size: usize) -> Self {
        Self {
            buffers: BTreeMap::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Appends `msg` to the buffer of `topic`. Returns true once the buffer
    /// holds a full batch and should be flushed.
    pub fn push(
        &mut self,
        topic: Topic,
        msg: Message,
    ) -> bool {
        let buffer = self.buffers.entry(topic).or_default();
        buffer.msgs.push(msg);
        buffer.message_count += 1;
        buffer.message_count >= self.batch_size
    }

    /// Messages waiting across all topics.
    pub fn pending(&self) -> usize {
        self.buffers.values().map(LogBuffer::len).sum()
    }

    pub fn pending_for(
        &self,
        topic: &Topic,
    ) -> usize {
        self.buffers.get(topic).map(LogBuffer::len).unwrap_or(0)
    }

    /// Sends the buffer of `topic` in batches of at most `batch_size`.
    ///
    /// The buffer is emptied before the first send. A batch the transport
    /// rejects is reported and dropped. Returns the number of messages sent.
    pub fn flush_topic(
        &mut self,
        topic: &Topic,
        publish: &mut dyn FnMut(&Topic, Message) -> Result<()>,
    ) -> usize {
        let Some(buffer) = self.buffers.remove(topic) else {
            return 0;
        };
        self.send(topic, buffer, publish)
    }

    /// Flushes every non-empty buffer. Returns the number of messages sent.
    pub fn flush_all(
        &mut self,
        publish: &mut dyn FnMut(&Topic, Message) -> Result<()>,
    ) -> usize {
        let buffers = std::mem::take(&mut self.buffers);
        buffers
            .into_iter()
            .map(|(topic, buffer)| self.send(&topic, buffer, publish))
            .sum()
    }

    fn send(
        &self,
        topic: &Topic,
        mut buffer: LogBuffer,
        publish: &mut dyn FnMut(&Topic, Message) -> Result<()>,
    ) -> usize {
        let msgs = buffer.take();
        let mut sent = 0;
        for chunk in msgs.chunks(self.batch_size) {
            match publish(topic, Message::Batch(chunk.to_vec())) {
                Ok(()) => {
                    sent += chunk.len();
                    LOG_BATCH_SIZE_METRIC
                        .with_label_values(&[topic.as_str()])
                        .observe(chunk.len() as f64);
                }
                Err(e) => error!(%topic, dropped = chunk.len(), "failed to send log batch: {}", e),
            }
        }
        if sent > 0 {
            debug!(%topic, sent, "flushed log buffer");
            LOG_MESSAGES_FLUSHED.inc_by(sent as u64);
        }
        sent
    }
}
