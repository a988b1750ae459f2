use chrono::Utc;
use statpoll_common::types::{MetricSink, NormalizedSample};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::interval;

struct SampleBuffer {
    buffer: VecDeque<NormalizedSample>,
    max_size: usize,
    dropped: u64,
}

impl SampleBuffer {
    fn new(max_size: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            dropped: 0,
        }
    }

    fn push(&mut self, sample: NormalizedSample) {
        if self.max_size == 0 {
            self.dropped += 1;
            return;
        }
        if self.buffer.len() >= self.max_size {
            self.buffer.pop_front();
            self.dropped += 1;
        }
        self.buffer.push_back(sample);
    }

    fn drain_all(&mut self) -> Vec<NormalizedSample> {
        self.buffer.drain(..).collect()
    }
}

/// Bounded in-memory sink shared by every collector task.
///
/// When full, the oldest sample is discarded to make room.
pub struct BufferedSink {
    inner: Mutex<SampleBuffer>,
}

impl BufferedSink {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(SampleBuffer::new(max_size)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SampleBuffer> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn drain(&self) -> Vec<NormalizedSample> {
        self.lock().drain_all()
    }

    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples discarded since startup because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}

impl MetricSink for BufferedSink {
    fn publish(&self, sample: NormalizedSample) {
        self.lock().push(sample);
    }
}

/// Writes everything buffered as Graphite plaintext lines and returns the
/// number of lines written.
pub async fn flush<W>(sink: &BufferedSink, out: &mut W) -> std::io::Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let samples = sink.drain();
    if samples.is_empty() {
        return Ok(0);
    }
    let now = Utc::now();
    let mut text = String::new();
    for sample in &samples {
        text.push_str(&sample.to_plaintext(now));
        text.push('\n');
    }
    out.write_all(text.as_bytes()).await?;
    out.flush().await?;
    Ok(samples.len())
}

/// Periodically flushes `sink` to `out` until `shutdown` fires, then flushes
/// once more.
pub async fn run_writer<W>(
    sink: Arc<BufferedSink>,
    every: Duration,
    mut out: W,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut tick = interval(every);
    let mut reported_drops = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let written = flush(&sink, &mut out).await?;
                let dropped = sink.dropped();
                if dropped > reported_drops {
                    tracing::warn!(dropped = dropped - reported_drops, "Sample buffer overflowed");
                    reported_drops = dropped;
                }
                tracing::debug!(count = written, "Flushed samples");
            }
            _ = shutdown.changed() => break,
        }
    }

    let written = flush(&sink, &mut out).await?;
    tracing::debug!(count = written, "Final flush");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(path: &str, value: f64) -> NormalizedSample {
        NormalizedSample::new(path.to_string(), value, None).unwrap()
    }

    #[test]
    fn full_buffer_drops_oldest() {
        let sink = BufferedSink::new(2);
        sink.publish(sample("a", 1.0));
        sink.publish(sample("b", 2.0));
        sink.publish(sample("c", 3.0));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.dropped(), 1);
        let paths: Vec<_> = sink.drain().into_iter().map(|s| s.path).collect();
        assert_eq!(paths, vec!["b", "c"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn zero_capacity_drops_everything() {
        let sink = BufferedSink::new(0);
        sink.publish(sample("a", 1.0));
        assert!(sink.is_empty());
        assert_eq!(sink.dropped(), 1);
    }

    #[tokio::test]
    async fn flush_writes_plaintext_lines() {
        let sink = BufferedSink::new(10);
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        sink.publish(NormalizedSample::new("servers.h.mesos.tasks".into(), 3.0, Some(ts)).unwrap());
        sink.publish(NormalizedSample::new("servers.h.mesos.load".into(), 0.25, Some(ts)).unwrap());

        let mut out = Vec::new();
        let written = flush(&sink, &mut out).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "servers.h.mesos.tasks 3 1714564800\nservers.h.mesos.load 0.2500 1714564800\n"
        );
        assert_eq!(flush(&sink, &mut Vec::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn writer_flushes_on_shutdown() {
        let sink = Arc::new(BufferedSink::new(10));
        let (tx, rx) = watch::channel(false);
        let (client, mut server) = tokio::io::duplex(4096);

        let writer = tokio::spawn(run_writer(
            Arc::clone(&sink),
            Duration::from_secs(3_600),
            client,
            rx,
        ));
        tokio::task::yield_now().await;
        sink.publish(sample("late", 7.0));
        tx.send(true).unwrap();
        writer.await.unwrap().unwrap();

        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut text)
            .await
            .unwrap();
        assert!(text.starts_with("late 7 "), "got {text:?}");
    }
}
