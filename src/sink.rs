//! Event sinks.
//!
//! The pipeline hands each `DepositEvent` to exactly one sink, once. Delivery
//! failures are reported back to the loop and never retried here; a sink that
//! needs buffering or retries owns that itself.

use std::io::Write;

use anyhow::{Context, Result};

use crate::DepositEvent;

pub trait EventSink {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()>;

    /// Flush anything buffered. Called once when the loop ends.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<F> EventSink for F
where
    F: FnMut(&DepositEvent) -> Result<()>,
{
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        self(event)
    }
}

/// Collects events in memory.
impl EventSink for Vec<DepositEvent> {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        self.push(event.clone());
        Ok(())
    }
}

/// Logs each event at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        log::info!(
            "deposit #{} label={} bbox=({}, {}, {}x{}) area={:.0} t={}ms",
            event.deposit_id,
            event.label,
            event.bbox.x,
            event.bbox.y,
            event.bbox.width,
            event.bbox.height,
            event.area,
            event.stream_time_ms
        );
        Ok(())
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event).context("serialize deposit event")?;
        self.writer.write_all(b"\n").context("write deposit event")?;
        self.writer.flush().context("flush deposit event")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("flush event writer")
    }
}

/// Delivers to every inner sink. All sinks are attempted; the first error is
/// returned.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink + Send>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + Send + 'static) -> Self {
        self.push(sink);
        self
    }

    pub fn push(&mut self, sink: impl EventSink + Send + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        let mut first_err = None;
        for sink in &mut self.sinks {
            if let Err(err) = sink.deliver(event) {
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        for sink in &mut self.sinks {
            sink.flush()?;
        }
        Ok(())
    }
}

/// POSTs each event as JSON to a fixed endpoint.
#[cfg(feature = "sink-http")]
pub struct HttpSink {
    endpoint: String,
}

#[cfg(feature = "sink-http")]
impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(feature = "sink-http")]
impl EventSink for HttpSink {
    fn deliver(&mut self, event: &DepositEvent) -> Result<()> {
        ureq::post(&self.endpoint)
            .send_json(event)
            .with_context(|| format!("post deposit event to {}", self.endpoint))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BoundingBox;
    use anyhow::anyhow;

    fn event(id: u64) -> DepositEvent {
        DepositEvent {
            deposit_id: id,
            bbox: BoundingBox::new(10, 20, 30, 40),
            area: 1131.0,
            label: "Organic".into(),
            class_index: Some(3),
            confidence: None,
            stream_time_ms: 1500,
            recorded_at_epoch_s: 1_700_000_000,
        }
    }

    #[test]
    fn json_lines_are_parseable() -> Result<()> {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&event(1))?;
        sink.deliver(&event(2))?;
        let raw = String::from_utf8(sink.into_inner())?;
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DepositEvent = serde_json::from_str(lines[1])?;
        assert_eq!(parsed, event(2));
        Ok(())
    }

    #[test]
    fn fanout_tries_every_sink() {
        let mut fanout = FanoutSink::new()
            .with(|_: &DepositEvent| -> Result<()> { Err(anyhow!("offline")) })
            .with(LogSink);
        let collected = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let shared = collected.clone();
        fanout.push(move |e: &DepositEvent| -> Result<()> {
            shared.lock().map_err(|_| anyhow!("poisoned"))?.push(e.deposit_id);
            Ok(())
        });

        assert!(fanout.deliver(&event(7)).is_err());
        assert_eq!(*collected.lock().expect("lock"), vec![7]);
        assert_eq!(fanout.len(), 3);
    }

    #[test]
    fn vec_collects_events() -> Result<()> {
        let mut sink: Vec<DepositEvent> = Vec::new();
        sink.deliver(&event(1))?;
        assert_eq!(sink.len(), 1);
        Ok(())
    }
}
