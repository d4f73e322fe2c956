//! Structured record sink.
//!
//! Subscribes to the bus and writes one JSON line per tactical signal,
//! setup transition and position event, tagged with a monotonic sequence
//! number and symbol. The writer is non-blocking and bounded; a slow or
//! failing sink drops records instead of back-pressuring the core.

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

use crate::bus::Event;

#[derive(Serialize)]
struct Record<'a> {
    seq: u64,
    symbol: Option<&'a str>,
    payload: &'a Event,
}

pub struct RecordSink<W: std::io::Write + Send> {
    writer: W,
    seq: u64,
    dropped: u64,
}

impl<W: std::io::Write + Send> RecordSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            seq: 0,
            dropped: 0,
        }
    }

    fn is_recorded(event: &Event) -> bool {
        matches!(
            event,
            Event::SignalEmitted(_)
                | Event::SetupCreated(_)
                | Event::SetupTransition { .. }
                | Event::SetupApproved(_)
                | Event::PositionOpened(_)
                | Event::PositionClosed { .. }
                | Event::Warning(_)
        )
    }

    /// Write one record; failures are counted, never propagated
    pub fn write_event(&mut self, event: &Event) {
        if !Self::is_recorded(event) {
            return;
        }
        self.seq += 1;
        let record = Record {
            seq: self.seq,
            symbol: event.symbol(),
            payload: event,
        };
        match serde_json::to_string(&record) {
            Ok(line) => {
                if writeln!(self.writer, "{line}").is_err() {
                    self.dropped += 1;
                }
            }
            Err(e) => {
                self.dropped += 1;
                debug!("record serialization failed: {e}");
            }
        }
    }

    pub fn sequence(&self) -> u64 {
        self.seq
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Drain bus events into the writer until shutdown
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.write_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "record sink lagged, events lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            }
        }
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        Direction, PatternKind, SignalEvidence, TacticalSignal, Trade, TradeSide,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn signal_event() -> Event {
        Event::SignalEmitted(TacticalSignal::new(
            "WDO",
            PatternKind::Momentum,
            Direction::Long,
            Utc::now(),
            0.8,
            SignalEvidence::default(),
        ))
    }

    #[test]
    fn test_sequence_numbers_are_monotonic() {
        let mut sink = RecordSink::new(Vec::new());

        sink.write_event(&signal_event());
        sink.write_event(&signal_event());
        sink.write_event(&signal_event());

        assert_eq!(sink.sequence(), 3);
        let output = String::from_utf8(sink.writer.clone()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);

        for (i, line) in lines.iter().enumerate() {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["seq"], (i + 1) as u64);
            assert_eq!(value["symbol"], "WDO");
        }
    }

    #[test]
    fn test_market_data_events_not_recorded() {
        let mut sink = RecordSink::new(Vec::new());

        sink.write_event(&Event::TradeAccepted(Trade::new(
            "WDO",
            Utc::now(),
            TradeSide::Buy,
            dec!(5500.0),
            10,
        )));

        assert_eq!(sink.sequence(), 0);
        assert!(sink.writer.is_empty());
    }
}
