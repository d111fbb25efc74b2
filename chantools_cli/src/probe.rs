use std::fmt;
use std::sync::Arc;

use chantools_core::{
    BatchPolicy, BufferedSink, Channel, ChannelConfig, ChannelError, Completion, ConfigError,
    PeekReport, SendStatus, WaiterToken,
};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    pub producers: usize,
    pub per_producer: usize,
    pub minimum: usize,
    pub policy: BatchPolicy,
    pub close: bool,
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SendTally {
    pub handed_off: usize,
    pub buffered: usize,
    pub parked: usize,
}

#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ParkedTally {
    pub sent: usize,
    pub rejected: usize,
    pub still_parked: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchSummary {
    Read {
        policy: BatchPolicy,
        len: usize,
        closed: bool,
        values: Vec<u64>,
    },
    Refused {
        policy: BatchPolicy,
        error: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeOutcome {
    pub config: ChannelConfig,
    pub sent: SendTally,
    pub before: PeekReport,
    pub batch: BatchSummary,
    pub after: PeekReport,
    pub parked: ParkedTally,
    pub diagnostics: Vec<String>,
}

/// A channel plus the buffered sink that captures its diagnostics.
pub struct Probe {
    config: ChannelConfig,
    channel: Arc<Channel>,
    sink: BufferedSink,
}

impl Probe {
    pub fn new(config: &ChannelConfig) -> Result<Self, ConfigError> {
        let sink = BufferedSink::new();
        let channel = config.builder()?.sink(Arc::new(sink.clone())).build()?;

        Ok(Self {
            config: config.clone(),
            channel: Arc::new(channel),
            sink,
        })
    }

    pub async fn run(&self, opts: ProbeOptions) -> anyhow::Result<ProbeOutcome> {
        let parked_tokens = Arc::new(Mutex::new(Vec::new()));
        let mut producers = Vec::with_capacity(opts.producers);

        for producer in 0..opts.producers {
            let channel = self.channel.clone();
            let parked_tokens = parked_tokens.clone();
            producers.push(tokio::task::spawn_blocking(move || {
                produce(&channel, producer, opts.per_producer, &parked_tokens)
            }));
        }

        let mut sent = SendTally::default();
        for producer in producers {
            let tally = producer.await??;
            sent.handed_off += tally.handed_off;
            sent.buffered += tally.buffered;
            sent.parked += tally.parked;
        }
        debug!(?sent, "producers finished");

        let before = self.channel.debug_peek();
        if opts.close {
            self.channel.close()?;
        }

        let batch = match self.channel.batch_with(opts.minimum, opts.policy) {
            Ok(batch) => BatchSummary::Read {
                policy: opts.policy,
                len: batch.len(),
                closed: batch.is_closed(),
                values: batch.iter().map(decode).collect(),
            },
            Err(err) => BatchSummary::Refused {
                policy: opts.policy,
                error: err.to_string(),
            },
        };

        let after = self.channel.debug_peek();
        let tokens = std::mem::take(&mut *parked_tokens.lock());
        let parked = self.settle(&tokens)?;

        Ok(ProbeOutcome {
            config: self.config.clone(),
            sent,
            before,
            batch,
            after,
            parked,
            diagnostics: self.sink.drain_pending(),
        })
    }

    /// Collects the completions of parked senders; unfinished ones are withdrawn.
    fn settle(&self, tokens: &[WaiterToken]) -> Result<ParkedTally, ChannelError> {
        let registry = self.channel.waiters();
        let mut tally = ParkedTally::default();
        for token in tokens {
            match registry.take(*token)? {
                Some(Completion::Sent) => tally.sent += 1,
                Some(Completion::SendRejected(_)) => tally.rejected += 1,
                Some(other) => warn!(?other, "unexpected completion for a parked sender"),
                None => {
                    registry.cancel(*token);
                    tally.still_parked += 1;
                }
            }
        }
        Ok(tally)
    }
}

fn produce(
    channel: &Channel,
    producer: usize,
    count: usize,
    parked_tokens: &Mutex<Vec<WaiterToken>>,
) -> Result<SendTally, ChannelError> {
    let size = channel.layout().size();
    let mut tally = SendTally::default();

    for seq in 0..count {
        let value = ((producer as u64) << 32) | seq as u64;
        match channel.send_or_park(&encode(value, size))? {
            SendStatus::HandedOff => tally.handed_off += 1,
            SendStatus::Buffered => tally.buffered += 1,
            SendStatus::Parked(token) => {
                parked_tokens.lock().push(token);
                tally.parked += 1;
            }
        }
    }
    Ok(tally)
}

/// Little-endian value truncated or zero-padded to the element size.
fn encode(value: u64, size: usize) -> Vec<u8> {
    let mut element = vec![0u8; size];
    let bytes = value.to_le_bytes();
    let n = size.min(bytes.len());
    element[..n].copy_from_slice(&bytes[..n]);
    element
}

fn decode(element: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let n = element.len().min(bytes.len());
    bytes[..n].copy_from_slice(&element[..n]);
    u64::from_le_bytes(bytes)
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sent: {} buffered, {} handed off, {} parked",
            self.sent.buffered, self.sent.handed_off, self.sent.parked
        )?;
        writeln!(f, "-- before --")?;
        write!(f, "{}", self.before)?;
        match &self.batch {
            BatchSummary::Read { policy, len, closed, values } => {
                writeln!(f, "-- batch {} --", policy)?;
                writeln!(f, "{} elements{}", len, if *closed { " (closed)" } else { "" })?;
                for (i, value) in values.iter().enumerate() {
                    writeln!(f, "  [{}] p{}#{}", i, value >> 32, value & 0xffff_ffff)?;
                }
            }
            BatchSummary::Refused { policy, error } => {
                writeln!(f, "-- batch {} refused --", policy)?;
                writeln!(f, "{}", error)?;
            }
        }
        writeln!(f, "-- after --")?;
        write!(f, "{}", self.after)?;
        writeln!(
            f,
            "parked senders: {} sent, {} rejected, {} withdrawn",
            self.parked.sent, self.parked.rejected, self.parked.still_parked
        )?;
        for line in &self.diagnostics {
            writeln!(f, "[diag] {}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: usize) -> ChannelConfig {
        ChannelConfig {
            capacity,
            ..ChannelConfig::default()
        }
    }

    fn options(policy: BatchPolicy, close: bool) -> ProbeOptions {
        ProbeOptions {
            producers: 2,
            per_producer: 3,
            minimum: 1,
            policy,
            close,
        }
    }

    #[test]
    fn test_encoding_pads_and_truncates() {
        assert_eq!(encode(0x0102, 4), vec![0x02, 0x01, 0, 0]);
        assert_eq!(encode(u64::MAX, 2), vec![0xff, 0xff]);
        assert_eq!(decode(&encode(0x1_0000_0002, 8)), 0x1_0000_0002);
        assert_eq!(decode(&encode(0x0102, 16)), 0x0102);
    }

    #[tokio::test]
    async fn test_copy_probe_leaves_overflow_parked() {
        let probe = Probe::new(&config(4)).unwrap();
        let outcome = probe.run(options(BatchPolicy::Copy, false)).await.unwrap();

        assert_eq!(outcome.sent, SendTally { handed_off: 0, buffered: 4, parked: 2 });
        assert_eq!(outcome.before.count, 4);
        assert_eq!(outcome.before.waiting_senders, 2);
        match &outcome.batch {
            BatchSummary::Read { len, values, .. } => {
                assert_eq!(*len, 4);
                // Each producer's elements stay in send order.
                for producer in 0..2u64 {
                    let seqs: Vec<u64> = values
                        .iter()
                        .filter(|v| *v >> 32 == producer)
                        .map(|v| v & 0xffff_ffff)
                        .collect();
                    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
                }
            }
            other => panic!("unexpected batch outcome: {:?}", other),
        }
        assert_eq!(outcome.after, outcome.before);
        assert_eq!(outcome.parked, ParkedTally { sent: 0, rejected: 0, still_parked: 2 });
        assert!(outcome.diagnostics.iter().any(|l| l == "QSize:4, Elem:8"));
    }

    #[tokio::test]
    async fn test_drain_probe_pulls_in_parked_senders() {
        let probe = Probe::new(&config(4)).unwrap();
        let outcome = probe.run(options(BatchPolicy::Drain, false)).await.unwrap();

        assert!(matches!(outcome.batch, BatchSummary::Read { len: 4, .. }));
        assert_eq!(outcome.after.count, 2);
        assert_eq!(outcome.after.waiting_senders, 0);
        assert_eq!(outcome.parked, ParkedTally { sent: 2, rejected: 0, still_parked: 0 });
    }

    #[tokio::test]
    async fn test_close_rejects_parked_senders() {
        let probe = Probe::new(&config(4)).unwrap();
        let outcome = probe.run(options(BatchPolicy::Copy, true)).await.unwrap();

        assert!(matches!(outcome.batch, BatchSummary::Read { len: 4, closed: true, .. }));
        assert!(outcome.after.closed);
        assert_eq!(outcome.parked, ParkedTally { sent: 0, rejected: 2, still_parked: 0 });
    }

    #[tokio::test]
    async fn test_unbuffered_probe_is_refused() {
        let probe = Probe::new(&config(0)).unwrap();
        let outcome = probe.run(options(BatchPolicy::Copy, false)).await.unwrap();

        assert_eq!(outcome.sent.parked, 6);
        match &outcome.batch {
            BatchSummary::Refused { error, .. } => {
                assert_eq!(error, &ChannelError::NoBackingStore.to_string())
            }
            other => panic!("unexpected batch outcome: {:?}", other),
        }
        assert_eq!(outcome.parked.still_parked, 6);

        let text = outcome.to_string();
        assert!(text.contains("cannot peek on an unbuffered channel"));
        assert!(text.contains("-- batch copy refused --"));
    }

    #[tokio::test]
    async fn test_outcome_serializes() {
        let probe = Probe::new(&config(2)).unwrap();
        let outcome = probe.run(options(BatchPolicy::Copy, false)).await.unwrap();
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["batch"]["outcome"], "read");
        assert_eq!(json["batch"]["policy"], "copy");
        assert_eq!(json["before"]["ring"]["kind"], "buffered");
        assert_eq!(json["config"]["capacity"], 2);
    }
}
