//! Telemetry link: pumps transport bytes through the frame decoder.

use crate::drivers::mavlink::{
    DecodedMessage, DecoderStats, FrameDecoder, MessageKind, TrailerCheck, HEADER_LEN, TRAILER_LEN,
};
use crate::hal::{Clock, Transport};

/// Messages returned by one `get_messages` call at most.
pub const MAX_BATCH: usize = 16;

const RX_CHUNK: usize = 64;

/// Upper bound on frames one read chunk can complete (a pending frame plus
/// back-to-back empty-payload frames).
const FRAMES_PER_CHUNK: usize = RX_CHUNK / (HEADER_LEN + TRAILER_LEN);

/// Bytes consumed per `get_messages` call before yielding to the loop.
const BYTE_BUDGET: usize = 2048;

const IDLE_POLL_MS: u32 = 1;
const WAIT_POLL_MS: u32 = 10;

pub type Batch = heapless::Vec<DecodedMessage, MAX_BATCH>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    Timeout,
    Transport,
}

impl LinkError {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkError::Timeout => "timeout",
            LinkError::Transport => "transport",
        }
    }
}

pub struct MavLink<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    rx: [u8; RX_CHUNK],
    /// Messages decoded behind a `wait_for` match, handed out next batch.
    backlog: heapless::Vec<DecodedMessage, FRAMES_PER_CHUNK>,
}

impl<T: Transport> MavLink<T> {
    pub fn new(transport: T, trailer_check: TrailerCheck) -> Self {
        Self {
            transport,
            decoder: FrameDecoder::new(trailer_check),
            rx: [0u8; RX_CHUNK],
            backlog: heapless::Vec::new(),
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.transport
            .write(bytes)
            .await
            .map_err(|_| LinkError::Transport)
    }

    /// Everything decoded before the line goes quiet for `idle_ms`.
    ///
    /// Returns an empty batch when nothing arrived. Also returns early once
    /// the batch is nearly full or the byte budget is spent; the rest stays
    /// in the transport for the next call.
    pub async fn get_messages<C: Clock>(&mut self, clock: &C, idle_ms: u32) -> Batch {
        let mut batch = Batch::new();
        for msg in core::mem::take(&mut self.backlog) {
            let _ = batch.push(msg);
        }

        let mut last_rx = clock.now_ms();
        let mut consumed = 0usize;

        while batch.len() <= MAX_BATCH - FRAMES_PER_CHUNK && consumed < BYTE_BUDGET {
            let n = self.transport.read_available(&mut self.rx).await;
            if n == 0 {
                if clock.now_ms().wrapping_sub(last_rx) >= idle_ms {
                    break;
                }
                clock.delay_ms(IDLE_POLL_MS).await;
                continue;
            }

            consumed += n;
            last_rx = clock.now_ms();
            self.decoder.push(&self.rx[..n], |msg| {
                let _ = batch.push(msg);
            });
        }

        batch
    }

    /// First message of `kind` (any kind for `None`), polling until
    /// `timeout_ms` has passed. Non-matching messages before it are dropped.
    pub async fn wait_for<C: Clock>(
        &mut self,
        clock: &C,
        kind: Option<MessageKind>,
        timeout_ms: u32,
    ) -> Result<DecodedMessage, LinkError> {
        let start = clock.now_ms();
        let matches = |m: &DecodedMessage| kind.map_or(true, |k| m.kind() == k);

        if let Some(pos) = self.backlog.iter().position(|m| matches(m)) {
            let mut rest = core::mem::take(&mut self.backlog).into_iter().skip(pos);
            if let Some(found) = rest.next() {
                for msg in rest {
                    let _ = self.backlog.push(msg);
                }
                return Ok(found);
            }
        }
        self.backlog.clear();

        loop {
            let n = self.transport.read_available(&mut self.rx).await;
            if n > 0 {
                let mut chunk: heapless::Vec<DecodedMessage, FRAMES_PER_CHUNK> = heapless::Vec::new();
                self.decoder.push(&self.rx[..n], |msg| {
                    let _ = chunk.push(msg);
                });

                let mut found = None;
                for msg in chunk {
                    if found.is_some() {
                        let _ = self.backlog.push(msg);
                    } else if matches(&msg) {
                        found = Some(msg);
                    }
                }
                if let Some(msg) = found {
                    return Ok(msg);
                }
            }

            if clock.now_ms().wrapping_sub(start) >= timeout_ms {
                return Err(LinkError::Timeout);
            }
            if n == 0 {
                clock.delay_ms(WAIT_POLL_MS).await;
            }
        }
    }
}
