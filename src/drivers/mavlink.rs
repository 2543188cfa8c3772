//! MAVLink v1 frame decoder.
//!
//! Frames are `[0xFE] [len] [seq] [sys] [comp] [msg] [payload ...] [trailer:2]`.
//! Only the handful of messages the payload reacts to are decoded; anything
//! else is still emitted with its kind so the caller can count it.
//!
//! Pure protocol logic, no hardware dependency, no heap.

pub const FRAME_MARKER: u8 = 0xFE;
pub const HEADER_LEN: usize = 6;
pub const TRAILER_LEN: usize = 2;
pub const MAX_PAYLOAD: usize = 255;
pub const MAX_FRAME: usize = HEADER_LEN + MAX_PAYLOAD + TRAILER_LEN;

/// STATUSTEXT carries at most 50 characters.
pub const MAX_STATUS_TEXT: usize = 50;

// ── Message kinds ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageKind {
    Heartbeat,
    GlobalPositionInt,
    StatusText,
    Attitude,
    AhrsSnapshot2,
    AhrsSnapshot3,
    Unknown(u8),
}

impl MessageKind {
    pub const fn from_id(id: u8) -> Self {
        match id {
            0 => MessageKind::Heartbeat,
            33 => MessageKind::GlobalPositionInt,
            253 => MessageKind::StatusText,
            30 => MessageKind::Attitude,
            178 => MessageKind::AhrsSnapshot2,
            182 => MessageKind::AhrsSnapshot3,
            other => MessageKind::Unknown(other),
        }
    }

    pub const fn id(self) -> u8 {
        match self {
            MessageKind::Heartbeat => 0,
            MessageKind::GlobalPositionInt => 33,
            MessageKind::StatusText => 253,
            MessageKind::Attitude => 30,
            MessageKind::AhrsSnapshot2 => 178,
            MessageKind::AhrsSnapshot3 => 182,
            MessageKind::Unknown(id) => id,
        }
    }

    /// Per-message seed folded into the trailer CRC.
    pub(crate) const fn crc_extra(self) -> Option<u8> {
        match self {
            MessageKind::Heartbeat => Some(50),
            MessageKind::GlobalPositionInt => Some(104),
            MessageKind::StatusText => Some(83),
            MessageKind::Attitude => Some(39),
            MessageKind::AhrsSnapshot2 => Some(47),
            MessageKind::AhrsSnapshot3 => Some(229),
            MessageKind::Unknown(_) => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::GlobalPositionInt => "GLOBAL_POSITION_INT",
            MessageKind::StatusText => "STATUSTEXT",
            MessageKind::Attitude => "ATTITUDE",
            MessageKind::AhrsSnapshot2 => "AHRS2",
            MessageKind::AhrsSnapshot3 => "AHRS3",
            MessageKind::Unknown(_) => "UNKNOWN",
        }
    }
}

// ── Decoded payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub payload_len: u8,
    pub sequence: u8,
    pub source_id: u8,
    pub component_id: u8,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub vehicle_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
    pub mavlink_version: u8,
}

/// Fused position. `alt` and `relative_alt` are in protocol units (mm).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GlobalPosition {
    pub time_boot_ms: u32,
    pub lat: i32,
    pub lon: i32,
    pub alt: i32,
    pub relative_alt: i32,
}

impl GlobalPosition {
    /// `|alt - relative_alt|`, the height-above-ground proxy used for
    /// flight-state classification.
    pub fn height_above_ground(&self) -> u32 {
        self.alt.abs_diff(self.relative_alt)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusText {
    pub severity: u8,
    text: heapless::Vec<u8, MAX_STATUS_TEXT>,
}

impl StatusText {
    /// Text up to the first NUL, or up to the first invalid UTF-8 byte.
    pub fn text(&self) -> &str {
        match core::str::from_utf8(&self.text) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&self.text[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub time_boot_ms: u32,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AhrsSnapshot2 {
    pub word0: u32,
    pub word1: u32,
    pub values: [f32; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AhrsSnapshot3 {
    pub word0: u32,
    pub word1: u32,
    pub values: [f32; 8],
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Heartbeat(Heartbeat),
    GlobalPositionInt(GlobalPosition),
    StatusText(StatusText),
    Attitude(Attitude),
    AhrsSnapshot2(AhrsSnapshot2),
    AhrsSnapshot3(AhrsSnapshot3),
}

/// One complete frame. `payload` is `None` for unknown kinds and for known
/// kinds whose payload is shorter than the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub header: FrameHeader,
    pub payload: Option<Payload>,
}

impl DecodedMessage {
    pub fn kind(&self) -> MessageKind {
        self.header.kind
    }
}

// ── Little-endian field reader ────────────────────────────────────────────────

struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.buf.get(self.at..self.at + N)?;
        self.at += N;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn f32(&mut self) -> Option<f32> {
        self.take().map(f32::from_le_bytes)
    }

    fn f32s<const N: usize>(&mut self) -> Option<[f32; N]> {
        let mut out = [0.0f32; N];
        for v in out.iter_mut() {
            *v = self.f32()?;
        }
        Some(out)
    }

    fn rest(&self) -> &'a [u8] {
        self.buf.get(self.at..).unwrap_or(&[])
    }
}

fn decode_payload(kind: MessageKind, payload: &[u8]) -> Option<Payload> {
    let mut r = Reader::new(payload);
    let decoded = match kind {
        MessageKind::Heartbeat => Payload::Heartbeat(Heartbeat {
            custom_mode: r.u32()?,
            vehicle_type: r.u8()?,
            autopilot: r.u8()?,
            base_mode: r.u8()?,
            system_status: r.u8()?,
            mavlink_version: r.u8()?,
        }),
        MessageKind::GlobalPositionInt => Payload::GlobalPositionInt(GlobalPosition {
            time_boot_ms: r.u32()?,
            lat: r.i32()?,
            lon: r.i32()?,
            alt: r.i32()?,
            relative_alt: r.i32()?,
        }),
        MessageKind::StatusText => {
            let severity = r.u8()?;
            let raw = r.rest();
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let end = end.min(MAX_STATUS_TEXT);
            let mut text = heapless::Vec::new();
            let _ = text.extend_from_slice(&raw[..end]);
            Payload::StatusText(StatusText { severity, text })
        }
        MessageKind::Attitude => Payload::Attitude(Attitude {
            time_boot_ms: r.u32()?,
            roll: r.f32()?,
            pitch: r.f32()?,
            yaw: r.f32()?,
            rollspeed: r.f32()?,
            pitchspeed: r.f32()?,
            yawspeed: r.f32()?,
        }),
        MessageKind::AhrsSnapshot2 => Payload::AhrsSnapshot2(AhrsSnapshot2 {
            word0: r.u32()?,
            word1: r.u32()?,
            values: r.f32s()?,
        }),
        MessageKind::AhrsSnapshot3 => Payload::AhrsSnapshot3(AhrsSnapshot3 {
            word0: r.u32()?,
            word1: r.u32()?,
            values: r.f32s()?,
        }),
        MessageKind::Unknown(_) => return None,
    };
    Some(decoded)
}

// ── Trailer CRC (X.25 / MCRF4XX) ─────────────────────────────────────────────

fn crc_accumulate(byte: u8, crc: u16) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = tmp as u16;
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

/// CRC over `header[1..] + payload` followed by the message's seed byte.
pub fn frame_crc(covered: &[u8], crc_extra: u8) -> u16 {
    let crc = covered
        .iter()
        .fold(0xFFFFu16, |crc, &b| crc_accumulate(b, crc));
    crc_accumulate(crc_extra, crc)
}

/// What to do with the two trailer bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrailerCheck {
    /// Accept every length-complete frame.
    #[default]
    Ignore,
    /// Drop known-kind frames whose trailer CRC does not match.
    Verify,
}

// ── Pending frame ─────────────────────────────────────────────────────────────

/// Accumulation buffer for the frame currently on the wire.
pub struct PendingFrame {
    bytes: heapless::Vec<u8, MAX_FRAME>,
}

impl PendingFrame {
    pub const fn new() -> Self {
        Self {
            bytes: heapless::Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Header fields, only once the six header bytes are in.
    pub fn header(&self) -> Option<FrameHeader> {
        let h = self.bytes.get(1..HEADER_LEN)?;
        Some(FrameHeader {
            payload_len: h[0],
            sequence: h[1],
            source_id: h[2],
            component_id: h[3],
            kind: MessageKind::from_id(h[4]),
        })
    }

    pub fn is_complete(&self) -> bool {
        match self.header() {
            Some(h) => self.bytes.len() >= HEADER_LEN + TRAILER_LEN
                && self.bytes.len() - (HEADER_LEN + TRAILER_LEN) >= h.payload_len as usize,
            None => false,
        }
    }

    /// How many more bytes this frame can take.
    fn bytes_needed(&self) -> usize {
        match self.header() {
            Some(h) => (HEADER_LEN + h.payload_len as usize + TRAILER_LEN)
                .saturating_sub(self.bytes.len()),
            None => HEADER_LEN - self.bytes.len(),
        }
    }

    fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_LEN..self.bytes.len() - TRAILER_LEN]
    }

    fn trailer(&self) -> u16 {
        let n = self.bytes.len();
        u16::from_le_bytes([self.bytes[n - 2], self.bytes[n - 1]])
    }

    fn crc_covered(&self) -> &[u8] {
        &self.bytes[1..self.bytes.len() - TRAILER_LEN]
    }

    fn clear(&mut self) {
        self.bytes.clear();
    }
}

impl Default for PendingFrame {
    fn default() -> Self {
        Self::new()
    }
}

// ── Decoder ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DecoderStats {
    pub frames: u32,
    pub discarded_bytes: u32,
    pub unknown_kinds: u32,
    pub short_payloads: u32,
    pub crc_errors: u32,
}

/// Streaming decoder: feed it whatever the UART produced, in any chunking.
pub struct FrameDecoder {
    pending: PendingFrame,
    trailer_check: TrailerCheck,
    stats: DecoderStats,
}

impl FrameDecoder {
    pub const fn new(trailer_check: TrailerCheck) -> Self {
        Self {
            pending: PendingFrame::new(),
            trailer_check,
            stats: DecoderStats {
                frames: 0,
                discarded_bytes: 0,
                unknown_kinds: 0,
                short_payloads: 0,
                crc_errors: 0,
            },
        }
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn pending(&self) -> &PendingFrame {
        &self.pending
    }

    /// Consume `data`, calling `emit` once per completed frame, in order.
    /// Leaves at most one frame open.
    pub fn push<F: FnMut(DecodedMessage)>(&mut self, mut data: &[u8], mut emit: F) {
        while !data.is_empty() {
            if !self.pending.is_open() {
                // Hunt for the start marker; anything before it is noise.
                match data.iter().position(|&b| b == FRAME_MARKER) {
                    Some(start) => {
                        self.stats.discarded_bytes =
                            self.stats.discarded_bytes.wrapping_add(start as u32);
                        data = &data[start..];
                    }
                    None => {
                        self.stats.discarded_bytes =
                            self.stats.discarded_bytes.wrapping_add(data.len() as u32);
                        return;
                    }
                }
            }

            let take = self.pending.bytes_needed().min(data.len());
            if self.pending.bytes.extend_from_slice(&data[..take]).is_err() {
                // Cannot happen while bytes_needed() is honoured
                self.pending.clear();
                return;
            }
            data = &data[take..];

            if self.pending.is_complete() {
                if let Some(msg) = self.finish() {
                    emit(msg);
                }
            }
        }
    }

    fn finish(&mut self) -> Option<DecodedMessage> {
        let header = self.pending.header()?;
        let kind = header.kind;

        if self.trailer_check == TrailerCheck::Verify {
            if let Some(extra) = kind.crc_extra() {
                if frame_crc(self.pending.crc_covered(), extra) != self.pending.trailer() {
                    self.stats.crc_errors = self.stats.crc_errors.wrapping_add(1);
                    log_warn!("mavlink: bad trailer on {} seq={}", kind.as_str(), header.sequence);
                    self.pending.clear();
                    return None;
                }
            }
        }

        let payload = decode_payload(kind, self.pending.payload());
        match (kind, &payload) {
            (MessageKind::Unknown(_), _) => {
                self.stats.unknown_kinds = self.stats.unknown_kinds.wrapping_add(1)
            }
            (_, None) => self.stats.short_payloads = self.stats.short_payloads.wrapping_add(1),
            _ => {}
        }
        self.stats.frames = self.stats.frames.wrapping_add(1);
        self.pending.clear();

        Some(DecodedMessage { header, payload })
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(TrailerCheck::Ignore)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
