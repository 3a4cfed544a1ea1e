//! Text codec for shell streams.
//!
//! Shells talk in whatever encoding the host locale dictates, while clients
//! expect text. The codec tries a configurable primary encoding first and
//! falls back to UTF-8 with U+FFFD replacement, so decoding never fails.
//!
//! Decoding is stateful per stream: a multi-byte character split across two
//! read chunks is held back until its remaining bytes arrive, so the text
//! emitted for the two chunks concatenates to the original character. This
//! holds across the switch to the UTF-8 fallback too: a character whose first
//! bytes the primary decoder was holding is completed by the retry.

use crate::error::{BridgeError, Result};
use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};
use std::borrow::Cow;
use tracing::{debug, info};

/// Code page names commonly reported by Windows hosts that are not WHATWG labels.
const CODE_PAGE_ALIASES: &[(&str, &str)] = &[
    ("cp932", "shift_jis"),
    ("cp936", "gbk"),
    ("cp949", "euc-kr"),
    ("cp950", "big5"),
    ("cp65001", "utf-8"),
];

/// Primary-encoding-first, UTF-8-fallback text codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextCodec {
    primary: &'static Encoding,
}

impl TextCodec {
    /// Codec whose primary encoding is UTF-8.
    pub fn utf8() -> Self {
        Self { primary: UTF_8 }
    }

    pub fn new(primary: &'static Encoding) -> Self {
        Self { primary }
    }

    /// Resolve a WHATWG encoding label (`"utf-8"`, `"shift_jis"`, `"gbk"`, ...)
    /// or a Windows code page name such as `"cp932"`.
    pub fn for_label(label: &str) -> Result<Self> {
        let normalized = label.trim().to_ascii_lowercase();
        let resolved = CODE_PAGE_ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map_or(normalized.as_str(), |(_, target)| *target);

        Encoding::for_label(resolved.as_bytes())
            .map(Self::new)
            .ok_or_else(|| BridgeError::UnknownEncoding(label.to_string()))
    }

    pub fn primary(&self) -> &'static Encoding {
        self.primary
    }

    /// A fresh decoder for one output stream.
    pub fn decoder(&self) -> StreamDecoder {
        StreamDecoder::new(self.primary)
    }

    /// Encode client input for the shell's stdin.
    ///
    /// Text the primary encoding cannot represent is sent as UTF-8 instead of
    /// being mangled into numeric character references.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        if self.primary == UTF_8 {
            return Cow::Borrowed(text.as_bytes());
        }

        let (bytes, used, had_unmappable) = self.primary.encode(text);
        if had_unmappable {
            debug!(
                encoding = self.primary.name(),
                "Input not representable in primary encoding, sending UTF-8"
            );
            Cow::Borrowed(text.as_bytes())
        } else {
            if used != self.primary {
                debug!(
                    requested = self.primary.name(),
                    used = used.name(),
                    "Primary encoding has no encoder, used its output encoding"
                );
            }
            bytes
        }
    }
}

impl Default for TextCodec {
    fn default() -> Self {
        Self::utf8()
    }
}

/// Longest prefix of a UTF-8 character that can still be incomplete.
const UTF8_MAX_PENDING: usize = 3;

/// Incremental decoder owned by exactly one reader task.
pub struct StreamDecoder {
    primary: &'static Encoding,
    decoder: Decoder,
    fell_back: bool,
    /// Last bytes fed to the primary decoder, for replay on fallback.
    tail: Vec<u8>,
}

impl StreamDecoder {
    fn new(primary: &'static Encoding) -> Self {
        Self {
            primary,
            decoder: primary.new_decoder_without_bom_handling(),
            fell_back: false,
            tail: Vec::with_capacity(UTF8_MAX_PENDING),
        }
    }

    /// Whether this stream switched to the UTF-8 fallback.
    pub fn is_fallback(&self) -> bool {
        self.fell_back
    }

    /// Name of the encoding currently used for this stream.
    pub fn encoding_name(&self) -> &'static str {
        self.decoder.encoding().name()
    }

    /// Decode one read chunk. Trailing bytes of an incomplete character are
    /// kept until the next call.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.fell_back || self.primary == UTF_8 {
            let mut out = String::new();
            if feed(&mut self.decoder, chunk, false, &mut out) {
                self.note_replacement();
            }
            return out;
        }

        let held_before = self.primary_is_holding();
        let mut out = String::new();
        let replaced = feed(&mut self.decoder, chunk, false, &mut out);

        if replaced {
            // Output that is clean UTF-8 means the shell is not using the
            // primary encoding; switch this stream for good.
            let mut input = if held_before {
                incomplete_utf8_suffix(&self.tail).to_vec()
            } else {
                Vec::new()
            };
            input.extend_from_slice(chunk);

            let mut utf8 = UTF_8.new_decoder_without_bom_handling();
            let mut retry = String::new();
            if !feed(&mut utf8, &input, false, &mut retry) {
                info!(
                    primary = self.primary.name(),
                    "Shell output is not valid in the primary encoding, falling back to UTF-8"
                );
                self.decoder = utf8;
                self.fell_back = true;
                self.tail.clear();
                return retry;
            }
            self.note_replacement();
        }

        self.remember_tail(chunk);
        out
    }

    /// Whether the primary decoder is holding the start of a character.
    fn primary_is_holding(&self) -> bool {
        let fresh = self.primary.new_decoder_without_bom_handling();
        self.decoder.max_utf8_buffer_length(0) > fresh.max_utf8_buffer_length(0)
    }

    fn remember_tail(&mut self, chunk: &[u8]) {
        self.tail.extend_from_slice(chunk);
        let excess = self.tail.len().saturating_sub(UTF8_MAX_PENDING);
        self.tail.drain(..excess);
    }

    fn note_replacement(&self) {
        debug!(
            encoding = self.encoding_name(),
            "Undecodable bytes replaced with U+FFFD"
        );
    }

    /// Flush at end of stream. A dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        feed(&mut self.decoder, &[], true, &mut out);
        out
    }
}

/// The trailing bytes of `bytes` that start a UTF-8 character without
/// finishing it, or an empty slice.
fn incomplete_utf8_suffix(bytes: &[u8]) -> &[u8] {
    for (back, &byte) in bytes.iter().rev().enumerate() {
        let width = match byte {
            0x80..=0xBF => continue,
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => return &[],
        };
        let start = bytes.len() - back - 1;
        return if bytes.len() - start < width {
            &bytes[start..]
        } else {
            &[]
        };
    }
    &[]
}

/// Run `input` through `decoder`, growing `out` as needed.
/// Returns whether any replacement character was emitted.
fn feed(decoder: &mut Decoder, mut input: &[u8], last: bool, out: &mut String) -> bool {
    let mut replaced = false;
    loop {
        let needed = decoder
            .max_utf8_buffer_length(input.len())
            .unwrap_or(input.len().saturating_mul(3).saturating_add(16));
        out.reserve(needed);

        let (result, read, had_replacements) = decoder.decode_to_string(input, out, last);
        replaced |= had_replacements;
        input = &input[read..];

        match result {
            CoderResult::InputEmpty => return replaced,
            CoderResult::OutputFull => continue,
        }
    }
}
