//! Newline framing for the probe byte stream.
//!
//! Each connection owns one [`LineDecoder`]. Chunks go in, complete lines
//! come out, the trailing partial line is retained for the next chunk.
//! Down-stream back-pressure (a slow merge core) is handled by the bounded
//! dispatch channel in the connection reader, which stops pulling from the
//! socket while full; the decoder itself only has to bound the partial-line
//! accumulator.

use tracing::warn;

/// High-water mark for the retained partial line. A probe line this long is
/// broken; the decoder drops it instead of buffering without bound.
pub const HIGH_WATER_BYTES: usize = 256 * 1024;

#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: String,
    /// Set while an over-long line is being discarded up to its terminator.
    overflowed: bool,
    dropped_bytes: usize,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every newly completed line (without its
    /// terminator). Tolerates `\r\n`; blank lines are skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        if self.overflowed {
            // Still draining an over-long line: drop bytes up to its
            // terminator without buffering them.
            let Some(pos) = chunk.iter().position(|&b| b == b'\n') else {
                self.dropped_bytes += chunk.len();
                return Vec::new();
            };
            warn!(
                dropped_bytes = self.dropped_bytes + pos,
                "dropped over-long wire line"
            );
            self.overflowed = false;
            self.dropped_bytes = 0;
            return self.split_lines(&chunk[pos + 1..]);
        }
        self.split_lines(chunk)
    }

    fn split_lines(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let rest = self.buf.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.buf, rest);
            line.truncate(line.trim_end_matches(['\r', '\n']).len());
            if !line.is_empty() {
                lines.push(line);
            }
        }

        if self.buf.len() > HIGH_WATER_BYTES {
            self.overflowed = true;
            self.dropped_bytes = self.buf.len();
            self.buf.clear();
            self.buf.shrink_to_fit();
        }
        lines
    }

    /// Bytes currently retained waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// True while the accumulator has exceeded [`HIGH_WATER_BYTES`] and the
    /// oversized line is still being drained. Readers treat this as the
    /// paused state: nothing decodable arrives until the terminator shows up
    /// and the buffer has returned below the mark.
    pub fn over_high_water(&self) -> bool {
        self.overflowed
    }
}
