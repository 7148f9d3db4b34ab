use chrono::{DateTime, Local, Utc};
use std::time::SystemTime;

/// Expands bare LF to CRLF for ASCII-mode sends. A CR already followed by
/// LF is passed through unchanged, so converting twice is harmless.
/// Output may grow up to twice the input length.
pub fn lf_to_crlf(input: &[u8], output: &mut Vec<u8>) {
    output.clear();
    output.reserve(input.len() * 2);

    let mut prev_was_cr = false;
    for &byte in input {
        if byte == b'\n' && !prev_was_cr {
            output.push(b'\r');
        }
        output.push(byte);
        prev_was_cr = byte == b'\r';
    }
}

/// Collapses CRLF to LF for ASCII-mode receives.
///
/// Conversion is chunk-oriented: a CR at the end of one chunk may belong to
/// a CRLF pair whose LF arrives in the next chunk, so the converter carries
/// that CR over and [`CrlfToLf::finish`] flushes it at end of stream.
#[derive(Debug, Default)]
pub struct CrlfToLf {
    pending_cr: bool,
}

impl CrlfToLf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert(&mut self, input: &[u8], output: &mut Vec<u8>) {
        output.clear();
        output.reserve(input.len() + 1);

        for &byte in input {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    output.push(b'\n');
                    continue;
                }
                output.push(b'\r');
            }
            if byte == b'\r' {
                self.pending_cr = true;
            } else {
                output.push(byte);
            }
        }
    }

    /// Flushes a trailing CR that was never followed by LF.
    pub fn finish(&mut self, output: &mut Vec<u8>) {
        output.clear();
        if self.pending_cr {
            self.pending_cr = false;
            output.push(b'\r');
        }
    }
}

/// Whether ASCII-mode receives collapse CRLF to LF. On Windows the
/// platform newline convention already is CRLF, so received bytes are
/// written verbatim.
pub fn ascii_recv_converts() -> bool {
    cfg!(not(windows))
}

/// Formats a modification time the way MDTM wants it: `YYYYMMDDhhmmss`, UTC.
pub fn mdtm_timestamp(mtime: SystemTime) -> String {
    let datetime: DateTime<Utc> = mtime.into();
    datetime.format("%Y%m%d%H%M%S").to_string()
}

/// Formats a modification time for `ls -l` style listing lines, local time.
pub fn list_timestamp(mtime: SystemTime) -> String {
    let datetime: DateTime<Local> = mtime.into();
    datetime.format("%b %d %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lf_expansion() {
        let mut out = Vec::new();
        lf_to_crlf(b"a\nb\nc", &mut out);
        assert_eq!(out, b"a\r\nb\r\nc");
    }

    #[test]
    fn lf_expansion_preserves_existing_crlf() {
        let mut out = Vec::new();
        lf_to_crlf(b"a\r\nb\n", &mut out);
        assert_eq!(out, b"a\r\nb\r\n");
    }

    #[test]
    fn lf_expansion_can_double() {
        let mut out = Vec::new();
        lf_to_crlf(b"\n\n\n", &mut out);
        assert_eq!(out, b"\r\n\r\n\r\n");
    }

    #[test]
    fn crlf_collapse() {
        let mut conv = CrlfToLf::new();
        let mut out = Vec::new();
        conv.convert(b"a\r\nb\r\n", &mut out);
        assert_eq!(out, b"a\nb\n");
    }

    #[test]
    fn crlf_collapse_keeps_lone_cr() {
        let mut conv = CrlfToLf::new();
        let mut out = Vec::new();
        conv.convert(b"a\rb", &mut out);
        assert_eq!(out, b"a\rb");
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut conv = CrlfToLf::new();
        let mut out = Vec::new();

        conv.convert(b"line\r", &mut out);
        assert_eq!(out, b"line");

        conv.convert(b"\nnext", &mut out);
        assert_eq!(out, b"\nnext");

        conv.finish(&mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn trailing_cr_flushed_at_end() {
        let mut conv = CrlfToLf::new();
        let mut out = Vec::new();

        conv.convert(b"data\r", &mut out);
        assert_eq!(out, b"data");

        conv.finish(&mut out);
        assert_eq!(out, b"\r");
    }

    #[test]
    fn mdtm_format_is_fourteen_digits() {
        let formatted = mdtm_timestamp(SystemTime::UNIX_EPOCH);
        assert_eq!(formatted, "19700101000000");
    }
}
