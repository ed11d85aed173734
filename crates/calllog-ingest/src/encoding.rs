//! Text encoding resolution
//!
//! Exports from the telephony platform arrive as UTF-8, Latin-1 or
//! Windows-1252 with no reliable declaration. Detection here is only a hint:
//! [`candidate_ladder`] turns it into an ordered list of encodings that the
//! reader tries in turn, and [`DecodingReader`] performs strict decoding so a
//! wrong guess fails loudly instead of producing replacement characters.

use chardetng::EncodingDetector;
use encoding_rs::{Decoder, DecoderResult, Encoding, UTF_8};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Bytes fed to the detector.
pub const DETECTION_SAMPLE_BYTES: usize = 64 * 1024;

/// Labels tried after the hint, in order.
pub const FALLBACK_LABELS: [&str; 3] = ["utf-8", "latin1", "windows-1252"];

const READ_BUFFER_BYTES: usize = 16 * 1024;

/// Detector output; advisory only
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingGuess {
    pub label: String,
    /// 1.0 when the detector considers its guess reliable, 0.5 when not,
    /// 0.0 when detection could not run
    pub confidence: f32,
}

impl EncodingGuess {
    fn fallback() -> Self {
        Self {
            label: UTF_8.name().to_lowercase(),
            confidence: 0.0,
        }
    }
}

/// Guess a file's encoding from a prefix of its bytes
pub fn detect_encoding(path: &Path) -> EncodingGuess {
    let sample = match read_sample(path, DETECTION_SAMPLE_BYTES) {
        Ok(sample) if !sample.is_empty() => sample,
        Ok(_) => {
            warn!(path = %path.display(), "Empty file, assuming utf-8");
            return EncodingGuess::fallback();
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Encoding detection failed, assuming utf-8");
            return EncodingGuess::fallback();
        },
    };

    let complete = sample.len() < DETECTION_SAMPLE_BYTES;
    let guess = detect_sample(&sample, complete);
    debug!(
        path = %path.display(),
        encoding = %guess.label,
        confidence = guess.confidence,
        "Encoding detected"
    );
    guess
}

/// Guess the encoding of a complete in-memory input
pub fn detect_bytes(sample: &[u8]) -> EncodingGuess {
    detect_sample(sample, true)
}

/// `complete` is false when `sample` is a prefix cut from a longer file
fn detect_sample(sample: &[u8], complete: bool) -> EncodingGuess {
    if is_utf8(sample, complete) {
        return EncodingGuess {
            label: UTF_8.name().to_lowercase(),
            confidence: 1.0,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(sample, complete);
    let (encoding, reliable) = detector.guess_assess(None, true);

    EncodingGuess {
        label: encoding.name().to_lowercase(),
        confidence: if reliable { 1.0 } else { 0.5 },
    }
}

/// Valid UTF-8, allowing a sequence cut off at the end of a prefix
fn is_utf8(sample: &[u8], complete: bool) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(e) => !complete && e.error_len().is_none(),
    }
}

fn read_sample(path: &Path, limit: usize) -> io::Result<Vec<u8>> {
    let mut sample = Vec::with_capacity(limit);
    File::open(path)?
        .take(limit as u64)
        .read_to_end(&mut sample)?;
    Ok(sample)
}

/// One rung of the encoding ladder
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Label as requested (reported as the used encoding)
    pub label: &'static str,
    pub encoding: &'static Encoding,
}

impl Candidate {
    /// Resolve a WHATWG label such as "latin1" or "cp1252"
    pub fn from_label(label: &str) -> Option<Self> {
        let encoding = Encoding::for_label(label.trim().as_bytes())?;
        let label = FALLBACK_LABELS
            .iter()
            .find(|known| known.eq_ignore_ascii_case(label.trim()))
            .copied()
            .unwrap_or_else(|| encoding.name());
        Some(Self { label, encoding })
    }
}

/// Build `[hint, utf-8, latin1, windows-1252]`, hint first
///
/// Labels that resolve to a decoder already on the ladder are dropped, so
/// `latin1` and `windows-1252` (one decoder in `encoding_rs`) appear once.
pub fn candidate_ladder(hint: Option<&str>) -> Vec<Candidate> {
    let mut ladder: Vec<Candidate> = Vec::with_capacity(FALLBACK_LABELS.len() + 1);

    let hinted = hint.and_then(|label| {
        let candidate = Candidate::from_label(label);
        if candidate.is_none() {
            warn!(hint = label, "Unknown encoding hint ignored");
        }
        candidate
    });

    let fallbacks = FALLBACK_LABELS.iter().filter_map(|l| Candidate::from_label(l));

    for candidate in hinted.into_iter().chain(fallbacks) {
        if !ladder.iter().any(|c| c.encoding == candidate.encoding) {
            ladder.push(candidate);
        }
    }

    ladder
}

/// Byte sequence invalid for the encoding in use
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed {encoding} input near byte {offset}")]
pub struct MalformedInput {
    pub encoding: &'static str,
    pub offset: u64,
}

impl MalformedInput {
    /// Recover a decode failure carried inside an `io::Error`
    pub fn from_io(err: &io::Error) -> Option<Self> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<MalformedInput>())
            .cloned()
    }
}

/// Strict transcoder: wraps a byte source and yields UTF-8
///
/// Malformed input surfaces as an `io::Error` of kind `InvalidData` wrapping
/// [`MalformedInput`]. A byte-order mark matching the encoding is removed.
pub struct DecodingReader<R> {
    inner: R,
    encoding: &'static Encoding,
    decoder: Decoder,
    raw: Vec<u8>,
    decoded: String,
    cursor: usize,
    consumed: u64,
    finished: bool,
}

impl<R: Read> DecodingReader<R> {
    pub fn new(inner: R, encoding: &'static Encoding) -> Self {
        Self {
            inner,
            encoding,
            decoder: encoding.new_decoder_with_bom_removal(),
            raw: vec![0; READ_BUFFER_BYTES],
            decoded: String::new(),
            cursor: 0,
            consumed: 0,
            finished: false,
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    fn refill(&mut self) -> io::Result<()> {
        self.decoded.clear();
        self.cursor = 0;

        while self.decoded.is_empty() && !self.finished {
            let n = self.inner.read(&mut self.raw)?;
            let last = n == 0;
            let mut src = &self.raw[..n];

            loop {
                let needed = self
                    .decoder
                    .max_utf8_buffer_length_without_replacement(src.len())
                    .unwrap_or(src.len() * 4 + 16);
                self.decoded.reserve(needed);

                let (result, read) =
                    self.decoder
                        .decode_to_string_without_replacement(src, &mut self.decoded, last);
                self.consumed += read as u64;
                src = &src[read..];

                match result {
                    DecoderResult::InputEmpty => break,
                    DecoderResult::OutputFull => continue,
                    DecoderResult::Malformed(_, _) => {
                        self.finished = true;
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            MalformedInput {
                                encoding: self.encoding.name(),
                                offset: self.consumed,
                            },
                        ));
                    },
                }
            }

            if last {
                self.finished = true;
            }
        }

        Ok(())
    }
}

impl<R: Read> Read for DecodingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.cursor >= self.decoded.len() {
            self.refill()?;
        }

        let available = &self.decoded.as_bytes()[self.cursor..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Check that `path` decodes cleanly under `encoding`
///
/// Validates the header line, then at least `limit` further decoded bytes, or
/// the whole file when `limit` is `None`. Decoding runs in blocks, so a
/// little more than `limit` may be checked. Nothing is kept in memory.
pub fn probe(path: &Path, encoding: &'static Encoding, limit: Option<u64>) -> io::Result<()> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(DecodingReader::new(file, encoding));

    let mut header = String::new();
    reader.read_line(&mut header)?;

    match limit {
        Some(limit) => io::copy(&mut reader.take(limit), &mut io::sink())?,
        None => io::copy(&mut reader, &mut io::sink())?,
    };

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1252;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn decode_all(bytes: &[u8], encoding: &'static Encoding) -> io::Result<String> {
        let mut out = String::new();
        DecodingReader::new(bytes, encoding).read_to_string(&mut out)?;
        Ok(out)
    }

    #[test]
    fn test_ladder_hint_first_and_deduplicated() {
        let labels: Vec<_> = candidate_ladder(Some("utf-8")).iter().map(|c| c.label).collect();
        assert_eq!(labels, vec!["utf-8", "latin1"]);

        let labels: Vec<_> = candidate_ladder(Some("windows-1252"))
            .iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["windows-1252", "utf-8"]);
    }

    #[test]
    fn test_ladder_unknown_hint_dropped() {
        let labels: Vec<_> = candidate_ladder(Some("klingon-8"))
            .iter()
            .map(|c| c.label)
            .collect();
        assert_eq!(labels, vec!["utf-8", "latin1"]);

        assert_eq!(candidate_ladder(None).len(), 2);
    }

    #[test]
    fn test_ladder_foreign_hint_kept() {
        let ladder = candidate_ladder(Some("Shift_JIS"));
        assert_eq!(ladder[0].label, "Shift_JIS");
        assert_eq!(ladder.len(), 3);
    }

    #[test]
    fn test_strict_utf8_rejects_latin1_bytes() {
        let latin1 = b"nom\nR\xe9mi\n";
        let err = decode_all(latin1, UTF_8).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let malformed = MalformedInput::from_io(&err).unwrap();
        assert_eq!(malformed.encoding, "UTF-8");

        assert_eq!(decode_all(latin1, WINDOWS_1252).unwrap(), "nom\nRémi\n");
    }

    #[test]
    fn test_bom_removed() {
        let with_bom = b"\xef\xbb\xbfdate_appel\n";
        assert_eq!(decode_all(with_bom, UTF_8).unwrap(), "date_appel\n");
    }

    #[test]
    fn test_multibyte_split_across_reads() {
        // larger than one read buffer so a sequence straddles the boundary
        let text = format!("a{}", "é".repeat(READ_BUFFER_BYTES));
        assert_eq!(decode_all(text.as_bytes(), UTF_8).unwrap(), text);
    }

    #[test]
    fn test_probe_scans_past_header() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"a,b\n").unwrap();
        file.write_all("1,2\n".repeat(20_000).as_bytes()).unwrap();
        file.write_all(b"3,\xe9\n").unwrap();

        assert!(probe(file.path(), UTF_8, Some(0)).is_ok());
        assert!(probe(file.path(), UTF_8, None).is_err());
        assert!(probe(file.path(), WINDOWS_1252, None).is_ok());
    }

    /// UTF-8 text whose byte at `DETECTION_SAMPLE_BYTES - 1` starts an `é`
    fn utf8_split_at_sample_end() -> Vec<u8> {
        let mut text = String::from("nom\n");
        while text.len() + 7 < DETECTION_SAMPLE_BYTES - 8 {
            text.push_str("Martin\n");
        }
        text.push_str(&"x".repeat(DETECTION_SAMPLE_BYTES - 1 - text.len()));
        text.push_str("\u{e9}\nR\u{e9}mi\n");
        text.into_bytes()
    }

    #[test]
    fn test_detect_utf8_cut_inside_sequence() {
        let bytes = utf8_split_at_sample_end();
        assert_eq!(bytes[DETECTION_SAMPLE_BYTES - 1], 0xC3);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();
        file.flush().unwrap();

        let guess = detect_encoding(file.path());
        assert_eq!(guess.label, "utf-8");
    }

    #[test]
    fn test_truncated_prefix_only_valid_when_incomplete() {
        let cut = "R\u{e9}".as_bytes();
        let cut = &cut[..cut.len() - 1];
        assert!(is_utf8(cut, false));
        assert!(!is_utf8(cut, true));
        assert!(!is_utf8(b"R\xe9mi", false));
    }

    #[test]
    fn test_detect_plain_ascii_and_missing_file() {
        let guess = detect_bytes(b"date_appel,heure_appel\n2024-01-02,08:15:00\n");
        assert!(!guess.label.is_empty());

        let guess = detect_encoding(Path::new("/nonexistent/calls.csv"));
        assert_eq!(guess.label, "utf-8");
        assert_eq!(guess.confidence, 0.0);
    }
}
