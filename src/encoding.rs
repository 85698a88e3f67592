//! Source-file encoding detection and byte-stream transcoding to UTF-8.
//!
//! Detection only looks at a bounded head-of-file sample. A BOM, BOM-less
//! UTF-16 or valid UTF-8 settle it outright; otherwise `chardetng` scores the
//! sample against the legacy encodings. When its guess cannot decode the
//! sample, the permissive single-byte Windows-1252 (the WHATWG reading of
//! "latin-1") is returned, so a strict decode downstream either succeeds or
//! fails loudly instead of mangling multi-byte sequences.

use std::{
    fmt,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
    str::FromStr,
};

use encoding_rs::{CoderResult, DecoderResult, Encoding, UTF_8, UTF_16BE, UTF_16LE, WINDOWS_1252};
use chardetng::EncodingDetector;
use log::{debug, info, warn};

use crate::error::{IngestError, Result};

pub const DEFAULT_SAMPLE_BYTES: usize = 1_000_000;
const TRANSCODE_CHUNK: usize = 64 * 1024;
const UTF16_ZERO_RATIO: f64 = 0.3;
const UTF16_OTHER_LANE_RATIO: f64 = 0.05;

/// How undecodable bytes are treated while transcoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeErrors {
    #[default]
    Strict,
    Replace,
}

impl FromStr for DecodeErrors {
    type Err = IngestError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(DecodeErrors::Strict),
            "replace" => Ok(DecodeErrors::Replace),
            other => Err(IngestError::Config(format!(
                "Unknown error handling '{other}' (expected strict or replace)"
            ))),
        }
    }
}

impl fmt::Display for DecodeErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrors::Strict => f.write_str("strict"),
            DecodeErrors::Replace => f.write_str("replace"),
        }
    }
}

pub fn is_utf8_compatible(encoding: &'static Encoding) -> bool {
    encoding == UTF_8
}

/// Detects the encoding of a head-of-file sample. Never fails.
pub fn detect(sample: &[u8]) -> &'static Encoding {
    if let Some((encoding, bom_len)) = Encoding::for_bom(sample) {
        debug!("Byte order mark of {bom_len} byte(s) selects {}", encoding.name());
        return encoding;
    }
    // NUL is valid UTF-8, so the UTF-16 lane check has to run first.
    if let Some(encoding) = guess_utf16(sample) {
        return encoding;
    }
    if is_utf8_prefix(sample) {
        return UTF_8;
    }
    let mut detector = EncodingDetector::new();
    detector.feed(sample, true);
    let guessed = detector.guess(None, false);
    if guessed
        .decode_without_bom_handling_and_without_replacement(sample)
        .is_some()
    {
        debug!("Statistical detector picked {}", guessed.name());
        guessed
    } else {
        warn!(
            "Detector guess {} does not decode the sample; falling back to {}",
            guessed.name(),
            WINDOWS_1252.name()
        );
        WINDOWS_1252
    }
}

pub fn detect_file(path: &Path, sample_bytes: usize) -> Result<&'static Encoding> {
    let mut sample = Vec::with_capacity(sample_bytes.min(DEFAULT_SAMPLE_BYTES));
    File::open(path)?
        .take(sample_bytes as u64)
        .read_to_end(&mut sample)?;
    let encoding = detect(&sample);
    info!(
        "Detected encoding {} for {:?} from a {} byte sample",
        encoding.name(),
        path,
        sample.len()
    );
    Ok(encoding)
}

/// Valid UTF-8, tolerating a sequence cut off by the end of the sample.
fn is_utf8_prefix(sample: &[u8]) -> bool {
    match std::str::from_utf8(sample) {
        Ok(_) => true,
        Err(err) => err.error_len().is_none(),
    }
}

/// BOM-less UTF-16 shows up as zero bytes concentrated in one byte lane.
fn guess_utf16(sample: &[u8]) -> Option<&'static Encoding> {
    if sample.len() < 4 {
        return None;
    }
    let pairs = (sample.len() / 2) as f64;
    let even_zeros = sample.iter().step_by(2).filter(|&&b| b == 0).count() as f64 / pairs;
    let odd_zeros = sample.iter().skip(1).step_by(2).filter(|&&b| b == 0).count() as f64 / pairs;
    if odd_zeros >= UTF16_ZERO_RATIO && even_zeros <= UTF16_OTHER_LANE_RATIO {
        Some(UTF_16LE)
    } else if even_zeros >= UTF16_ZERO_RATIO && odd_zeros <= UTF16_OTHER_LANE_RATIO {
        Some(UTF_16BE)
    } else {
        None
    }
}

/// Outcome of a transcode run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub replacements: bool,
}

/// Streams `source` into `target` as UTF-8 without reparsing its structure,
/// so line boundaries and delimiters come through untouched.
pub fn transcode(
    source: &Path,
    target: &Path,
    encoding: &'static Encoding,
    errors: DecodeErrors,
) -> Result<TranscodeStats> {
    let reader = BufReader::new(File::open(source)?);
    let mut writer = BufWriter::new(File::create(target)?);
    let stats = transcode_stream(reader, &mut writer, encoding, errors).map_err(|err| match err {
        IngestError::Encoding { message, .. } => IngestError::Encoding {
            path: source.to_path_buf(),
            message,
        },
        other => other,
    })?;
    writer.flush()?;
    info!(
        "Transcoded {:?} from {} to UTF-8 into {:?} ({} byte(s) written)",
        source,
        encoding.name(),
        target,
        stats.bytes_written
    );
    Ok(stats)
}

pub fn transcode_stream<R, W>(
    mut reader: R,
    writer: &mut W,
    encoding: &'static Encoding,
    errors: DecodeErrors,
) -> Result<TranscodeStats>
where
    R: Read,
    W: Write,
{
    let mut decoder = encoding.new_decoder_with_bom_removal();
    let mut input = vec![0u8; TRANSCODE_CHUNK];
    let mut output = String::with_capacity(TRANSCODE_CHUNK * 3);
    let mut stats = TranscodeStats::default();

    loop {
        let read = reader.read(&mut input)?;
        let last = read == 0;
        let mut pending = &input[..read];
        loop {
            output.clear();
            let (done, consumed) = match errors {
                DecodeErrors::Strict => {
                    let (result, consumed) =
                        decoder.decode_to_string_without_replacement(pending, &mut output, last);
                    match result {
                        DecoderResult::InputEmpty => (true, consumed),
                        DecoderResult::OutputFull => (false, consumed),
                        DecoderResult::Malformed(_, _) => {
                            return Err(IngestError::Encoding {
                                path: Default::default(),
                                message: format!(
                                    "malformed {} sequence near byte {}",
                                    encoding.name(),
                                    stats.bytes_read + consumed as u64
                                ),
                            });
                        }
                    }
                }
                DecodeErrors::Replace => {
                    let (result, consumed, had_errors) =
                        decoder.decode_to_string(pending, &mut output, last);
                    stats.replacements |= had_errors;
                    (matches!(result, CoderResult::InputEmpty), consumed)
                }
            };
            writer.write_all(output.as_bytes())?;
            stats.bytes_written += output.len() as u64;
            stats.bytes_read += consumed as u64;
            pending = &pending[consumed..];
            if done {
                break;
            }
        }
        if last {
            break;
        }
    }
    Ok(stats)
}
