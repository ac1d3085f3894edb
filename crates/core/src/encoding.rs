use std::borrow::Cow;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding as RsEncoding, REPLACEMENT, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use thiserror::Error;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const UTF16_LE_BOM: &[u8] = b"\xFF\xFE";
const UTF16_BE_BOM: &[u8] = b"\xFE\xFF";
const UTF32_LE_BOM: &[u8] = b"\xFF\xFE\x00\x00";
const UTF32_BE_BOM: &[u8] = b"\x00\x00\xFE\xFF";

/// 偵測 `coding:` 宣告（僅限前兩行）。 / Matches a `coding:` declaration in the first two lines.
static CODING_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t\x0C]*#.*?coding[:=][ \t]*([-\w.]+)").expect("valid coding regex")
});

/// 解碼或編碼文字時可能發生的錯誤。 / Errors raised while decoding or encoding text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("content is binary or uses an unsupported text encoding")]
    Undecodable,
    #[error("text cannot be represented in target encoding {0}")]
    Unrepresentable(&'static str),
}

/// 文件的文字編碼。Unicode 編碼自行處理，其餘交給 `encoding_rs`。 /
/// Text encoding of a document. Unicode forms are handled here; every other
/// WHATWG encoding is carried as its `encoding_rs` handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Never UTF-8, UTF-16 or the `replacement` encoding; see [`Encoding::from_rs`].
    Legacy(&'static RsEncoding),
}

impl Encoding {
    pub fn name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf16Le => "utf-16le",
            Encoding::Utf16Be => "utf-16be",
            Encoding::Utf32Le => "utf-32le",
            Encoding::Utf32Be => "utf-32be",
            Encoding::Legacy(rs) => rs.name(),
        }
    }

    /// 依 WHATWG 標籤或常見別名解析編碼。 / Resolves an encoding from a WHATWG label or a common alias.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        match label.replace('_', "-").as_str() {
            "utf-32" | "utf-32le" | "utf32" => return Some(Encoding::Utf32Le),
            "utf-32be" => return Some(Encoding::Utf32Be),
            "latin-1" => return Some(Encoding::Legacy(WINDOWS_1252)),
            _ => {}
        }
        let candidates = [
            label.clone(),
            label.replace('_', "-"),
            label.replace(|ch: char| ch == '-' || ch == '_', ""),
        ];
        let rs = candidates
            .iter()
            .find_map(|candidate| RsEncoding::for_label(candidate.as_bytes()))?;
        Self::from_rs(rs)
    }

    /// UTF-16 對應到專用變體；`replacement` 無法往返，故不接受。 /
    /// Maps an `encoding_rs` handle; the `replacement` encoding cannot round-trip and is refused.
    pub fn from_rs(encoding: &'static RsEncoding) -> Option<Self> {
        if encoding == UTF_8 {
            Some(Encoding::Utf8)
        } else if encoding == UTF_16LE {
            Some(Encoding::Utf16Le)
        } else if encoding == UTF_16BE {
            Some(Encoding::Utf16Be)
        } else if encoding == REPLACEMENT {
            None
        } else {
            Some(Encoding::Legacy(encoding))
        }
    }

    /// UTF-16 與 UTF-32 沒有 BOM 時無法可靠地重新偵測。 /
    /// UTF-16 and UTF-32 cannot be reliably re-detected without a BOM.
    pub fn needs_bom(self) -> bool {
        matches!(
            self,
            Encoding::Utf16Le | Encoding::Utf16Be | Encoding::Utf32Le | Encoding::Utf32Be
        )
    }

    fn bom(self) -> &'static [u8] {
        match self {
            Encoding::Utf8 => UTF8_BOM,
            Encoding::Utf16Le => UTF16_LE_BOM,
            Encoding::Utf16Be => UTF16_BE_BOM,
            Encoding::Utf32Le => UTF32_LE_BOM,
            Encoding::Utf32Be => UTF32_BE_BOM,
            Encoding::Legacy(_) => &[],
        }
    }

    /// 以嚴格模式解碼，不接受任何替代字元。 / Decodes strictly, rejecting any malformed sequence.
    pub fn decode_strict(self, bytes: &[u8]) -> Result<String, EncodingError> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| EncodingError::Undecodable),
            Encoding::Utf16Le => decode_utf16(bytes, false),
            Encoding::Utf16Be => decode_utf16(bytes, true),
            Encoding::Utf32Le => decode_utf32(bytes, false),
            Encoding::Utf32Be => decode_utf32(bytes, true),
            Encoding::Legacy(rs) => rs
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(Cow::into_owned)
                .ok_or(EncodingError::Undecodable),
        }
    }

    /// 將文字序列化為此編碼的位元組，必要時加上 BOM。 / Serialises text into this encoding, optionally prefixed with a BOM.
    pub fn encode(self, text: &str, with_bom: bool) -> Result<Vec<u8>, EncodingError> {
        let mut buffer = Vec::with_capacity(text.len() + 4);
        if with_bom {
            buffer.extend_from_slice(self.bom());
        }
        match self {
            Encoding::Utf8 => buffer.extend_from_slice(text.as_bytes()),
            Encoding::Utf16Le | Encoding::Utf16Be => {
                let big_endian = self == Encoding::Utf16Be;
                for unit in text.encode_utf16() {
                    let bytes = if big_endian {
                        unit.to_be_bytes()
                    } else {
                        unit.to_le_bytes()
                    };
                    buffer.extend_from_slice(&bytes);
                }
            }
            Encoding::Utf32Le | Encoding::Utf32Be => {
                let big_endian = self == Encoding::Utf32Be;
                for ch in text.chars() {
                    let value = ch as u32;
                    let bytes = if big_endian {
                        value.to_be_bytes()
                    } else {
                        value.to_le_bytes()
                    };
                    buffer.extend_from_slice(&bytes);
                }
            }
            Encoding::Legacy(rs) => {
                let (cow, _, had_errors) = rs.encode(text);
                if had_errors {
                    return Err(EncodingError::Unrepresentable(rs.name()));
                }
                buffer.extend_from_slice(&cow);
            }
        }
        Ok(buffer)
    }
}

/// 解碼結果：Unicode 文字與來源編碼。 / Result of decoding: Unicode text plus its source encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub encoding: Encoding,
    pub has_bom: bool,
}

/// 偵測編碼並解碼。 / Detects the encoding of `bytes` and decodes them.
pub fn detect(bytes: &[u8]) -> Result<Decoded, EncodingError> {
    detect_with_hint(bytes, None)
}

/// 偵測編碼並解碼；`hint` 在嚴格解碼成功時優先於統計猜測。 /
/// Detects and decodes; a `hint` that decodes strictly wins over the statistical guess.
pub fn detect_with_hint(bytes: &[u8], hint: Option<Encoding>) -> Result<Decoded, EncodingError> {
    if bytes.is_empty() {
        return Ok(Decoded {
            text: String::new(),
            encoding: Encoding::Utf8,
            has_bom: false,
        });
    }

    if let Some((encoding, payload)) = split_bom(bytes) {
        let text = encoding.decode_strict(payload)?;
        if looks_binary(&text) {
            return Err(EncodingError::Undecodable);
        }
        return Ok(Decoded {
            text,
            encoding,
            has_bom: true,
        });
    }

    let declared = declared_encoding(bytes);
    for candidate in [declared, hint].into_iter().flatten() {
        if let Ok(text) = candidate.decode_strict(bytes) {
            return finish(text, candidate);
        }
    }

    if let Some(guess) = guess_encoding(bytes) {
        if let Ok(text) = guess.decode_strict(bytes) {
            return finish(text, guess);
        }
    }

    let text = Encoding::Utf8.decode_strict(bytes)?;
    finish(text, Encoding::Utf8)
}

fn finish(text: String, encoding: Encoding) -> Result<Decoded, EncodingError> {
    if looks_binary(&text) {
        return Err(EncodingError::Undecodable);
    }
    Ok(Decoded {
        text,
        encoding,
        has_bom: false,
    })
}

fn split_bom(bytes: &[u8]) -> Option<(Encoding, &[u8])> {
    // UTF-32 LE 的 BOM 以 UTF-16 LE 的 BOM 開頭，必須先檢查。 / The UTF-32 LE BOM starts with the UTF-16 LE one, so it is checked first.
    let table = [
        (UTF32_LE_BOM, Encoding::Utf32Le),
        (UTF32_BE_BOM, Encoding::Utf32Be),
        (UTF8_BOM, Encoding::Utf8),
        (UTF16_LE_BOM, Encoding::Utf16Le),
        (UTF16_BE_BOM, Encoding::Utf16Be),
    ];
    table
        .into_iter()
        .find(|(bom, _)| bytes.starts_with(bom))
        .map(|(bom, encoding)| (encoding, &bytes[bom.len()..]))
}

fn declared_encoding(bytes: &[u8]) -> Option<Encoding> {
    bytes
        .split(|byte| *byte == b'\n')
        .take(2)
        .find_map(|line| {
            let captures = CODING_DECLARATION.captures(line)?;
            let label = std::str::from_utf8(captures.get(1)?.as_bytes()).ok()?;
            Encoding::from_label(label)
        })
}

fn guess_encoding(bytes: &[u8]) -> Option<Encoding> {
    if looks_like_utf16(bytes, false) {
        return Some(Encoding::Utf16Le);
    }
    if looks_like_utf16(bytes, true) {
        return Some(Encoding::Utf16Be);
    }
    if bytes.is_ascii() {
        return Some(Encoding::Utf8);
    }
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    Encoding::from_rs(detector.guess(None, true))
}

fn looks_like_utf16(bytes: &[u8], big_endian: bool) -> bool {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return false;
    }

    let sample_len = bytes.len().min(64);
    let mut zero_count = 0;
    let mut total = 0;

    for chunk in bytes[..sample_len].chunks_exact(2) {
        let zero_byte = if big_endian { chunk[0] } else { chunk[1] };
        if zero_byte == 0 {
            zero_count += 1;
        }
        total += 1;
    }

    total > 0 && zero_count * 2 >= total
}

/// 含 NUL 或大量控制字元的內容視為二進位檔。 / Text with NULs or a high share of control characters is treated as binary.
fn looks_binary(text: &str) -> bool {
    let mut total = 0usize;
    let mut controls = 0usize;
    for ch in text.chars() {
        if ch == '\0' {
            return true;
        }
        total += 1;
        if ch.is_control() && !matches!(ch, '\t' | '\n' | '\r' | '\x0C' | '\x1B' | '\x08') {
            controls += 1;
        }
    }
    controls * 10 > total
}

fn decode_utf16(bytes: &[u8], big_endian: bool) -> Result<String, EncodingError> {
    if bytes.len() % 2 != 0 {
        return Err(EncodingError::Undecodable);
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| {
            let pair = [chunk[0], chunk[1]];
            if big_endian {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            }
        })
        .collect();
    String::from_utf16(&units).map_err(|_| EncodingError::Undecodable)
}

fn decode_utf32(bytes: &[u8], big_endian: bool) -> Result<String, EncodingError> {
    if bytes.len() % 4 != 0 {
        return Err(EncodingError::Undecodable);
    }

    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let quad = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let value = if big_endian {
                u32::from_be_bytes(quad)
            } else {
                u32::from_le_bytes(quad)
            };
            char::from_u32(value).ok_or(EncodingError::Undecodable)
        })
        .collect()
}
