//! Path (de)serialisation for snapshots and intents. UTF-8 paths travel as plain
//! strings; anything else is tagged and base64 encoded so it survives JSON.
//! 路徑序列化：UTF-8 路徑直接輸出字串，其餘以 base64 標記保存以便通過 JSON。

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serializer};

const RAW_PREFIX: &str = "base64:";

pub fn serialize<S>(path: &Path, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&to_wire(path))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    from_wire(&text).map_err(serde::de::Error::custom)
}

/// Helpers for `Option<PathBuf>` fields.  
/// `Option<PathBuf>` 欄位使用。
pub mod option {
    use super::*;

    pub fn serialize<S>(value: &Option<PathBuf>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(path) => serializer.serialize_some(&to_wire(path)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|text| from_wire(&text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Encodes a path for the wire.  
/// 將路徑轉為傳輸用字串。
pub fn to_wire(path: &Path) -> String {
    if let Some(text) = path.to_str() {
        if !text.starts_with(RAW_PREFIX) {
            return text.to_owned();
        }
    }
    format!("{RAW_PREFIX}{}", BASE64.encode(os_bytes(path)))
}

/// Decodes a path produced by [`to_wire`]; plain strings are taken as-is.  
/// 還原 [`to_wire`] 的輸出；一般字串直接視為路徑。
pub fn from_wire(text: &str) -> Result<PathBuf, String> {
    match text.strip_prefix(RAW_PREFIX) {
        Some(payload) => {
            let bytes = BASE64
                .decode(payload.as_bytes())
                .map_err(|err| format!("invalid base64 path: {err}"))?;
            path_from_bytes(bytes)
        }
        None => Ok(PathBuf::from(text)),
    }
}

#[cfg(unix)]
fn os_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(bytes)))
}

#[cfg(windows)]
fn os_bytes(path: &Path) -> Vec<u8> {
    use std::os::windows::ffi::OsStrExt;
    path.as_os_str()
        .encode_wide()
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

#[cfg(windows)]
fn path_from_bytes(bytes: Vec<u8>) -> Result<PathBuf, String> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    if bytes.len() % 2 != 0 {
        return Err("encoded Windows path has odd byte length".to_string());
    }
    let wide: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(PathBuf::from(OsString::from_wide(&wide)))
}
