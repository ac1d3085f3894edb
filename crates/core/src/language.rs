use std::path::Path;

use crate::encoding::Encoding;

/// 未知副檔名時回傳的語言代號。 / Language id reported for unknown extensions.
pub const UNDEFINED_LANGUAGE: &str = "undefined";

const EXTENSIONS: &[(&str, &str)] = &[
    ("py", "python"),
    ("pyw", "python"),
    ("pyi", "python"),
    ("ipy", "python"),
    ("js", "javascript"),
    ("mjs", "javascript"),
    ("cjs", "javascript"),
    ("jsx", "javascript"),
    ("ts", "typescript"),
    ("tsx", "typescript"),
    ("rs", "rust"),
    ("go", "go"),
    ("c", "c"),
    ("h", "c"),
    ("cc", "cpp"),
    ("cpp", "cpp"),
    ("cxx", "cpp"),
    ("hpp", "cpp"),
    ("java", "java"),
    ("json", "json"),
    ("toml", "toml"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("html", "html"),
    ("htm", "html"),
    ("css", "css"),
    ("scss", "scss"),
    ("xml", "xml"),
    ("sh", "shell"),
    ("bash", "shell"),
    ("sql", "sql"),
    ("txt", "plaintext"),
];

/// 依副檔名推斷語言代號（不分大小寫）。 / Infers a language id from the file extension, case-insensitively.
pub fn detect_language(path: impl AsRef<Path>) -> &'static str {
    let Some(extension) = path.as_ref().extension().and_then(|ext| ext.to_str()) else {
        return UNDEFINED_LANGUAGE;
    };
    EXTENSIONS
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(extension))
        .map(|(_, language)| *language)
        .unwrap_or(UNDEFINED_LANGUAGE)
}

/// Python 原始碼預設為 UTF-8（PEP 3120）。 / Python sources default to UTF-8 (PEP 3120).
pub fn default_encoding_for(path: impl AsRef<Path>) -> Option<Encoding> {
    (detect_language(path) == "python").then_some(Encoding::Utf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_common_languages() {
        assert_eq!(detect_language("foo.py"), "python");
        assert_eq!(detect_language("src/app.JS"), "javascript");
        assert_eq!(detect_language("lib.rs"), "rust");
    }

    #[test]
    fn unknown_or_missing_extension_is_undefined() {
        assert_eq!(detect_language("foo.unknown"), UNDEFINED_LANGUAGE);
        assert_eq!(detect_language("Makefile"), UNDEFINED_LANGUAGE);
    }

    #[test]
    fn python_sources_hint_utf8() {
        assert_eq!(default_encoding_for("main.py"), Some(Encoding::Utf8));
        assert_eq!(default_encoding_for("notes.txt"), None);
    }
}
