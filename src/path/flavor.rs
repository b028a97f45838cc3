//! OS-flavored path syntax: parsing, rendering and URI form.

use crate::error::{FsError, FsResult};

/// The two supported path syntaxes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PathFlavor {
    /// `/`-separated paths with the single root `/`.
    Posix,
    /// `\`-separated paths (with `/` accepted as an alternate separator),
    /// drive-letter roots (`C:\`) and UNC roots (`\\host\share\`).
    Windows,
}

/// A raw path split into its root token and name strings, before any
/// normalization is applied.
#[derive(Debug, PartialEq, Eq)]
pub struct ParsedPath {
    pub root: Option<String>,
    pub names: Vec<String>,
}

impl PathFlavor {
    /// The canonical separator for rendering.
    pub fn separator(self) -> char {
        match self {
            PathFlavor::Posix => '/',
            PathFlavor::Windows => '\\',
        }
    }

    /// Every character accepted as a separator when parsing, and excluded
    /// from glob wildcards.
    pub fn separators(self) -> &'static str {
        match self {
            PathFlavor::Posix => "/",
            PathFlavor::Windows => "\\/",
        }
    }

    /// True if `root` is a well-formed root token for this flavor.
    pub fn is_valid_root(self, root: &str) -> bool {
        match self {
            PathFlavor::Posix => root == "/",
            PathFlavor::Windows => parse_windows_root(root)
                .map_or(false, |(_, rest)| rest.chars().all(|c| c == '\\' || c == '/')),
        }
    }

    /// Splits `input` into root and names, validating each name.
    pub fn parse(self, input: &str) -> FsResult<ParsedPath> {
        match self {
            PathFlavor::Posix => self.parse_posix(input),
            PathFlavor::Windows => self.parse_windows(input),
        }
    }

    fn parse_posix(self, input: &str) -> FsResult<ParsedPath> {
        if input.contains('\0') {
            return Err(FsError::illegal(format!("NUL character in path {input:?}")));
        }
        let (root, rest) = match input.strip_prefix('/') {
            Some(rest) => (Some("/".to_string()), rest),
            None => (None, input),
        };
        let names = rest.split('/').filter(|part| !part.is_empty()).map(str::to_string).collect();
        Ok(ParsedPath { root, names })
    }

    fn parse_windows(self, input: &str) -> FsResult<ParsedPath> {
        let (root, rest) = match parse_windows_root(input) {
            Some((root, rest)) => (Some(root), rest),
            None => {
                if input.starts_with('\\') || input.starts_with('/') {
                    return Err(FsError::illegal(format!(
                        "current-drive relative path {input:?} is not supported"
                    )));
                }
                if drive_relative(input) {
                    return Err(FsError::illegal(format!(
                        "drive-relative path {input:?} is not supported"
                    )));
                }
                (None, input)
            }
        };
        let mut names = Vec::new();
        for part in rest.split(['\\', '/']) {
            if part.is_empty() {
                continue;
            }
            self.check_name(part)?;
            names.push(part.to_string());
        }
        Ok(ParsedPath { root, names })
    }

    /// Validates a single name for this flavor.
    pub fn check_name(self, name: &str) -> FsResult<()> {
        match self {
            PathFlavor::Posix => {
                if name.contains('\0') {
                    return Err(FsError::illegal(format!("NUL character in name {name:?}")));
                }
            }
            PathFlavor::Windows => {
                if name == "." || name == ".." {
                    return Ok(());
                }
                if let Some(bad) = name
                    .chars()
                    .find(|c| matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') || (*c as u32) < 0x20)
                {
                    return Err(FsError::illegal(format!(
                        "illegal character {bad:?} in name {name:?}"
                    )));
                }
                if name.ends_with(' ') {
                    return Err(FsError::illegal(format!("trailing space in name {name:?}")));
                }
            }
        }
        Ok(())
    }

    /// Renders a root token plus display names back into a path string.
    pub fn render(self, root: Option<&str>, names: &[&str]) -> String {
        let separator = self.separator();
        let mut out = String::new();
        if let Some(root) = root {
            out.push_str(root);
        }
        // The root token already ends with a separator, so the first name
        // appends directly after it.
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_str(name);
        }
        out
    }

    /// Emits the URI path for an absolute path: names joined by `/`, with a
    /// trailing `/` for directories, special characters percent-escaped.
    pub fn to_uri_path(self, root: &str, names: &[&str], directory: bool) -> String {
        let mut out = match self {
            PathFlavor::Posix => "/".to_string(),
            PathFlavor::Windows => {
                if let Some(rest) = root.strip_prefix("\\\\") {
                    // `\\host\share\` becomes `//host/share/`.
                    format!("//{}", rest.replace('\\', "/"))
                } else {
                    // `C:\` becomes `/C:/`.
                    format!("/{}/", root.trim_end_matches('\\'))
                }
            }
        };
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            out.push_str(&percent_encode(name));
        }
        if directory && !out.ends_with('/') {
            out.push('/');
        }
        out
    }

    /// Parses the decoded URI path back into root and names.
    pub fn from_uri_path(self, path: &str) -> FsResult<ParsedPath> {
        let raw = percent_decode(path)?;
        match self {
            PathFlavor::Posix => {
                if !raw.starts_with('/') {
                    return Err(FsError::illegal(format!("URI path {raw:?} is not absolute")));
                }
                self.parse(&raw)
            }
            PathFlavor::Windows => {
                if let Some(unc) = raw.strip_prefix("//") {
                    self.parse(&format!("\\\\{}", unc.replace('/', "\\")))
                } else if let Some(rest) = raw.strip_prefix('/') {
                    self.parse(rest)
                } else {
                    Err(FsError::illegal(format!("URI path {raw:?} is not absolute")))
                }
            }
        }
    }
}

/// Recognizes `X:\` drive roots and `\\host\share\` UNC roots. Returns the
/// normalized root token and the unconsumed remainder.
fn parse_windows_root(input: &str) -> Option<(String, &str)> {
    let bytes = input.as_bytes();
    if input.starts_with("\\\\") || input.starts_with("//") {
        let rest = &input[2..];
        let mut parts = rest.splitn(3, ['\\', '/']);
        let host = parts.next().filter(|h| !h.is_empty())?;
        let share = parts.next().filter(|s| !s.is_empty())?;
        let consumed = 2 + host.len() + 1 + share.len();
        let remainder = input.get(consumed..).unwrap_or("");
        Some((format!("\\\\{host}\\{share}\\"), remainder))
    } else if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        match bytes.get(2) {
            Some(b'\\') | Some(b'/') => {
                let drive = bytes[0] as char;
                Some((format!("{drive}:\\"), input.get(2..).unwrap_or("")))
            }
            // `C:` and `C:foo` are drive-relative, handled by the caller.
            _ => None,
        }
    } else {
        None
    }
}

/// True for `C:foo`-style paths: a drive prefix not followed by a separator.
fn drive_relative(input: &str) -> bool {
    let bytes = input.as_bytes();
    bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic()
}

/// Percent-encodes everything outside the URI unreserved set.
pub(crate) fn percent_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Decodes percent escapes, validating the result is UTF-8.
pub(crate) fn percent_decode(input: &str) -> FsResult<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input
                .get(i + 1..i + 3)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| FsError::illegal(format!("malformed percent escape in {input:?}")))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|_| FsError::illegal(format!("URI path {input:?} is not UTF-8")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posix_parse_splits_names() {
        let parsed = PathFlavor::Posix.parse("/work/a/b").unwrap();
        assert_eq!(parsed.root.as_deref(), Some("/"));
        assert_eq!(parsed.names, vec!["work", "a", "b"]);
    }

    #[test]
    fn posix_relative_has_no_root() {
        let parsed = PathFlavor::Posix.parse("a/b").unwrap();
        assert!(parsed.root.is_none());
        assert_eq!(parsed.names, vec!["a", "b"]);
    }

    #[test]
    fn posix_collapses_repeated_separators() {
        let parsed = PathFlavor::Posix.parse("//work///a").unwrap();
        assert_eq!(parsed.root.as_deref(), Some("/"));
        assert_eq!(parsed.names, vec!["work", "a"]);
    }

    #[test]
    fn posix_rejects_nul() {
        assert!(matches!(PathFlavor::Posix.parse("/a\0b"), Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn windows_drive_root() {
        let parsed = PathFlavor::Windows.parse("C:\\Users\\foo").unwrap();
        assert_eq!(parsed.root.as_deref(), Some("C:\\"));
        assert_eq!(parsed.names, vec!["Users", "foo"]);
    }

    #[test]
    fn windows_accepts_alternate_separator() {
        let parsed = PathFlavor::Windows.parse("C:/Users/foo").unwrap();
        assert_eq!(parsed.root.as_deref(), Some("C:\\"));
        assert_eq!(parsed.names, vec!["Users", "foo"]);
    }

    #[test]
    fn windows_unc_root() {
        let parsed = PathFlavor::Windows.parse("\\\\host\\share\\dir").unwrap();
        assert_eq!(parsed.root.as_deref(), Some("\\\\host\\share\\"));
        assert_eq!(parsed.names, vec!["dir"]);
    }

    #[test]
    fn windows_rejects_drive_relative() {
        assert!(matches!(PathFlavor::Windows.parse("C:foo"), Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn windows_rejects_current_drive_absolute() {
        assert!(matches!(PathFlavor::Windows.parse("\\foo"), Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn windows_rejects_illegal_name_characters() {
        assert!(matches!(PathFlavor::Windows.parse("C:\\a<b"), Err(FsError::IllegalArgument(_))));
        assert!(matches!(PathFlavor::Windows.parse("C:\\a "), Err(FsError::IllegalArgument(_))));
    }

    #[test]
    fn render_round_trips_posix() {
        let rendered = PathFlavor::Posix.render(Some("/"), &["work", "a"]);
        assert_eq!(rendered, "/work/a");
        assert_eq!(PathFlavor::Posix.render(None, &["a", "b"]), "a/b");
        assert_eq!(PathFlavor::Posix.render(Some("/"), &[]), "/");
    }

    #[test]
    fn render_round_trips_windows() {
        assert_eq!(PathFlavor::Windows.render(Some("C:\\"), &["Users"]), "C:\\Users");
        assert_eq!(
            PathFlavor::Windows.render(Some("\\\\host\\share\\"), &["x"]),
            "\\\\host\\share\\x"
        );
    }

    #[test]
    fn uri_path_escapes_and_marks_directories() {
        let uri = PathFlavor::Posix.to_uri_path("/", &["a b", "c"], true);
        assert_eq!(uri, "/a%20b/c/");
        let back = PathFlavor::Posix.from_uri_path("/a%20b/c/").unwrap();
        assert_eq!(back.names, vec!["a b", "c"]);
    }

    #[test]
    fn uri_path_windows_drive() {
        let uri = PathFlavor::Windows.to_uri_path("C:\\", &["Users"], false);
        assert_eq!(uri, "/C:/Users");
        let back = PathFlavor::Windows.from_uri_path("/C:/Users").unwrap();
        assert_eq!(back.root.as_deref(), Some("C:\\"));
        assert_eq!(back.names, vec!["Users"]);
    }
}
