//! File names and the normalizations applied to them.
//!
//! A [`Name`] carries two strings: the display form (what the user typed,
//! possibly re-normalized for rendering) and the canonical form used for
//! equality, hashing and directory lookup. Which normalizations feed each
//! form is a per-filesystem configuration choice.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

/// A single normalization applied to file names.
///
/// At most one Unicode form (`Nfc`/`Nfd`) and one case fold
/// (`CaseFoldAscii`/`CaseFoldUnicode`) may be configured per name form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Normalization {
    /// Unicode canonical composition.
    Nfc,
    /// Unicode canonical decomposition.
    Nfd,
    /// Lowercases ASCII letters only.
    CaseFoldAscii,
    /// Lowercases with full Unicode case mapping.
    CaseFoldUnicode,
}

impl Normalization {
    /// True for the two Unicode normalization forms.
    pub fn is_unicode_form(self) -> bool {
        matches!(self, Normalization::Nfc | Normalization::Nfd)
    }

    /// True for the two case folds.
    pub fn is_case_fold(self) -> bool {
        matches!(self, Normalization::CaseFoldAscii | Normalization::CaseFoldUnicode)
    }
}

/// Applies a normalization list to `input`: the Unicode form first, then the
/// case fold. Returns a borrowed string when nothing changes the input.
pub fn normalize<'a>(input: &'a str, normalizations: &[Normalization]) -> Cow<'a, str> {
    if normalizations.is_empty() {
        return Cow::Borrowed(input);
    }
    let mut result = Cow::Borrowed(input);
    for normalization in normalizations {
        if normalization.is_unicode_form() {
            result = Cow::Owned(apply_form(&result, *normalization));
        }
    }
    for normalization in normalizations {
        match normalization {
            Normalization::CaseFoldAscii => {
                if result.bytes().any(|b| b.is_ascii_uppercase()) {
                    result = Cow::Owned(result.to_ascii_lowercase());
                }
            }
            Normalization::CaseFoldUnicode => {
                result = Cow::Owned(result.to_lowercase());
            }
            _ => {}
        }
    }
    result
}

fn apply_form(input: &str, form: Normalization) -> String {
    match form {
        Normalization::Nfc => input.nfc().collect(),
        Normalization::Nfd => input.nfd().collect(),
        _ => unreachable!("not a unicode form"),
    }
}

/// A file name with separate display and canonical forms.
///
/// Equality, ordering and hashing use the canonical form; [`fmt::Display`]
/// and directory snapshots use the display form.
#[derive(Debug, Clone)]
pub struct Name {
    display: String,
    canonical: String,
}

impl Name {
    /// Builds a name whose display and canonical forms are both `value`.
    pub fn simple(value: impl Into<String>) -> Self {
        let display = value.into();
        let canonical = display.clone();
        Name { display, canonical }
    }

    /// Builds a name from explicit display and canonical forms.
    pub fn new(display: impl Into<String>, canonical: impl Into<String>) -> Self {
        Name { display: display.into(), canonical: canonical.into() }
    }

    /// The reserved self entry, `.`.
    pub fn self_name() -> Self {
        Name::simple(".")
    }

    /// The reserved parent entry, `..`.
    pub fn parent_name() -> Self {
        Name::simple("..")
    }

    /// The form shown to users and used for sorting directory snapshots.
    pub fn display(&self) -> &str {
        &self.display
    }

    /// The form used for equality and directory lookup.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// True for the reserved `.` and `..` names, which may never be linked
    /// or unlinked as user entries.
    pub fn is_reserved(&self) -> bool {
        self.display == "." || self.display == ".."
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_uses_canonical_form() {
        let upper = Name::new("FOO", "foo");
        let lower = Name::new("foo", "foo");
        assert_eq!(upper, lower);
        assert_ne!(upper.display(), lower.display());
    }

    #[test]
    fn case_fold_ascii_leaves_non_ascii_alone() {
        let folded = normalize("AmÉlie", &[Normalization::CaseFoldAscii]);
        assert_eq!(folded, "amÉlie");
    }

    #[test]
    fn case_fold_unicode_lowers_non_ascii() {
        let folded = normalize("AmÉlie", &[Normalization::CaseFoldUnicode]);
        assert_eq!(folded, "amélie");
    }

    #[test]
    fn nfd_then_fold_matches_precomposed_and_decomposed() {
        let normalizations = [Normalization::Nfd, Normalization::CaseFoldAscii];
        let composed = normalize("Am\u{e9}lie", &normalizations);
        let decomposed = normalize("Ame\u{301}lie", &normalizations);
        assert_eq!(composed, decomposed);
    }

    #[test]
    fn no_normalizations_borrows_input() {
        let name = "plain";
        assert!(matches!(normalize(name, &[]), Cow::Borrowed(_)));
    }

    #[test]
    fn reserved_names_are_flagged() {
        assert!(Name::self_name().is_reserved());
        assert!(Name::parent_name().is_reserved());
        assert!(!Name::simple(".hidden").is_reserved());
    }
}
