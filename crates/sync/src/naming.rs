//! Canonical local names for remote log files.
//!
//! A remote file `<route>/<segment>/rlog` of the device with dongle id `D1`
//! lives in the archive as `D1|<route>|<segment>--rlog`: the dongle id, each
//! directory component joined by the route separator, then `--` and the leaf
//! name. Every component is sanitised first so the result is a single valid
//! file name on any filesystem the archive might be copied to.
//!
//! The mapping is a pure function of its inputs. It is the only place names
//! are derived, so the delta computation and the canonicalizer always agree on
//! what a remote file is called locally.

use rlogsync_config::NamingSettings;

/// Separator between the dongle id and route segments, and between segments.
pub const ROUTE_SEPARATOR: char = '|';
/// Route separator for filesystems that reject `|`.
pub const PORTABLE_ROUTE_SEPARATOR: char = '_';
/// Separator before the leaf file name.
pub const LEAF_SEPARATOR: &str = "--";
/// Replacement for forbidden characters.
pub const SUBSTITUTE: char = '_';

const FORBIDDEN: [char; 9] = ['<', '>', ':', '"', '|', '?', '*', '/', '\\'];
const MAX_EXTENSION_LEN: usize = 16;

/// Maps remote relative paths to canonical archive names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    route_separator: char,
    max_length: usize,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self::from(&NamingSettings::default())
    }
}

impl From<&NamingSettings> for NamingScheme {
    fn from(settings: &NamingSettings) -> Self {
        Self {
            route_separator: match settings.portable {
                true => PORTABLE_ROUTE_SEPARATOR,
                false => ROUTE_SEPARATOR,
            },
            max_length: settings.max_length,
        }
    }
}

impl NamingScheme {
    /// Canonical name of `relative_path` (relative to the remote root,
    /// `/`-separated) for the device `dongle_id`.
    ///
    /// ```
    /// use rlogsync_sync::naming::NamingScheme;
    ///
    /// let naming = NamingScheme::default();
    /// assert_eq!(naming.canonicalize("D1", "a/b/rlog"), "D1|a|b--rlog");
    /// assert_eq!(naming.canonicalize("D1", "rlog.bz2"), "D1--rlog.bz2");
    /// ```
    pub fn canonicalize(&self, dongle_id: &str, relative_path: &str) -> String {
        let mut components: Vec<&str> =
            relative_path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
        let leaf = components.pop().unwrap_or_default();

        let mut name = sanitize(dongle_id);
        for segment in components {
            name.push(self.route_separator);
            name.push_str(&sanitize(segment));
        }
        name.push_str(LEAF_SEPARATOR);
        name.push_str(&sanitize(leaf));
        self.truncate(name)
    }

    /// Whether `name` is already a canonical name for `dongle_id`.
    pub fn is_canonical(&self, dongle_id: &str, name: &str) -> bool {
        let prefix = sanitize(dongle_id);
        name.strip_prefix(prefix.as_str())
            .is_some_and(|rest| rest.starts_with(self.route_separator) || rest.starts_with(LEAF_SEPARATOR))
    }

    /// Cut over-long names to `max_length` bytes.
    ///
    /// The extension of the leaf is kept and a CRC-32 of the full name is
    /// inserted before it, so distinct long names stay distinct and the same
    /// long name always truncates the same way.
    fn truncate(&self, name: String) -> String {
        if name.len() <= self.max_length {
            return name;
        }
        let leaf_start = name.rfind(LEAF_SEPARATOR).map_or(0, |i| i + LEAF_SEPARATOR.len());
        let extension = name[leaf_start..]
            .rfind('.')
            .map(|i| &name[leaf_start + i..])
            .filter(|ext| ext.len() <= MAX_EXTENSION_LEN)
            .unwrap_or_default();
        let suffix = format!("~{:08x}{extension}", crc32fast::hash(name.as_bytes()));
        let keep = self.max_length.saturating_sub(suffix.len());
        format!("{}{suffix}", &name[..name.floor_char_boundary(keep)])
    }
}

/// Replace characters that are not allowed in a file name with
/// [`SUBSTITUTE`], and neutralise `..`.
pub fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match FORBIDDEN.contains(&c) || c.is_control() {
            true => SUBSTITUTE,
            false => c,
        })
        .collect::<String>()
        .replace("..", "__")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn scheme(portable: bool, max_length: usize) -> NamingScheme {
        NamingScheme::from(&NamingSettings { portable, max_length })
    }

    #[rstest]
    #[case("a/b/rlog", "D1|a|b--rlog")]
    #[case("a/b/rlog.bz2", "D1|a|b--rlog.bz2")]
    #[case("c/rlog", "D1|c--rlog")]
    #[case("rlog", "D1--rlog")]
    #[case("/a//b/./rlog", "D1|a|b--rlog")]
    #[case("00000012--a1b2c3d4e5--0/rlog", "D1|00000012--a1b2c3d4e5--0--rlog")]
    #[case("a:b/r*log", "D1|a_b--r_log")]
    #[case("../rlog", "D1|__--rlog")]
    #[case("a/..rlog", "D1|a--__rlog")]
    #[case("a/r\u{7}log", "D1|a--r_log")]
    #[case("a\\b/rlog", "D1|a_b--rlog")]
    #[case("", "D1--")]
    fn canonical_names(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(NamingScheme::default().canonicalize("D1", path), expected);
    }

    #[test]
    fn deterministic() {
        let naming = NamingScheme::default();
        let first = naming.canonicalize("1a2b3c4d", "2024-05-01--10-00-00/3/rlog");
        for _ in 0..3 {
            assert_eq!(naming.canonicalize("1a2b3c4d", "2024-05-01--10-00-00/3/rlog"), first);
        }
    }

    #[test]
    fn portable_separator() {
        assert_eq!(scheme(true, 200).canonicalize("D1", "a/b/rlog"), "D1_a_b--rlog");
    }

    #[test]
    fn dongle_id_is_sanitised() {
        assert_eq!(NamingScheme::default().canonicalize("D|1", "rlog"), "D_1--rlog");
    }

    #[rstest]
    #[case("D1|a|b--rlog", true)]
    #[case("D1--rlog", true)]
    #[case("D12|a--rlog", false)]
    #[case("a|b--rlog", false)]
    #[case("rlog", false)]
    fn canonical_detection(#[case] name: &str, #[case] expected: bool) {
        assert_eq!(NamingScheme::default().is_canonical("D1", name), expected);
    }

    #[test]
    fn truncation_keeps_extension() {
        let naming = scheme(false, 40);
        let long = "x".repeat(60);
        let name = naming.canonicalize("D1", &format!("{long}/rlog.bz2"));
        assert_eq!(name.len(), 40);
        assert!(name.ends_with(".bz2"));
        assert!(name.starts_with("D1|xxx"));
        assert_eq!(name, naming.canonicalize("D1", &format!("{long}/rlog.bz2")));
    }

    #[test]
    fn truncation_distinguishes_names() {
        let naming = scheme(false, 40);
        let long = "x".repeat(60);
        let first = naming.canonicalize("D1", &format!("{long}/a/rlog"));
        let second = naming.canonicalize("D1", &format!("{long}/b/rlog"));
        assert_eq!(first.len(), 40);
        assert_ne!(first, second);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let naming = scheme(false, 30);
        let name = naming.canonicalize("D1", &format!("{}/rlog", "é".repeat(40)));
        assert!(name.len() <= 30);
        assert!(name.contains('~'));
    }

    #[test]
    fn short_names_untouched() {
        assert_eq!(scheme(false, 12).canonicalize("D1", "a/rlog"), "D1|a--rlog");
    }
}
