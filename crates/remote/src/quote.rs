//! POSIX shell quoting for arguments embedded in remote command lines.

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '%' | '+' | '=' | ':' | ',' | '.' | '/' | '-')
}

/// Quote `value` so a POSIX shell reads it back as one literal word.
///
/// ```
/// use rlogsync_remote::quote;
///
/// assert_eq!(quote("/data/media/0/realdata"), "/data/media/0/realdata");
/// assert_eq!(quote("it's here"), r#"'it'\''s here'"#);
/// ```
pub fn quote(value: &str) -> String {
    if !value.is_empty() && value.chars().all(is_safe) {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str(r"'\''"),
            c => quoted.push(c),
        }
    }
    quoted.push('\'');
    quoted
}

/// Quote and join words into one command line.
pub(crate) fn join<I, S>(words: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    words.into_iter().map(|w| quote(w.as_ref())).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "''")]
    #[case("rlog", "rlog")]
    #[case("a b", "'a b'")]
    #[case("$(reboot)", "'$(reboot)'")]
    #[case("2024-01-01--12-00-00/0/rlog", "2024-01-01--12-00-00/0/rlog")]
    #[case("x'y", r"'x'\''y'")]
    #[case("*", "'*'")]
    fn quoting(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(quote(input), expected);
    }

    #[test]
    fn joining() {
        assert_eq!(join(["ssh", "-o", "ControlPath=/tmp/ctl dir/%C"]), "ssh -o 'ControlPath=/tmp/ctl dir/%C'");
    }
}
