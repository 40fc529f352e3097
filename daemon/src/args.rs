/// Shell-like argument strings as ordered flag → value maps.
///
/// An argument string such as `--retry-open 3 --twitch-low-latency -o "my file"`
/// is tokenized with POSIX shell-word rules and folded into an [`ArgumentMap`]:
///   - a token starting with `-` is a flag name (dashes kept);
///   - the following token becomes its value unless it also starts with `-`;
///   - any other token is an orphan and is dropped.
///
/// Insertion order is significant: merging keeps the base string's order and
/// appends new flags at the end, so the synthesized command line is stable.
use std::borrow::Cow;
use std::fmt;

/// Ordered mapping from flag (including leading dashes) to an optional value.
/// A `None` value is a bare flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentMap {
    entries: Vec<(String, Option<String>)>,
}

impl ArgumentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses an argument string. Empty or whitespace-only input yields an
    /// empty map; malformed input is tolerated, never rejected.
    pub fn parse(text: &str) -> Self {
        let tokens = tokenize(text);
        let mut map = Self::new();
        let mut i = 0;

        while i < tokens.len() {
            let token = &tokens[i];
            if !is_flag(token) {
                // Orphaned value.
                i += 1;
                continue;
            }
            match tokens.get(i + 1) {
                Some(next) if !is_flag(next) => {
                    map.insert(token.clone(), Some(next.clone()));
                    i += 2;
                }
                _ => {
                    map.insert(token.clone(), None);
                    i += 1;
                }
            }
        }
        map
    }

    /// Sets `flag` to `value`. An existing flag keeps its position and only
    /// has its value replaced; a new flag is appended.
    pub fn insert(&mut self, flag: impl Into<String>, value: Option<String>) {
        let flag = flag.into();
        match self.entries.iter_mut().find(|(f, _)| *f == flag) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((flag, value)),
        }
    }

    /// Returns `None` when the flag is absent, `Some(None)` when it is bare.
    pub fn get(&self, flag: &str) -> Option<Option<&str>> {
        self.entries
            .iter()
            .find(|(f, _)| f == flag)
            .map(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.get(flag).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(f, v)| (f.as_str(), v.as_deref()))
    }

    /// Overlays `overrides` on top of `self`: flags present in both take the
    /// override's value (or bareness) at the base position, flags only in
    /// `overrides` are appended in their own order.
    pub fn merged_with(&self, overrides: &ArgumentMap) -> ArgumentMap {
        let mut merged = self.clone();
        for (flag, value) in &overrides.entries {
            merged.insert(flag.clone(), value.clone());
        }
        merged
    }

    /// One element per flag, with the value attached to its flag and quoted
    /// when needed: `["--flag", "--option 123", "--title \"a b\""]`.
    pub fn exec_tokens(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(flag, value)| match value {
                Some(v) => format!("{flag} {}", quote_value(v)),
                None => flag.clone(),
            })
            .collect()
    }

    /// Flat argument vector suitable for a process spawn, values unquoted:
    /// `["--option", "123", "--title", "a b"]`.
    ///
    /// A value starting with `-` is attached to its flag (`--player-args=--fs`,
    /// `-a--fs`); as a separate element it would be read as another option.
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.entries.len() * 2);
        for (flag, value) in &self.entries {
            match value {
                Some(v) if is_flag(v) => argv.push(attach(flag, v)),
                Some(v) => {
                    argv.push(flag.clone());
                    argv.push(v.clone());
                }
                None => argv.push(flag.clone()),
            }
        }
        argv
    }
}

impl fmt::Display for ArgumentMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exec_tokens().join(" "))
    }
}

impl FromIterator<(String, Option<String>)> for ArgumentMap {
    fn from_iter<I: IntoIterator<Item = (String, Option<String>)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (flag, value) in iter {
            map.insert(flag, value);
        }
        map
    }
}

// ── String-level helpers ──────────────────────────────────────────────────────

/// Re-serializes `map` into an argument string.
pub fn serialize(map: &ArgumentMap) -> String {
    map.to_string()
}

/// Merges two argument strings; `overrides` wins on shared flags while the
/// base order is preserved.
pub fn merge(base: &str, overrides: &str) -> String {
    ArgumentMap::parse(base)
        .merged_with(&ArgumentMap::parse(overrides))
        .to_string()
}

/// Like [`serialize`], but one token per flag instead of a joined string.
pub fn split_for_exec(text: &str) -> Vec<String> {
    ArgumentMap::parse(text).exec_tokens()
}

/// Wraps `value` in double quotes if it contains whitespace, a quote
/// character or a backslash (or is empty), escaping `\` and `"`.
pub fn quote_value(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'));
    if !needs_quotes {
        return Cow::Borrowed(value);
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    Cow::Owned(format!("\"{escaped}\""))
}

fn is_flag(token: &str) -> bool {
    token.starts_with('-')
}

fn attach(flag: &str, value: &str) -> String {
    if flag.starts_with("--") {
        format!("{flag}={value}")
    } else {
        format!("{flag}{value}")
    }
}

// ── Tokenizer ─────────────────────────────────────────────────────────────────

/// Splits `text` into shell words.
///
/// - Whitespace outside quotes separates words.
/// - `'…'` is taken literally.
/// - `"…"` allows `\` to escape `\`, `"`, `$`, `` ` `` and newline.
/// - Outside quotes, `\` escapes the next character.
/// - `""` and `''` produce an empty word.
///
/// An unterminated quote runs to the end of the input instead of failing.
pub fn tokenize(text: &str) -> Vec<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = String::new();
    // Distinguishes an empty quoted word from "no word yet".
    let mut in_word = false;
    let mut mode = Mode::Plain;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match mode {
            Mode::Plain => match c {
                c if c.is_whitespace() => {
                    if in_word {
                        words.push(std::mem::take(&mut current));
                        in_word = false;
                    }
                }
                '\'' => {
                    mode = Mode::Single;
                    in_word = true;
                }
                '"' => {
                    mode = Mode::Double;
                    in_word = true;
                }
                '\\' => {
                    in_word = true;
                    match chars.next() {
                        // Line continuation.
                        Some('\n') => {}
                        Some(escaped) => current.push(escaped),
                        None => current.push('\\'),
                    }
                }
                c => {
                    in_word = true;
                    current.push(c);
                }
            },
            Mode::Single => match c {
                '\'' => mode = Mode::Plain,
                c => current.push(c),
            },
            Mode::Double => match c {
                '"' => mode = Mode::Plain,
                '\\' => match chars.peek() {
                    Some(&next) if matches!(next, '\\' | '"' | '$' | '`' | '\n') => {
                        chars.next();
                        if next != '\n' {
                            current.push(next);
                        }
                    }
                    _ => current.push('\\'),
                },
                c => current.push(c),
            },
        }
    }

    if in_word {
        words.push(current);
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, Option<&str>)]) -> ArgumentMap {
        entries
            .iter()
            .map(|(f, v)| (f.to_string(), v.map(str::to_string)))
            .collect()
    }

    // ── tokenize ──────────────────────────────────────────────────────────────

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("  -a  1\t--b\n2 "), vec!["-a", "1", "--b", "2"]);
    }

    #[test]
    fn tokenize_keeps_quoted_substrings_together() {
        assert_eq!(
            tokenize(r#"--title "hello world" --path 'C:\My Videos'"#),
            vec!["--title", "hello world", "--path", r"C:\My Videos"]
        );
    }

    #[test]
    fn tokenize_joins_adjacent_quoted_and_plain_parts() {
        assert_eq!(tokenize(r#"--x=a"b c"d"#), vec!["--x=ab cd"]);
    }

    #[test]
    fn tokenize_handles_escapes() {
        assert_eq!(tokenize(r#"a\ b "say \"hi\"" "c:\dir""#), vec!["a b", r#"say "hi""#, r"c:\dir"]);
    }

    #[test]
    fn tokenize_keeps_empty_quoted_word() {
        assert_eq!(tokenize(r#"--name "" -x"#), vec!["--name", "", "-x"]);
    }

    #[test]
    fn tokenize_tolerates_unterminated_quote() {
        assert_eq!(tokenize(r#"--title "never closed"#), vec!["--title", "never closed"]);
    }

    #[test]
    fn tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   \t ").is_empty());
    }

    // ── parse ─────────────────────────────────────────────────────────────────

    #[test]
    fn parse_flags_values_and_bare_flags() {
        let parsed = ArgumentMap::parse("--flag --option 123 -x -y hello");
        assert_eq!(
            parsed,
            map(&[("--flag", None), ("--option", Some("123")), ("-x", None), ("-y", Some("hello"))])
        );
    }

    #[test]
    fn parse_drops_orphaned_values() {
        let parsed = ArgumentMap::parse("stray --a 1 another extra --b");
        assert_eq!(parsed, map(&[("--a", Some("1")), ("--b", None)]));
    }

    #[test]
    fn parse_quoted_value() {
        let parsed = ArgumentMap::parse(r#"--message "hello world" --flag -n 42"#);
        assert_eq!(parsed.get("--message"), Some(Some("hello world")));
        assert_eq!(parsed.get("--flag"), Some(None));
        assert_eq!(parsed.get("-n"), Some(Some("42")));
        assert_eq!(parsed.get("--missing"), None);
    }

    #[test]
    fn parse_repeated_flag_keeps_first_position_last_value() {
        let parsed = ArgumentMap::parse("--a 1 --b --a 2");
        assert_eq!(parsed, map(&[("--a", Some("2")), ("--b", None)]));
    }

    #[test]
    fn parse_empty_input_is_empty_map() {
        assert!(ArgumentMap::parse("").is_empty());
        assert!(ArgumentMap::parse("   ").is_empty());
    }

    // ── serialize ─────────────────────────────────────────────────────────────

    #[test]
    fn serialize_quotes_values_with_whitespace_or_quotes() {
        let m = map(&[
            ("--plain", Some("value")),
            ("--spaced", Some("two words")),
            ("--dq", Some(r#"say "hi""#)),
            ("--sq", Some("it's")),
            ("--bare", None),
        ]);
        assert_eq!(
            serialize(&m),
            r#"--plain value --spaced "two words" --dq "say \"hi\"" --sq "it's" --bare"#
        );
    }

    #[test]
    fn serialize_quotes_values_with_backslashes() {
        let parsed = ArgumentMap::parse(r#"--player "C:\mpv\mpv.exe" --x 1"#);
        assert_eq!(parsed.get("--player"), Some(Some(r"C:\mpv\mpv.exe")));
        assert_eq!(serialize(&parsed), r#"--player "C:\\mpv\\mpv.exe" --x 1"#);
        assert_eq!(
            ArgumentMap::parse(&serialize(&parsed)).get("--player"),
            Some(Some(r"C:\mpv\mpv.exe"))
        );
    }

    #[test]
    fn serialize_empty_map_is_empty_string() {
        assert_eq!(serialize(&ArgumentMap::new()), "");
    }

    #[test]
    fn serialize_then_parse_preserves_map() {
        let inputs = [
            r#"--message 'hello world' --count 5"#,
            r#"--title "a \"quoted\" word" -x"#,
            r#"--path "C:\Program Files\mpv" --empty """#,
            r#"--player "C:\mpv\mpv.exe" --x 1"#,
            "--player-args 'it'\\''s here'",
        ];
        for input in inputs {
            let parsed = ArgumentMap::parse(input);
            assert_eq!(ArgumentMap::parse(&serialize(&parsed)), parsed, "input: {input}");
        }
    }

    // ── merge ─────────────────────────────────────────────────────────────────

    #[test]
    fn merge_overrides_in_place_and_appends_new_flags() {
        let merged = merge("--flag --option 123 -x -y hello", "--option 456 -z");
        assert_eq!(merged, "--flag --option 456 -x -y hello -z");
    }

    #[test]
    fn merge_turns_bare_flag_into_valued_flag() {
        let merged = merge("--verbose --output file.txt", "--verbose info --debug");
        assert_eq!(merged, "--verbose info --output file.txt --debug");
    }

    #[test]
    fn merge_turns_valued_flag_into_bare_flag() {
        let merged = merge("--output file.txt --quiet", "--output");
        assert_eq!(merged, "--output --quiet");
    }

    #[test]
    fn merge_keeps_base_order_for_every_shared_flag() {
        let merged = merge("-a 1 --beta 2 -c -ab value", "--beta 3 -d 4 -ab newvalue");
        assert_eq!(merged, "-a 1 --beta 3 -c -ab newvalue -d 4");
    }

    #[test]
    fn merge_requotes_values_with_spaces() {
        let merged = merge(r#"--message "hello world" --count 5"#, r#"--message "goodbye universe""#);
        assert_eq!(merged, r#"--message "goodbye universe" --count 5"#);
    }

    #[test]
    fn merge_with_empty_sides() {
        assert_eq!(merge("--flag --option 123", ""), "--flag --option 123");
        assert_eq!(merge("", "--x 1"), "--x 1");
        assert_eq!(merge("", ""), "");
    }

    // ── split_for_exec / to_argv ──────────────────────────────────────────────

    #[test]
    fn split_for_exec_attaches_values_to_flags() {
        assert_eq!(
            split_for_exec("--flag --option 123 -x -y hello"),
            vec!["--flag", "--option 123", "-x", "-y hello"]
        );
    }

    #[test]
    fn split_for_exec_requotes_values() {
        assert_eq!(
            split_for_exec(r#"--message "hello world" --flag -n 42"#),
            vec![r#"--message "hello world""#, "--flag", "-n 42"]
        );
    }

    #[test]
    fn split_for_exec_blank_input() {
        assert!(split_for_exec("  ").is_empty());
    }

    #[test]
    fn to_argv_flattens_without_quoting() {
        let m = ArgumentMap::parse(r#"--title "a b" --bare -n 1"#);
        assert_eq!(m.to_argv(), vec!["--title", "a b", "--bare", "-n", "1"]);
    }

    #[test]
    fn to_argv_attaches_dash_leading_values() {
        let mut m = ArgumentMap::new();
        m.insert("--player-args", Some("--no-border".to_string()));
        m.insert("-a", Some("--fs --volume 50".to_string()));
        m.insert("--retry-open", Some("3".to_string()));
        assert_eq!(
            m.to_argv(),
            vec!["--player-args=--no-border", "-a--fs --volume 50", "--retry-open", "3"]
        );
    }
}
