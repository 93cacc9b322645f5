//! Abbreviation patterns.
//!
//! A pattern is a whitespace-separated list of words. Each word is a
//! mandatory literal prefix optionally followed by a parenthesised run that
//! may be truncated from the right: `di(splay)` accepts `di`, `dis`, ...,
//! `display`. A final `\S+` word captures the rest of the line as the
//! command's arguments. Matching is case-sensitive and anchored to the full
//! line.

use regex::Regex;

/// Free-form argument marker, only valid as the last word.
pub const ARGS_TOKEN: &str = r"\S+";

/// One word of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternWord {
    /// Mandatory prefix.
    pub required: String,
    /// Optional continuation, truncatable from the right.
    pub optional: String,
}

impl PatternWord {
    /// Every accepted spelling, shortest first.
    pub fn spellings(&self) -> Vec<String> {
        let mut out = vec![self.required.clone()];
        let mut acc = self.required.clone();
        for ch in self.optional.chars() {
            acc.push(ch);
            out.push(acc.clone());
        }
        out
    }

    fn to_regex(&self) -> String {
        let mut optional = String::new();
        for ch in self.optional.chars().rev() {
            optional = format!("(?:{}{optional})?", regex::escape(&ch.to_string()));
        }
        format!("{}{optional}", regex::escape(&self.required))
    }
}

/// A compiled abbreviation pattern.
#[derive(Debug, Clone)]
pub struct CommandPattern {
    source: String,
    words: Vec<PatternWord>,
    takes_args: bool,
    regex: Regex,
}

impl CommandPattern {
    /// Parses and compiles `source`. The error string says what is wrong.
    pub fn compile(source: &str) -> Result<Self, String> {
        let tokens = source.split_whitespace().collect::<Vec<_>>();
        if tokens.is_empty() {
            return Err("pattern is empty".to_string());
        }
        let mut words = Vec::with_capacity(tokens.len());
        let mut takes_args = false;
        for (idx, token) in tokens.iter().enumerate() {
            if *token == ARGS_TOKEN {
                if idx + 1 != tokens.len() {
                    return Err(format!("'{ARGS_TOKEN}' is only allowed as the final word"));
                }
                if idx == 0 {
                    return Err(format!("'{ARGS_TOKEN}' needs at least one literal word"));
                }
                takes_args = true;
                continue;
            }
            words.push(parse_word(token)?);
        }

        let body = words
            .iter()
            .map(PatternWord::to_regex)
            .collect::<Vec<_>>()
            .join(r"\s+");
        let tail = if takes_args { r"(?:\s+(.*?))?" } else { "" };
        let expr = format!(r"^\s*{body}{tail}\s*$");
        let regex = Regex::new(&expr).map_err(|err| err.to_string())?;

        Ok(Self {
            source: source.to_string(),
            words,
            takes_args,
            regex,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Anchored regular expression the pattern compiles to.
    pub fn as_regex(&self) -> &str {
        self.regex.as_str()
    }

    pub fn words(&self) -> &[PatternWord] {
        &self.words
    }

    pub fn takes_args(&self) -> bool {
        self.takes_args
    }

    /// Returns the captured argument string if `line` matches.
    ///
    /// Arguments are trimmed; a command written without arguments yields an
    /// empty string.
    pub fn match_line(&self, line: &str) -> Option<String> {
        let caps = self.regex.captures(line)?;
        Some(
            caps.get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default(),
        )
    }

    /// Shortest accepted spelling.
    pub fn shortest(&self) -> String {
        self.words
            .iter()
            .map(|word| word.required.clone())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Fully spelled-out form.
    pub fn longest(&self) -> String {
        self.words
            .iter()
            .map(|word| format!("{}{}", word.required, word.optional))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spellings obtained by truncating one word at a time while the others
    /// stay fully spelled out, plus the all-shortest form.
    pub fn abbreviations(&self) -> Vec<String> {
        let full = self
            .words
            .iter()
            .map(|word| format!("{}{}", word.required, word.optional))
            .collect::<Vec<_>>();
        let mut out = Vec::new();
        for (idx, word) in self.words.iter().enumerate() {
            for spelling in word.spellings() {
                let mut line = full.clone();
                line[idx] = spelling;
                let line = line.join(" ");
                if !out.contains(&line) {
                    out.push(line);
                }
            }
        }
        let shortest = self.shortest();
        if !out.contains(&shortest) {
            out.push(shortest);
        }
        out
    }
}

fn parse_word(token: &str) -> Result<PatternWord, String> {
    let Some(open) = token.find('(') else {
        if token.contains(')') {
            return Err(format!("unbalanced ')' in '{token}'"));
        }
        return Ok(PatternWord {
            required: token.to_string(),
            optional: String::new(),
        });
    };
    if !token.ends_with(')') {
        return Err(format!("optional run must close the word in '{token}'"));
    }
    let required = &token[..open];
    let optional = &token[open + 1..token.len() - 1];
    if required.is_empty() {
        return Err(format!("word '{token}' has no mandatory prefix"));
    }
    if optional.is_empty() || optional.contains(['(', ')']) {
        return Err(format!("malformed optional run in '{token}'"));
    }
    Ok(PatternWord {
        required: required.to_string(),
        optional: optional.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_run_accepts_every_truncation() {
        let pattern = CommandPattern::compile("di(splay)").expect("compile");
        for line in ["di", "dis", "disp", "displ", "displa", "display"] {
            assert_eq!(pattern.match_line(line), Some(String::new()), "{line}");
        }
        assert_eq!(pattern.match_line("d"), None);
        assert_eq!(pattern.match_line("displayx"), None);
        assert_eq!(pattern.match_line("dsplay"), None);
    }

    #[test]
    fn trailing_args_are_captured_and_trimmed() {
        let pattern = CommandPattern::compile(r"di(splay) b(oard) \S+").expect("compile");
        assert_eq!(pattern.match_line("display board 0"), Some("0".to_string()));
        assert_eq!(pattern.match_line("  di  b   0 1  "), Some("0 1".to_string()));
        assert_eq!(pattern.match_line("display board"), Some(String::new()));
        assert_eq!(pattern.match_line("display boardx 0"), None);
    }

    #[test]
    fn literal_characters_are_escaped() {
        let pattern = CommandPattern::compile("dba(-profile) a(dd)").expect("compile");
        assert!(pattern.match_line("dba-profile add").is_some());
        assert!(pattern.match_line("dba- a").is_some());
        assert!(pattern.match_line("dbaXprofile add").is_none());
    }

    #[test]
    fn matching_is_case_sensitive() {
        let pattern = CommandPattern::compile("en(able)").expect("compile");
        assert!(pattern.match_line("ENABLE").is_none());
    }

    #[test]
    fn shortest_and_longest_forms() {
        let pattern = CommandPattern::compile(r"di(splay) ont i(nfo) \S+").expect("compile");
        assert_eq!(pattern.shortest(), "di ont i");
        assert_eq!(pattern.longest(), "display ont info");
        assert!(pattern.takes_args());
        assert!(pattern.abbreviations().contains(&"disp ont info".to_string()));
    }

    #[test]
    fn compile_rejects_malformed_patterns() {
        assert!(CommandPattern::compile("").is_err());
        assert!(CommandPattern::compile(r"\S+ board").is_err());
        assert!(CommandPattern::compile(r"\S+").is_err());
        assert!(CommandPattern::compile("(display)").is_err());
        assert!(CommandPattern::compile("di(sp)lay").is_err());
        assert!(CommandPattern::compile("di(splay").is_err());
        assert!(CommandPattern::compile("dis)").is_err());
    }
}
