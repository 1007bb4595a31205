mod builder;

use std::{borrow::Borrow, collections::BTreeMap, fmt, str::FromStr};

use crate::error::{ReportError, ReportResult};

pub use builder::{AnalysisSanitizer, MarkdownMarkers, TokenMapBuilder, build_token_map};

pub const TOKEN_OPEN: &str = "{{";
pub const TOKEN_CLOSE: &str = "}}";

/// A delimited placeholder such as `{{NOME_ALUNO}}`. Matching is exact and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(String);

impl Token {
    /// Build a token from its bare name (`NOME_ALUNO`) or its delimited form.
    pub fn new(name: &str) -> ReportResult<Self> {
        let bare = name
            .strip_prefix(TOKEN_OPEN)
            .and_then(|rest| rest.strip_suffix(TOKEN_CLOSE))
            .unwrap_or(name);
        let valid = !bare.is_empty()
            && bare
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !valid {
            return Err(ReportError::InvalidToken(name.to_string()));
        }
        Ok(Self(format!("{TOKEN_OPEN}{bare}{TOKEN_CLOSE}")))
    }

    /// The delimited form, exactly as it appears in a template.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare name without delimiters.
    pub fn name(&self) -> &str {
        &self.0[TOKEN_OPEN.len()..self.0.len() - TOKEN_CLOSE.len()]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl FromStr for Token {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::new(s)
    }
}

/// Locale used for sentinel values of absent fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    English,
    Portuguese,
}

impl Locale {
    pub fn not_informed(self) -> &'static str {
        match self {
            Locale::English => "Not informed",
            Locale::Portuguese => "Não informado",
        }
    }

    pub fn analysis_unavailable(self) -> &'static str {
        match self {
            Locale::English => "Analysis not available",
            Locale::Portuguese => "Análise não disponível.",
        }
    }
}

impl FromStr for Locale {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "en" | "en-us" | "en-gb" | "english" => Ok(Locale::English),
            "pt" | "pt-br" | "pt_br" | "portuguese" => Ok(Locale::Portuguese),
            other => Err(format!("unsupported locale `{other}`")),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locale::English => write!(f, "en"),
            Locale::Portuguese => write!(f, "pt-BR"),
        }
    }
}

/// Per-token occurrence counts, keyed by canonical token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenHits {
    counts: BTreeMap<Token, usize>,
}

impl TokenHits {
    pub fn record(&mut self, token: &Token) {
        *self.counts.entry(token.clone()).or_default() += 1;
    }

    pub fn count(&self, token: &Token) -> usize {
        self.counts.get(token).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn merge(&mut self, other: TokenHits) {
        for (token, count) in other.counts {
            *self.counts.entry(token).or_default() += count;
        }
    }
}

/// Finalized token → value mapping. Built once per record and never mutated
/// afterwards; aliases resolve to the value of their canonical token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenMap {
    values: BTreeMap<Token, String>,
    aliases: BTreeMap<Token, Token>,
}

impl TokenMap {
    /// Build a map from explicit pairs. Every token must be unique.
    pub fn from_pairs<I, K, V>(pairs: I) -> ReportResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = TokenMap::default();
        for (name, value) in pairs {
            let token = Token::new(name.as_ref())?;
            if map.values.contains_key(&token) {
                return Err(ReportError::InvalidToken(format!(
                    "duplicate token {token}"
                )));
            }
            map.values.insert(token, value.into());
        }
        Ok(map)
    }

    pub(crate) fn insert(&mut self, token: Token, value: String) {
        self.aliases.remove(&token);
        self.values.insert(token, value);
    }

    pub(crate) fn insert_alias(&mut self, alias: Token, canonical: &Token) {
        if alias != *canonical && !self.values.contains_key(&alias) {
            self.aliases.insert(alias, canonical.clone());
        }
    }

    /// Value for a token or any of its aliases.
    pub fn get(&self, token: &str) -> Option<&str> {
        let canonical = self.aliases.get(token).map(Token::as_str).unwrap_or(token);
        self.values.get(canonical).map(String::as_str)
    }

    /// Canonical tokens and their values, in token order.
    pub fn entries(&self) -> impl Iterator<Item = (&Token, &str)> {
        self.values
            .iter()
            .map(|(token, value)| (token, value.as_str()))
    }

    /// Every recognized token, canonical and alias.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.values.keys().chain(self.aliases.keys())
    }

    pub fn aliases_of(&self, canonical: &Token) -> Vec<Token> {
        self.aliases
            .iter()
            .filter(|(_, target)| *target == canonical)
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Recognized tokens occurring in `text`, in order of appearance.
    pub fn find_tokens<'a>(&'a self, text: &'a str) -> impl Iterator<Item = (usize, &'a Token)> + 'a {
        let mut cursor = 0;
        std::iter::from_fn(move || {
            while let Some(offset) = text[cursor..].find(TOKEN_OPEN) {
                let start = cursor + offset;
                if let Some(token) = self.token_at(&text[start..]) {
                    cursor = start + token.len();
                    return Some((start, token));
                }
                cursor = start + 1;
            }
            cursor = text.len();
            None
        })
    }

    /// Replace every recognized token in one left-to-right pass. Inserted
    /// values are not re-scanned. Returns `None` when nothing matched.
    pub fn replace_in(&self, text: &str, hits: &mut TokenHits) -> Option<String> {
        let mut output = String::with_capacity(text.len());
        let mut last = 0;
        let mut replaced = false;

        for (start, token) in self.find_tokens(text) {
            let canonical = self.canonical(token);
            let Some(value) = self.values.get(canonical) else {
                continue;
            };
            output.push_str(&text[last..start]);
            output.push_str(value);
            last = start + token.len();
            hits.record(canonical);
            replaced = true;
        }

        if !replaced {
            return None;
        }
        output.push_str(&text[last..]);
        Some(output)
    }

    /// Canonical token and value for a recognized token or alias.
    pub fn resolve(&self, token: &Token) -> Option<(&Token, &str)> {
        self.values
            .get_key_value(self.canonical(token))
            .map(|(canonical, value)| (canonical, value.as_str()))
    }

    pub fn canonical<'a>(&'a self, token: &'a Token) -> &'a Token {
        self.aliases.get(token).unwrap_or(token)
    }

    fn token_at(&self, rest: &str) -> Option<&Token> {
        let end = rest[TOKEN_OPEN.len()..].find(TOKEN_CLOSE)? + TOKEN_OPEN.len() + TOKEN_CLOSE.len();
        let candidate = &rest[..end];
        self.values
            .get_key_value(candidate)
            .map(|(token, _)| token)
            .or_else(|| self.aliases.get_key_value(candidate).map(|(token, _)| token))
    }
}

/// Every `{{...}}` placeholder in `text`, recognized or not, as byte ranges.
pub fn find_placeholders(text: &str) -> Vec<std::ops::Range<usize>> {
    let mut found = Vec::new();
    let mut cursor = 0;
    while let Some(offset) = text[cursor..].find(TOKEN_OPEN) {
        let start = cursor + offset;
        let body = start + TOKEN_OPEN.len();
        let Some(close) = text[body..].find(TOKEN_CLOSE) else {
            break;
        };
        let inner = &text[body..body + close];
        if !inner.is_empty() && !inner.contains(TOKEN_OPEN) {
            let end = body + close + TOKEN_CLOSE.len();
            found.push(start..end);
            cursor = end;
        } else {
            cursor = start + 1;
        }
    }
    found
}
