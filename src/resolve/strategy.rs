//! Resolution strategies, tried in order by the resolver.
//!
//! Each strategy looks the query up against the index in its own way and
//! records every lookup it performed in the attempt trail, so a report can
//! show exactly which lookups were made before a match was found.

use crate::model::IndexedSymbol;
use crate::source::StaticIndex;
use anyhow::Result;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMethod {
    Exact,
    CaseInsensitive,
    Substring,
    QualifiedName,
    ClassPrefixFallback,
    ClassMembers,
    None,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Exact => "exact",
            MatchMethod::CaseInsensitive => "case-insensitive",
            MatchMethod::Substring => "substring",
            MatchMethod::QualifiedName => "qualified-name",
            MatchMethod::ClassPrefixFallback => "class-prefix-fallback",
            MatchMethod::ClassMembers => "class-members",
            MatchMethod::None => "none",
        }
    }
}

/// Primitive index lookup used by the strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LookupKind {
    Exact,
    CaseInsensitive,
    Substring,
    ClassName,
}

/// One lookup made while resolving.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attempt {
    pub method: MatchMethod,
    pub lookup: LookupKind,
    pub term: String,
    pub matched: usize,
    /// Matches were found but left to a later strategy.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deferred: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    pub candidate: &'a str,
    pub class_hint: Option<&'a str>,
}

/// Matches produced by a strategy together with the string that matched.
#[derive(Debug, Clone)]
pub struct StrategyHit {
    pub effective_symbol: String,
    pub matches: Vec<IndexedSymbol>,
}

pub trait ResolveStrategy: Send + Sync {
    fn method(&self) -> MatchMethod;

    /// Look `query` up. `Ok(None)` means this strategy found nothing and the
    /// next one should run.
    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>>;
}

/// `Form1`, `_init` and `Button2Click` qualify; `TForm1.Create` and
/// `a b` do not.
pub fn is_bare_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// `TForm1.Button2Click` -> `Button2Click`.
pub fn bare_name(value: &str) -> Option<&str> {
    let (_, tail) = value.trim().rsplit_once('.')?;
    let tail = tail.trim();
    if tail.is_empty() { None } else { Some(tail) }
}

fn run_lookup(
    method: MatchMethod,
    kind: LookupKind,
    term: &str,
    index: &dyn StaticIndex,
    trail: &mut Vec<Attempt>,
) -> Result<Vec<IndexedSymbol>> {
    let mut matches = match kind {
        LookupKind::Exact => index.symbols_named(term)?,
        LookupKind::CaseInsensitive => index.symbols_named_nocase(term)?,
        LookupKind::Substring => index.symbols_containing(term)?,
        LookupKind::ClassName => index.symbols_in_class(term)?,
    };
    matches.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    matches.dedup_by(|a, b| a.id == b.id);
    trail.push(Attempt {
        method,
        lookup: kind,
        term: term.to_string(),
        matched: matches.len(),
        deferred: false,
    });
    Ok(matches)
}

/// Exact, then case-insensitive, then substring, against one term.
fn name_cascade(
    method: MatchMethod,
    term: &str,
    index: &dyn StaticIndex,
    trail: &mut Vec<Attempt>,
) -> Result<Option<StrategyHit>> {
    for kind in [
        LookupKind::Exact,
        LookupKind::CaseInsensitive,
        LookupKind::Substring,
    ] {
        let matches = run_lookup(method, kind, term, index, trail)?;
        if !matches.is_empty() {
            return Ok(Some(StrategyHit {
                effective_symbol: term.to_string(),
                matches,
            }));
        }
    }
    Ok(None)
}

fn single_lookup(
    method: MatchMethod,
    kind: LookupKind,
    query: &Query<'_>,
    index: &dyn StaticIndex,
    trail: &mut Vec<Attempt>,
) -> Result<Option<StrategyHit>> {
    let matches = run_lookup(method, kind, query.candidate, index, trail)?;
    if matches.is_empty() {
        return Ok(None);
    }
    Ok(Some(StrategyHit {
        effective_symbol: query.candidate.to_string(),
        matches,
    }))
}

pub struct ExactMatch;

impl ResolveStrategy for ExactMatch {
    fn method(&self) -> MatchMethod {
        MatchMethod::Exact
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        single_lookup(self.method(), LookupKind::Exact, query, index, trail)
    }
}

pub struct CaseInsensitiveMatch;

impl ResolveStrategy for CaseInsensitiveMatch {
    fn method(&self) -> MatchMethod {
        MatchMethod::CaseInsensitive
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        single_lookup(
            self.method(),
            LookupKind::CaseInsensitive,
            query,
            index,
            trail,
        )
    }
}

/// Indexed name contains the candidate. When one of the contained names is
/// exactly a configured prefix plus the candidate, the whole step yields to
/// [`ClassPrefixFallback`] so the prefixed class is not hidden behind
/// unrelated longer names.
pub struct SubstringMatch {
    pub class_prefixes: Vec<String>,
}

impl SubstringMatch {
    fn is_prefixed_form(&self, function_name: &str, candidate: &str) -> bool {
        self.class_prefixes.iter().any(|prefix| {
            function_name.len() == prefix.len() + candidate.len()
                && function_name.eq_ignore_ascii_case(&format!("{prefix}{candidate}"))
        })
    }
}

impl ResolveStrategy for SubstringMatch {
    fn method(&self) -> MatchMethod {
        MatchMethod::Substring
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        let hit = single_lookup(self.method(), LookupKind::Substring, query, index, trail)?;
        let defers = hit.as_ref().is_some_and(|hit| {
            is_bare_identifier(query.candidate)
                && hit
                    .matches
                    .iter()
                    .any(|s| self.is_prefixed_form(&s.function_name, query.candidate))
        });
        if defers {
            if let Some(last) = trail.last_mut() {
                last.deferred = true;
            }
            return Ok(None);
        }
        Ok(hit)
    }
}

/// Flow stores often record `Class.Method` while indexers keep bare names.
pub struct QualifiedNameMatch;

impl ResolveStrategy for QualifiedNameMatch {
    fn method(&self) -> MatchMethod {
        MatchMethod::QualifiedName
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        let Some(bare) = bare_name(query.candidate) else {
            return Ok(None);
        };
        name_cascade(self.method(), bare, index, trail)
    }
}

/// Visual-form ecosystems reference a form by its design-time name (`Form1`)
/// while the indexed class carries an implementation prefix (`TForm1`).
pub struct ClassPrefixFallback {
    pub class_prefixes: Vec<String>,
}

impl ResolveStrategy for ClassPrefixFallback {
    fn method(&self) -> MatchMethod {
        MatchMethod::ClassPrefixFallback
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        if !is_bare_identifier(query.candidate) {
            return Ok(None);
        }
        for prefix in &self.class_prefixes {
            let term = format!("{prefix}{}", query.candidate);
            if let Some(hit) = name_cascade(self.method(), &term, index, trail)? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

/// Fan out to every method of the root's class when the root itself is not
/// an indexed function (a form whose behaviour lives in its handlers).
pub struct ClassMembers {
    pub class_prefixes: Vec<String>,
}

impl ClassMembers {
    fn class_candidates(&self, query: &Query<'_>) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut push = |name: String| {
            if !name.is_empty() && !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        };
        if let Some(hint) = query.class_hint {
            push(hint.trim().to_string());
        }
        if is_bare_identifier(query.candidate) {
            push(query.candidate.to_string());
            for prefix in &self.class_prefixes {
                push(format!("{prefix}{}", query.candidate));
            }
        }
        names
    }
}

impl ResolveStrategy for ClassMembers {
    fn method(&self) -> MatchMethod {
        MatchMethod::ClassMembers
    }

    fn resolve(
        &self,
        query: &Query<'_>,
        index: &dyn StaticIndex,
        trail: &mut Vec<Attempt>,
    ) -> Result<Option<StrategyHit>> {
        for class_name in self.class_candidates(query) {
            let matches = run_lookup(
                self.method(),
                LookupKind::ClassName,
                &class_name,
                index,
                trail,
            )?;
            if !matches.is_empty() {
                return Ok(Some(StrategyHit {
                    effective_symbol: class_name,
                    matches,
                }));
            }
        }
        Ok(None)
    }
}
