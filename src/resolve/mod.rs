//! Symbol resolution against the static index.
//!
//! The resolver runs an ordered chain of [`ResolveStrategy`] values and stops
//! at the first one that yields matches. "Not found" is a normal outcome
//! (`MatchMethod::None`); only failures of the index itself are errors.

pub mod strategy;

pub use strategy::{
    Attempt, CaseInsensitiveMatch, ClassMembers, ClassPrefixFallback, ExactMatch, LookupKind,
    MatchMethod, QualifiedNameMatch, Query, ResolveStrategy, StrategyHit, SubstringMatch,
};

use crate::error::{ValidateError, ValidateResult};
use crate::model::IndexedSymbol;
use crate::scope::ProjectScope;
use crate::source::StaticIndex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    pub query_symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_hint: Option<String>,
    pub method: MatchMethod,
    /// The string that actually matched, when it differs from the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_symbol: Option<String>,
    pub matches: Vec<IndexedSymbol>,
    pub ambiguous: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub narrowed_by_class: bool,
    /// Project the matches were scoped to, when one was derived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<ProjectScope>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub narrowed_by_scope: bool,
    pub attempts: Vec<Attempt>,
}

impl ResolutionResult {
    pub fn is_resolved(&self) -> bool {
        self.method != MatchMethod::None && !self.matches.is_empty()
    }

    /// Distinct function names of the matches, in match order.
    pub fn root_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for symbol in &self.matches {
            if !names
                .iter()
                .any(|n| n.eq_ignore_ascii_case(&symbol.function_name))
            {
                names.push(symbol.function_name.clone());
            }
        }
        names
    }
}

pub struct Resolver {
    strategies: Vec<Box<dyn ResolveStrategy>>,
}

impl Resolver {
    /// exact -> case-insensitive -> substring -> qualified-name ->
    /// class-prefix-fallback -> class-members
    pub fn standard(class_prefixes: &[String]) -> Self {
        let prefixes = class_prefixes.to_vec();
        Self::empty()
            .with_strategy(ExactMatch)
            .with_strategy(CaseInsensitiveMatch)
            .with_strategy(SubstringMatch {
                class_prefixes: prefixes.clone(),
            })
            .with_strategy(QualifiedNameMatch)
            .with_strategy(ClassPrefixFallback {
                class_prefixes: prefixes.clone(),
            })
            .with_strategy(ClassMembers {
                class_prefixes: prefixes,
            })
    }

    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Append a strategy to the end of the chain.
    pub fn with_strategy<S: ResolveStrategy + 'static>(mut self, strategy: S) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    pub fn methods(&self) -> Vec<MatchMethod> {
        self.strategies.iter().map(|s| s.method()).collect()
    }

    pub fn resolve(
        &self,
        index: &dyn StaticIndex,
        candidate: &str,
        class_hint: Option<&str>,
    ) -> ValidateResult<ResolutionResult> {
        self.resolve_scoped(index, candidate, class_hint, None)
    }

    /// Resolve, then narrow the matches to the class hint and to `scope`.
    /// Each narrowing only applies when it leaves at least one match.
    pub fn resolve_scoped(
        &self,
        index: &dyn StaticIndex,
        candidate: &str,
        class_hint: Option<&str>,
        scope: Option<&ProjectScope>,
    ) -> ValidateResult<ResolutionResult> {
        let candidate = candidate.trim();
        let class_hint = class_hint.map(str::trim).filter(|h| !h.is_empty());
        let mut result = ResolutionResult {
            query_symbol: candidate.to_string(),
            class_hint: class_hint.map(String::from),
            method: MatchMethod::None,
            effective_symbol: None,
            matches: Vec::new(),
            ambiguous: false,
            narrowed_by_class: false,
            scope: scope.cloned(),
            narrowed_by_scope: false,
            attempts: Vec::new(),
        };
        if candidate.is_empty() {
            return Ok(result);
        }

        let query = Query {
            candidate,
            class_hint,
        };
        for strategy in &self.strategies {
            let hit = strategy
                .resolve(&query, index, &mut result.attempts)
                .map_err(ValidateError::index_unavailable)?;
            let Some(hit) = hit else {
                continue;
            };
            result.method = strategy.method();
            if hit.effective_symbol != candidate {
                result.effective_symbol = Some(hit.effective_symbol);
            }
            let (matches, narrowed) = narrow_by_class(hit.matches, class_hint);
            result.narrowed_by_class = narrowed;
            let matches = match scope {
                Some(scope) if matches.len() > 1 => {
                    let (matches, narrowed) = scope.narrow(matches);
                    result.narrowed_by_scope = narrowed;
                    matches
                }
                _ => matches,
            };
            result.ambiguous = matches.len() > 1;
            result.matches = matches;
            break;
        }

        tracing::debug!(
            candidate,
            method = result.method.as_str(),
            matches = result.matches.len(),
            ambiguous = result.ambiguous,
            "symbol resolved"
        );
        Ok(result)
    }
}

/// Keep only the hinted class's symbols when that leaves something.
fn narrow_by_class(
    matches: Vec<IndexedSymbol>,
    class_hint: Option<&str>,
) -> (Vec<IndexedSymbol>, bool) {
    let Some(hint) = class_hint else {
        return (matches, false);
    };
    if matches.len() < 2 {
        return (matches, false);
    }
    let in_class: Vec<IndexedSymbol> = matches
        .iter()
        .filter(|s| {
            s.class_name
                .as_deref()
                .is_some_and(|c| c.trim().eq_ignore_ascii_case(hint))
        })
        .cloned()
        .collect();
    if in_class.is_empty() || in_class.len() == matches.len() {
        (matches, false)
    } else {
        (in_class, true)
    }
}
