//! Reachability over confidence-weighted call edges.
//!
//! Names are expanded in order of the best bottleneck confidence they can be
//! reached with. A path's confidence is the weakest edge on it; between
//! equally strong paths the shorter wins. A name is expanded again only when
//! it is reached with strictly fewer hops than any earlier expansion, so
//! cycles cannot loop and a stronger but longer route cannot use up the hop
//! budget that a weaker, shorter route would have fit in.

use crate::config::Config;
use crate::error::{ValidateError, ValidateResult};
use crate::scope::ProjectScope;
use crate::source::{StaticIndex, name_key};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct ReachOptions {
    /// Only edges whose confidence exceeds this are traversed. At 0.0 every
    /// edge with any evidence counts.
    pub min_confidence: f64,
    /// Traversed edges at or below this confidence are weak evidence.
    pub weak_threshold: f64,
    pub max_hops: usize,
    pub max_visited: usize,
    #[serde(skip)]
    pub timeout: Duration,
}

impl Default for ReachOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ReachOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_confidence: 0.0,
            weak_threshold: config.weak_threshold,
            max_hops: config.max_hops,
            max_visited: config.max_visited,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn check(&self) -> ValidateResult<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ValidateError::InvalidOptions(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(0.0..=1.0).contains(&self.weak_threshold) {
            return Err(ValidateError::InvalidOptions(format!(
                "weak_threshold must be within [0, 1], got {}",
                self.weak_threshold
            )));
        }
        if self.max_hops == 0 || self.max_visited == 0 {
            return Err(ValidateError::InvalidOptions(
                "max_hops and max_visited must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn traverses(&self, confidence: f64) -> bool {
        confidence > self.min_confidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Budget {
    Hops,
    Visited,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathEdge {
    pub caller: String,
    pub callee: String,
    pub confidence: f64,
}

/// Outcome of one traversal from one root.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Traversal {
    pub root: String,
    pub reachable: bool,
    pub path: Vec<String>,
    pub edges: Vec<PathEdge>,
    pub confidence: f64,
    pub hops: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    /// Distinct names expanded.
    pub explored: usize,
}

impl Traversal {
    fn unreachable(root: &str, explored: usize, budget: Option<Budget>) -> Self {
        Self {
            root: root.to_string(),
            reachable: false,
            path: Vec::new(),
            edges: Vec::new(),
            confidence: 0.0,
            hops: 0,
            truncated: budget.is_some(),
            budget,
            explored,
        }
    }

    /// Path edges at or below `threshold`.
    pub fn weak_edges(&self, threshold: f64) -> Vec<PathEdge> {
        self.edges
            .iter()
            .filter(|e| e.confidence <= threshold)
            .cloned()
            .collect()
    }
}

/// Summary of every root tried, for the report's diagnostic trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RootAttempt {
    pub root: String,
    pub reachable: bool,
    pub confidence: f64,
    pub hops: usize,
    pub truncated: bool,
    pub explored: usize,
}

impl From<&Traversal> for RootAttempt {
    fn from(t: &Traversal) -> Self {
        Self {
            root: t.root.clone(),
            reachable: t.reachable,
            confidence: t.confidence,
            hops: t.hops,
            truncated: t.truncated,
            explored: t.explored,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reachability {
    pub target: String,
    pub best: Traversal,
    /// True when any root's traversal hit a budget without reaching.
    pub truncated: bool,
    /// First budget hit, when truncated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    pub weak_edges: Vec<PathEdge>,
    /// Caller/callee pairs dropped because the callee lives only outside
    /// the project scope.
    #[serde(skip_serializing_if = "is_zero")]
    pub out_of_scope_edges: usize,
    pub attempts: Vec<RootAttempt>,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

#[derive(Debug, Clone)]
struct OutEdge {
    key: String,
    callee: String,
    confidence: f64,
}

/// Outgoing edges fetched during one request. Each batch is read once and
/// never changes afterwards, so traversals from several roots share it.
pub struct EdgeCache<'a> {
    index: &'a dyn StaticIndex,
    scope: Option<&'a ProjectScope>,
    fetched: HashMap<String, Vec<OutEdge>>,
    callee_in_scope: HashMap<String, bool>,
    out_of_scope: usize,
}

impl<'a> EdgeCache<'a> {
    pub fn new(index: &'a dyn StaticIndex) -> Self {
        Self::scoped(index, None)
    }

    /// Drop edges whose callee is indexed, but only outside `scope`.
    /// Callees the index does not know at all are kept.
    pub fn scoped(index: &'a dyn StaticIndex, scope: Option<&'a ProjectScope>) -> Self {
        Self {
            index,
            scope,
            fetched: HashMap::new(),
            callee_in_scope: HashMap::new(),
            out_of_scope: 0,
        }
    }

    pub fn out_of_scope_edges(&self) -> usize {
        self.out_of_scope
    }

    fn in_scope(&mut self, callee_key: &str, callee: &str) -> ValidateResult<bool> {
        let Some(scope) = self.scope else {
            return Ok(true);
        };
        if let Some(&known) = self.callee_in_scope.get(callee_key) {
            return Ok(known);
        }
        let symbols = self
            .index
            .symbols_named_nocase(callee.trim())
            .map_err(ValidateError::index_unavailable)?;
        let inside = symbols.is_empty() || symbols.iter().any(|s| scope.contains(&s.file_path));
        self.callee_in_scope.insert(callee_key.to_string(), inside);
        Ok(inside)
    }

    fn outgoing(&mut self, caller: &str) -> ValidateResult<&[OutEdge]> {
        let key = name_key(caller);
        if !self.fetched.contains_key(&key) {
            let raw = self
                .index
                .outgoing_edges(caller)
                .map_err(ValidateError::index_unavailable)?;
            let mut strongest: HashMap<String, OutEdge> = HashMap::new();
            let mut dropped: HashSet<String> = HashSet::new();
            for edge in raw {
                let callee_key = name_key(&edge.callee);
                if callee_key.is_empty() || callee_key == key || dropped.contains(&callee_key) {
                    continue;
                }
                if !strongest.contains_key(&callee_key) && !self.in_scope(&callee_key, &edge.callee)? {
                    dropped.insert(callee_key);
                    continue;
                }
                let confidence = edge.confidence.clamp(0.0, 1.0);
                let entry = strongest.entry(callee_key.clone()).or_insert(OutEdge {
                    key: callee_key,
                    callee: edge.callee.trim().to_string(),
                    confidence,
                });
                if confidence > entry.confidence {
                    entry.confidence = confidence;
                }
            }
            if !dropped.is_empty() {
                tracing::debug!(
                    caller,
                    dropped = dropped.len(),
                    "out-of-scope callees skipped"
                );
            }
            self.out_of_scope += dropped.len();
            let mut edges: Vec<OutEdge> = strongest.into_values().collect();
            edges.sort_by(|a, b| a.key.cmp(&b.key));
            self.fetched.insert(key.clone(), edges);
        }
        Ok(self.fetched.get(&key).map(Vec::as_slice).unwrap_or(&[]))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Frontier {
    confidence: f64,
    hops: usize,
    key: String,
    label: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest: strongest, then shortest, then
        // lexicographically smallest name, then earliest discovered.
        self.confidence
            .total_cmp(&other.confidence)
            .then_with(|| other.hops.cmp(&self.hops))
            .then_with(|| other.key.cmp(&self.key))
            .then_with(|| other.label.cmp(&self.label))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One way of reaching a name; `prev` points at the caller's label and
/// carries the confidence of the connecting edge.
#[derive(Debug, Clone)]
struct Label {
    display: String,
    prev: Option<(usize, f64)>,
}

/// Walk from a single root name toward `target`.
pub fn traverse(
    cache: &mut EdgeCache<'_>,
    root: &str,
    target: &str,
    options: &ReachOptions,
    deadline: Instant,
) -> ValidateResult<Traversal> {
    let root = root.trim();
    let root_key = name_key(root);
    let target_key = name_key(target);

    let mut labels: Vec<Label> = vec![Label {
        display: root.to_string(),
        prev: None,
    }];
    // fewest hops each name has been expanded with
    let mut expanded: HashMap<String, usize> = HashMap::new();
    // best confidence queued per (name, hops)
    let mut queued: HashMap<(String, usize), f64> = HashMap::new();
    let mut heap: BinaryHeap<Frontier> = BinaryHeap::new();
    let mut hop_limited = false;

    heap.push(Frontier {
        confidence: 1.0,
        hops: 0,
        key: root_key,
        label: 0,
    });

    while let Some(current) = heap.pop() {
        let fewest = expanded.get(&current.key).copied();
        if fewest.is_some_and(|hops| current.hops >= hops) {
            continue;
        }
        if Instant::now() >= deadline {
            tracing::warn!(
                root,
                goal = target,
                explored = expanded.len(),
                "traversal timed out"
            );
            return Ok(Traversal::unreachable(
                root,
                expanded.len(),
                Some(Budget::Timeout),
            ));
        }
        if fewest.is_none() && expanded.len() >= options.max_visited {
            tracing::warn!(
                root,
                goal = target,
                explored = expanded.len(),
                "traversal visit budget exhausted"
            );
            return Ok(Traversal::unreachable(
                root,
                expanded.len(),
                Some(Budget::Visited),
            ));
        }
        expanded.insert(current.key.clone(), current.hops);

        if current.key == target_key {
            return Ok(reconstruct(root, current.label, &labels, expanded.len()));
        }

        let out = cache.outgoing(&current.key)?;
        if current.hops >= options.max_hops {
            if out.iter().any(|e| options.traverses(e.confidence)) {
                hop_limited = true;
            }
            continue;
        }
        let hops = current.hops + 1;
        for edge in out {
            if !options.traverses(edge.confidence) {
                continue;
            }
            if expanded.get(&edge.key).is_some_and(|&done| done <= hops) {
                continue;
            }
            let confidence = current.confidence.min(edge.confidence);
            let slot = (edge.key.clone(), hops);
            if queued.get(&slot).is_some_and(|&best| best >= confidence) {
                continue;
            }
            queued.insert(slot, confidence);
            labels.push(Label {
                display: edge.callee.clone(),
                prev: Some((current.label, edge.confidence)),
            });
            heap.push(Frontier {
                confidence,
                hops,
                key: edge.key.clone(),
                label: labels.len() - 1,
            });
        }
    }

    let budget = if hop_limited { Some(Budget::Hops) } else { None };
    Ok(Traversal::unreachable(root, expanded.len(), budget))
}

fn reconstruct(root: &str, target_label: usize, labels: &[Label], explored: usize) -> Traversal {
    let mut names: Vec<String> = Vec::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut cursor = Some(target_label);
    while let Some(at) = cursor {
        let Some(label) = labels.get(at) else {
            break;
        };
        names.push(label.display.clone());
        cursor = label.prev.map(|(prev, confidence)| {
            confidences.push(confidence);
            prev
        });
    }
    names.reverse();
    confidences.reverse();

    let edges: Vec<PathEdge> = names
        .windows(2)
        .zip(confidences.iter())
        .map(|(pair, confidence)| PathEdge {
            caller: pair[0].clone(),
            callee: pair[1].clone(),
            confidence: *confidence,
        })
        .collect();
    let confidence = edges
        .iter()
        .map(|e| e.confidence)
        .fold(1.0_f64, f64::min);

    Traversal {
        root: root.to_string(),
        reachable: true,
        hops: edges.len(),
        path: names,
        edges,
        confidence,
        truncated: false,
        budget: None,
        explored,
    }
}

/// Try every root (deduplicated by name) and keep the best reachable path.
/// When none reaches, the first root's outcome is reported.
pub fn check_reachability(
    index: &dyn StaticIndex,
    roots: &[String],
    target: &str,
    options: &ReachOptions,
) -> ValidateResult<Reachability> {
    check_reachability_scoped(index, roots, target, options, None)
}

/// [`check_reachability`] with callees restricted to `scope`.
pub fn check_reachability_scoped(
    index: &dyn StaticIndex,
    roots: &[String],
    target: &str,
    options: &ReachOptions,
    scope: Option<&ProjectScope>,
) -> ValidateResult<Reachability> {
    options.check()?;
    let deadline = Instant::now() + options.timeout;
    let mut cache = EdgeCache::scoped(index, scope);

    let mut seen: HashSet<String> = HashSet::new();
    let mut traversals: Vec<Traversal> = Vec::new();
    for root in roots {
        let key = name_key(root);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        traversals.push(traverse(&mut cache, root, target, options, deadline)?);
    }

    let attempts: Vec<RootAttempt> = traversals.iter().map(RootAttempt::from).collect();
    let best = traversals
        .iter()
        .filter(|t| t.reachable)
        .fold(None::<&Traversal>, |best, t| match best {
            Some(b)
                if b.confidence > t.confidence
                    || (b.confidence == t.confidence && b.hops <= t.hops) =>
            {
                Some(b)
            }
            _ => Some(t),
        })
        .or_else(|| traversals.first())
        .cloned()
        .unwrap_or_else(|| Traversal::unreachable("", 0, None));

    let budget = if best.reachable {
        None
    } else {
        traversals.iter().find_map(|t| t.budget)
    };
    let truncated = budget.is_some();
    if !best.reachable && traversals.len() > 1 {
        tracing::info!(
            goal = target,
            candidates = ?attempts.iter().map(|a| a.root.as_str()).collect::<Vec<_>>(),
            "no candidate root reaches target"
        );
    }
    let weak_edges = best.weak_edges(options.weak_threshold);

    Ok(Reachability {
        target: target.trim().to_string(),
        best,
        truncated,
        budget,
        weak_edges,
        out_of_scope_edges: cache.out_of_scope_edges(),
        attempts,
    })
}
