//! Response selection.
//!
//! A [`Selector`] decides, per request, which response gets applied:
//!
//! - **Sequential** (default): cycles through the response groups in order,
//!   wrapping around forever.
//! - **Random**: picks a response group uniformly at random.
//! - **Matched**: applies the first match rule whose predicate accepts the
//!   request, falling back to an optional default.
//!
//! Selectors are shared by every concurrent request to a stub. The sequential
//! position is the only mutable state and it is advanced with a single atomic
//! read-modify-write; no lock is held while an action runs.

use crate::action::{Action, ActionRef, CompositeAction};
use crate::error::ActionError;
use crate::exchange::Exchange;
use crate::predicate::PredicateRef;
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Which response a selector applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Response group at this index (sequential and random)
    Response(usize),
    /// Match rule at this index
    Rule(usize),
    /// The matched selector's default response
    Default,
    /// No rule matched and no default exists; the exchange is left untouched
    Unmatched,
}

/// Cycles through response groups, one per request.
pub struct SequentialSelector {
    responses: Vec<CompositeAction>,
    next: AtomicUsize,
}

impl SequentialSelector {
    /// `responses` must not be empty; the builder guarantees this.
    pub(crate) fn new(responses: Vec<CompositeAction>) -> Self {
        debug_assert!(!responses.is_empty());
        Self {
            responses,
            next: AtomicUsize::new(0),
        }
    }

    /// Claim the next index and advance, atomically.
    fn advance(&self) -> usize {
        let len = self.responses.len();
        self.next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |idx| {
                Some((idx + 1) % len)
            })
            .unwrap_or_else(|idx| {
                debug_assert!(false, "the update closure never returns None");
                idx
            })
    }

    /// Index the next request will receive.
    pub fn peek(&self) -> usize {
        self.next.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn select(&self, exchange: &mut Exchange) -> Result<Selection, ActionError> {
        let idx = self.advance();
        debug!(index = idx, "Sequential selector chose response");
        self.responses[idx].apply(exchange)?;
        Ok(Selection::Response(idx))
    }
}

/// Picks a response group uniformly at random for each request.
pub struct RandomSelector {
    responses: Vec<CompositeAction>,
}

impl RandomSelector {
    pub(crate) fn new(responses: Vec<CompositeAction>) -> Self {
        debug_assert!(!responses.is_empty());
        Self { responses }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    fn select(&self, exchange: &mut Exchange) -> Result<Selection, ActionError> {
        // thread-local generator, nothing shared between requests
        let idx = rand::thread_rng().gen_range(0..self.responses.len());
        debug!(index = idx, "Random selector chose response");
        self.responses[idx].apply(exchange)?;
        Ok(Selection::Response(idx))
    }
}

/// A predicate paired with the response it triggers.
#[derive(Clone)]
pub struct MatchRule {
    predicate: PredicateRef,
    response: CompositeAction,
}

/// Ordered match rules with an optional default, as declared by the caller.
#[derive(Clone, Default)]
pub struct MatchRules {
    rules: Vec<(PredicateRef, Vec<ActionRef>)>,
    default: Option<Vec<ActionRef>>,
}

impl MatchRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule. Rules are tried in the order they are added.
    pub fn rule(mut self, predicate: PredicateRef, actions: Vec<ActionRef>) -> Self {
        self.rules.push((predicate, actions));
        self
    }

    /// Response for requests no rule accepts. Last call wins.
    pub fn default_response(mut self, actions: Vec<ActionRef>) -> Self {
        self.default = Some(actions);
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.default.is_none()
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Freeze into a selector, putting `repeated` in front of every response.
    pub(crate) fn into_selector(self, repeated: &[ActionRef]) -> MatchedSelector {
        let rules = self
            .rules
            .into_iter()
            .map(|(predicate, actions)| MatchRule {
                predicate,
                response: CompositeAction::with_repeated(repeated, &actions),
            })
            .collect();
        let default = self
            .default
            .map(|actions| CompositeAction::with_repeated(repeated, &actions));
        MatchedSelector { rules, default }
    }
}

/// First matching rule wins; otherwise the default, otherwise nothing.
pub struct MatchedSelector {
    rules: Vec<MatchRule>,
    default: Option<CompositeAction>,
}

impl MatchedSelector {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn select(&self, exchange: &mut Exchange) -> Result<Selection, ActionError> {
        let hit = self
            .rules
            .iter()
            .position(|rule| rule.predicate.matches(exchange));

        if let Some(idx) = hit {
            debug!(rule = idx, "Matched selector chose rule");
            self.rules[idx].response.apply(exchange)?;
            return Ok(Selection::Rule(idx));
        }

        match &self.default {
            Some(default) => {
                debug!("No rule matched, applying default response");
                default.apply(exchange)?;
                Ok(Selection::Default)
            }
            None => {
                debug!("No rule matched and no default configured, returning request unchanged");
                Ok(Selection::Unmatched)
            }
        }
    }
}

/// The strategy a stub uses to answer requests.
pub enum Selector {
    Sequential(SequentialSelector),
    Random(RandomSelector),
    Matched(MatchedSelector),
}

impl Selector {
    /// Apply exactly one response to the exchange.
    ///
    /// Action errors are returned unchanged; anything already applied stays.
    pub fn select(&self, exchange: &mut Exchange) -> Result<Selection, ActionError> {
        match self {
            Selector::Sequential(s) => s.select(exchange),
            Selector::Random(s) => s.select(exchange),
            Selector::Matched(s) => s.select(exchange),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Selector::Sequential(_) => "sequential",
            Selector::Random(_) => "random",
            Selector::Matched(_) => "matched",
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Sequential(s) => f
                .debug_struct("Sequential")
                .field("responses", &s.len())
                .field("next", &s.peek())
                .finish(),
            Selector::Random(s) => f.debug_struct("Random").field("responses", &s.len()).finish(),
            Selector::Matched(s) => f
                .debug_struct("Matched")
                .field("rules", &s.len())
                .field("default", &s.default.is_some())
                .finish(),
        }
    }
}

/// Selector choice on the builder, with the matched selector's rules.
#[derive(Clone, Default)]
pub enum SelectorKind {
    #[default]
    Sequential,
    Random,
    Matched(MatchRules),
}

impl SelectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            SelectorKind::Sequential => "sequential",
            SelectorKind::Random => "random",
            SelectorKind::Matched(_) => "matched",
        }
    }
}

impl fmt::Debug for SelectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build a matched-rule predicate from a closure.
pub fn when<F>(f: F) -> PredicateRef
where
    F: Fn(&Exchange) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}
