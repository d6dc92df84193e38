//! Global and per-bike rule collections.

use std::collections::BTreeMap;

use megabike_types::{Action, RuleId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RuleError;
use crate::rule::{Rule, RuleSubject};

// ---------------------------------------------------------------------------
// Global cache
// ---------------------------------------------------------------------------

/// The simulation-wide rule registry, indexed by id and by category.
///
/// Serializes as a flat list of rules; the category index is rebuilt on
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Rule>", into = "Vec<Rule>")]
pub struct GlobalRuleCache {
    rules: BTreeMap<RuleId, Rule>,
    by_category: BTreeMap<Action, Vec<RuleId>>,
}

impl GlobalRuleCache {
    /// An empty cache.
    pub const fn new() -> Self {
        Self {
            rules: BTreeMap::new(),
            by_category: BTreeMap::new(),
        }
    }

    /// Insert a rule, replacing any rule with the same id.
    pub fn add(&mut self, rule: Rule) {
        let id = rule.id();
        if let Some(previous) = self.rules.get(&id) {
            if let Some(ids) = self.by_category.get_mut(&previous.action()) {
                ids.retain(|existing| *existing != id);
            }
        }
        self.by_category.entry(rule.action()).or_default().push(id);
        self.rules.insert(id, rule);
    }

    /// Look up a rule by id.
    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    /// Look up a rule by id, failing if it is missing.
    pub fn require(&self, id: RuleId) -> Result<&Rule, RuleError> {
        self.get(id).ok_or(RuleError::UnknownRule { rule_id: id })
    }

    /// Rules tagged with `action`, in insertion order.
    pub fn by_category(&self, action: Action) -> Vec<&Rule> {
        self.by_category
            .get(&action)
            .map(|ids| ids.iter().filter_map(|id| self.rules.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every rule, ordered by id.
    pub fn all(&self) -> impl Iterator<Item = &Rule> {
        self.rules.values()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the cache holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule count per category, omitting empty categories.
    pub fn category_counts(&self) -> BTreeMap<Action, usize> {
        self.by_category
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(action, ids)| (*action, ids.len()))
            .collect()
    }

    /// Add `count / 5` always-passing rules to each rule category.
    pub fn populate_null_rules(&mut self, count: usize) {
        let per_category = count
            .checked_div(Action::RULE_CATEGORIES.len())
            .unwrap_or_default();
        for action in Action::RULE_CATEGORIES {
            for _ in 0..per_category {
                self.add(Rule::null_passing(action));
            }
        }
        info!(requested = count, per_category, total = self.len(), "Global rule cache populated");
    }
}

impl From<Vec<Rule>> for GlobalRuleCache {
    fn from(rules: Vec<Rule>) -> Self {
        let mut cache = Self::new();
        for rule in rules {
            cache.add(rule);
        }
        cache
    }
}

impl From<GlobalRuleCache> for Vec<Rule> {
    fn from(cache: GlobalRuleCache) -> Self {
        cache.rules.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// Per-bike rule set
// ---------------------------------------------------------------------------

/// The rules a bike has activated.
///
/// Rules are held twice: stratified by category, and as a flat ordered list.
/// The two views are populated independently and need not agree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalRuleSet {
    active: BTreeMap<Action, Vec<Rule>>,
    linear: Vec<Rule>,
}

impl LocalRuleSet {
    /// An empty rule set.
    pub const fn new() -> Self {
        Self {
            active: BTreeMap::new(),
            linear: Vec::new(),
        }
    }

    /// Copy every global rule into both the category map and the linear list.
    pub fn activate_all_from(&mut self, global: &GlobalRuleCache) {
        for rule in global.all() {
            self.add(rule.clone());
            self.linear.push(rule.clone());
        }
        debug!(activated = global.len(), "Activated global rules");
    }

    /// Drop every active rule from both views.
    pub fn clear(&mut self) {
        self.active.clear();
        self.linear.clear();
    }

    /// Activate a rule under its category.
    pub fn add(&mut self, rule: Rule) {
        self.active.entry(rule.action()).or_default().push(rule);
    }

    /// Append a rule to the linear list only.
    pub fn add_linear(&mut self, rule: Rule) {
        self.linear.push(rule);
    }

    /// Rules for `action` plus the applies-to-all rules.
    ///
    /// Querying `AppliesAll` itself returns those rules once.
    pub fn active_rules_for(&self, action: Action) -> Vec<&Rule> {
        let own = self.active.get(&action).into_iter().flatten();
        if action == Action::AppliesAll {
            return own.collect();
        }
        let shared = self.active.get(&Action::AppliesAll).into_iter().flatten();
        own.chain(shared).collect()
    }

    /// Mutable access to the rules filed directly under `action`.
    pub fn rules_mut(&mut self, action: Action) -> impl Iterator<Item = &mut Rule> {
        self.active.get_mut(&action).into_iter().flatten()
    }

    /// The category map.
    pub const fn categories(&self) -> &BTreeMap<Action, Vec<Rule>> {
        &self.active
    }

    /// The linear list.
    pub fn linear(&self) -> &[Rule] {
        &self.linear
    }

    /// Number of rules in the category map.
    pub fn len(&self) -> usize {
        self.active.values().map(Vec::len).sum()
    }

    /// Whether the category map is empty.
    pub fn is_empty(&self) -> bool {
        self.active.values().all(Vec::is_empty)
    }

    /// Whether `subject` passes every active rule for `action`.
    pub fn allows<S: RuleSubject + ?Sized>(&self, action: Action, subject: &S) -> bool {
        self.active_rules_for(action)
            .into_iter()
            .all(|rule| rule.evaluate(subject))
    }

    /// Whether every member passes every active rule for `action`.
    pub fn is_action_valid<S: RuleSubject>(&self, action: Action, members: &[S]) -> bool {
        self.active_rules_for(action)
            .into_iter()
            .all(|rule| members.iter().all(|member| rule.evaluate(member)))
    }

    /// Whether every member passes every agent rule in the linear list.
    ///
    /// `Lootbox` rules read (bike, pickup) features and are judged during
    /// pickup pruning, not against members.
    pub fn complies_with_linear_ruleset<S: RuleSubject>(&self, members: &[S]) -> bool {
        self.linear
            .iter()
            .filter(|rule| rule.action() != Action::Lootbox)
            .all(|rule| members.iter().all(|member| rule.evaluate(member)))
    }
}
