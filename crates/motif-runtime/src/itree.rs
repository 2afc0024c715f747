//! Insight tree (iTree) builder.
//!
//! Explains a goal event as a tree of patterns. Each child inserts one event
//! before the goal (after the start, when there is one) and is kept when it
//! splits its parent's population into two groups of lower binary entropy
//! with respect to reaching the goal.
//!
//! For a node with sequence `S = [.., goal]` the population is the count of
//! `S` without its goal and the goal count is the count of `S`. Children of a
//! level are evaluated in parallel; rankings are compared only once every
//! candidate of the level has finished.

use crate::pattern::{CountType, Pattern};
use crate::service::{PatternServiceWrapper, ServiceError};
use motif_core::EventConstraints;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Budgets of one tree build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ITreeConfig {
    /// Candidate insertions evaluated per node, highest goal count first.
    pub max_candidates: usize,
    /// Levels below the root.
    pub max_depth: usize,
    /// Accepted children per node.
    pub max_children: usize,
}

impl Default for ITreeConfig {
    fn default() -> Self {
        Self {
            max_candidates: 50,
            max_depth: 3,
            max_children: 5,
        }
    }
}

/// What to explain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ITreeRequest {
    pub request_id: String,
    pub start: Option<String>,
    pub start_constraints: Option<EventConstraints>,
    pub goal: String,
    pub goal_constraints: Option<EventConstraints>,
    pub count_type: CountType,
}

impl ITreeRequest {
    pub fn new(request_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            goal: goal.into(),
            ..Self::default()
        }
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_start_constraints(mut self, constraints: EventConstraints) -> Self {
        self.start_constraints = Some(constraints);
        self
    }

    pub fn with_goal_constraints(mut self, constraints: EventConstraints) -> Self {
        self.goal_constraints = Some(constraints);
        self
    }

    pub fn with_count_type(mut self, count_type: CountType) -> Self {
        self.count_type = count_type;
        self
    }

    /// Constraint vector for `names`: start constraints on the first position,
    /// goal constraints on the last one when `with_goal`. `None` when empty.
    fn constraints_for(&self, names: &[String], with_goal: bool) -> Option<Vec<EventConstraints>> {
        let start = self.start.as_ref().and(self.start_constraints.as_ref());
        let goal = if with_goal { self.goal_constraints.as_ref() } else { None };
        if start.is_none() && goal.is_none() {
            return None;
        }
        let mut out = vec![EventConstraints::default(); names.len()];
        if let (Some(c), Some(first)) = (start, out.first_mut()) {
            *first = c.clone();
        }
        if let (Some(c), Some(last)) = (goal, out.last_mut()) {
            *last = c.clone();
        }
        Some(out)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ITreeError {
    #[error("Goal pattern [{0}] not found")]
    GoalNotFound(String),

    #[error("Root population of [{0}] is empty")]
    EmptyPopulation(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// One node of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ITreeNode {
    pub id: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub depth: usize,
    /// Full sequence, ending with the goal.
    pub event_names: Vec<String>,
    pub inserted_event: Option<String>,
    /// 0-based index of the inserted event in `event_names`.
    pub inserted_position: Option<usize>,
    pub population: u64,
    pub goal_count: u64,
    pub confidence: f64,
    pub left_information: f64,
    pub right_information: f64,
    pub overall_information: f64,
    pub information_drop: f64,
    pub confidence_gain: f64,
}

/// Arena of nodes; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ITree {
    pub goal: String,
    pub start: Option<String>,
    pub count_type: CountType,
    pub nodes: Vec<ITreeNode>,
}

impl ITree {
    pub fn root(&self) -> &ITreeNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: usize) -> Option<&ITreeNode> {
        self.nodes.get(id)
    }

    pub fn children(&self, id: usize) -> impl Iterator<Item = &ITreeNode> {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&c| &self.nodes[c])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deepest level reached.
    pub fn depth(&self) -> usize {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// Shannon entropy in bits of a Bernoulli variable; exactly 0 at 0 and 1.
pub fn binary_entropy(p: f64) -> f64 {
    if !(p > 0.0 && p < 1.0) {
        return 0.0;
    }
    let q = 1.0 - p;
    -(p * p.log2() + q * q.log2())
}

/// Smallest information drop that counts as informative; absorbs rounding.
pub const MIN_INFORMATION_DROP: f64 = 1e-9;

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Scored child before it joins the arena.
#[derive(Debug, Clone)]
struct Evaluated {
    event_names: Vec<String>,
    inserted_event: String,
    inserted_position: usize,
    population: u64,
    goal_count: u64,
    confidence: f64,
    left: f64,
    right: f64,
    overall: f64,
    drop: f64,
    gain: f64,
}

/// Index at which `candidate` inserts one event into `parent`, if it does.
/// `lower` is the first index an insertion may occupy.
fn insertion_index(parent: &[String], candidate: &[String], lower: usize) -> Option<usize> {
    if candidate.len() != parent.len() + 1 {
        return None;
    }
    let last = candidate.len() - 1;
    (lower..last).find(|&i| {
        candidate[..i] == parent[..i] && candidate[i + 1..] == parent[i..]
    })
}

struct Builder<'a> {
    service: &'a dyn PatternServiceWrapper,
    request: &'a ITreeRequest,
    config: &'a ITreeConfig,
}

impl Builder<'_> {
    fn count(&self, names: &[String], with_goal: bool) -> Result<Option<u64>, ServiceError> {
        let constraints = self.request.constraints_for(names, with_goal);
        self.service.get_count(
            &self.request.request_id,
            names,
            constraints.as_deref(),
            self.request.count_type,
        )
    }

    fn root(&self) -> Result<ITreeNode, ITreeError> {
        let goal = self.request.goal.clone();
        let (event_names, population) = match &self.request.start {
            Some(start) => {
                let prefix = vec![start.clone()];
                let population = self
                    .count(&prefix, false)?
                    .ok_or_else(|| ITreeError::GoalNotFound(start.clone()))?;
                (vec![start.clone(), goal.clone()], population)
            }
            None => {
                let names = vec![goal.clone()];
                let population = match self.request.count_type {
                    CountType::PerUser => self
                        .service
                        .get_pattern(&self.request.request_id, &names)?
                        .map(|p| p.total_user_count())
                        .ok_or_else(|| ITreeError::GoalNotFound(goal.clone()))?,
                    CountType::PerOccurrence => {
                        self.service.get_total_event_count(&self.request.request_id)?
                    }
                };
                (names, population)
            }
        };
        let key = event_names.join(",");
        let goal_count = self
            .count(&event_names, true)?
            .ok_or_else(|| ITreeError::GoalNotFound(key.clone()))?;
        if population == 0 {
            return Err(ITreeError::EmptyPopulation(key));
        }
        let confidence = ratio(goal_count, population).min(1.0);
        let entropy = binary_entropy(confidence);
        Ok(ITreeNode {
            id: 0,
            parent: None,
            children: Vec::new(),
            depth: 0,
            event_names,
            inserted_event: None,
            inserted_position: None,
            population,
            goal_count,
            confidence,
            left_information: 0.0,
            right_information: entropy,
            overall_information: entropy,
            information_drop: 0.0,
            confidence_gain: 0.0,
        })
    }

    /// Candidate sequences one insertion away from `parent`, best first.
    fn candidates(&self, parent: &ITreeNode) -> Result<Vec<(Vec<String>, usize)>, ServiceError> {
        let request_id = &self.request.request_id;
        let goal = &self.request.goal;
        let pool: Vec<Arc<Pattern>> = match &self.request.start {
            Some(start) => self.service.get_all_patterns(request_id, start, goal)?,
            None => self.service.get_all_containing_patterns(request_id, goal)?,
        };
        let lower = usize::from(self.request.start.is_some());
        let mut found: Vec<(Arc<Pattern>, usize)> = pool
            .into_iter()
            .filter(|p| p.last_event() == goal.as_str())
            .filter(|p| self.request.start.as_deref().map_or(true, |s| p.first_event() == s))
            .filter_map(|p| {
                let at = insertion_index(&parent.event_names, p.event_names(), lower)?;
                (p.event_names()[at] != *goal).then_some((p, at))
            })
            .collect();
        found.sort_by(|(a, _), (b, _)| {
            b.count(self.request.count_type)
                .cmp(&a.count(self.request.count_type))
                .then_with(|| a.event_names().cmp(b.event_names()))
        });
        found.truncate(self.config.max_candidates);
        Ok(found
            .into_iter()
            .map(|(p, at)| (p.event_names().to_vec(), at))
            .collect())
    }

    fn evaluate(&self, parent: &ITreeNode, names: Vec<String>, at: usize) -> Result<Option<Evaluated>, ServiceError> {
        let prefix = &names[..names.len() - 1];
        let Some(population) = self.count(prefix, false)? else {
            return Ok(None);
        };
        let Some(goal_count) = self.count(&names, true)? else {
            return Ok(None);
        };
        let consistent = population > 0
            && population <= parent.population
            && goal_count <= population
            && goal_count <= parent.goal_count
            && parent.goal_count - goal_count <= parent.population - population;
        if !consistent {
            return Ok(None);
        }
        let confidence = ratio(goal_count, population);
        let complement = parent.population - population;
        let complement_goal = parent.goal_count - goal_count;
        let right = binary_entropy(confidence);
        let left = binary_entropy(ratio(complement_goal, complement));
        let overall =
            (population as f64 * right + complement as f64 * left) / parent.population as f64;
        let drop = binary_entropy(parent.confidence) - overall;
        Ok(Some(Evaluated {
            inserted_event: names[at].clone(),
            event_names: names,
            inserted_position: at,
            population,
            goal_count,
            confidence,
            left,
            right,
            overall,
            drop,
            gain: confidence - parent.confidence,
        }))
    }

    /// Accepted children of one node, ranked.
    fn expand(&self, parent: &ITreeNode) -> Vec<Evaluated> {
        let candidates = match self.candidates(parent) {
            Ok(c) => c,
            Err(e) => {
                debug!(node = parent.id, error = %e, "Candidate lookup failed, skipping node");
                return Vec::new();
            }
        };
        let mut accepted: Vec<Evaluated> = candidates
            .into_par_iter()
            .filter_map(|(names, at)| match self.evaluate(parent, names, at) {
                Ok(Some(e)) if e.drop > MIN_INFORMATION_DROP => Some(e),
                Ok(_) => None,
                Err(e) => {
                    debug!(node = parent.id, error = %e, "Candidate evaluation failed");
                    None
                }
            })
            .collect();
        accepted.sort_by(|a, b| {
            b.drop
                .partial_cmp(&a.drop)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.inserted_event.cmp(&b.inserted_event))
                .then_with(|| a.inserted_position.cmp(&b.inserted_position))
        });
        accepted.truncate(self.config.max_children);
        accepted
    }
}

/// Build an iTree for `request` against `service`.
pub fn build_itree(
    service: &dyn PatternServiceWrapper,
    request: &ITreeRequest,
    config: &ITreeConfig,
) -> Result<ITree, ITreeError> {
    let builder = Builder {
        service,
        request,
        config,
    };
    let mut nodes = vec![builder.root()?];
    let mut frontier = vec![0usize];

    for depth in 1..=config.max_depth {
        if frontier.is_empty() {
            break;
        }
        let parents: Vec<ITreeNode> = frontier.iter().map(|&id| nodes[id].clone()).collect();
        // Barrier: every node of the level is expanded before any is attached.
        let expansions: Vec<Vec<Evaluated>> = parents.par_iter().map(|p| builder.expand(p)).collect();

        let mut next = Vec::new();
        for (parent, children) in parents.iter().zip(expansions) {
            for child in children {
                let id = nodes.len();
                nodes.push(ITreeNode {
                    id,
                    parent: Some(parent.id),
                    children: Vec::new(),
                    depth,
                    event_names: child.event_names,
                    inserted_event: Some(child.inserted_event),
                    inserted_position: Some(child.inserted_position),
                    population: child.population,
                    goal_count: child.goal_count,
                    confidence: child.confidence,
                    left_information: child.left,
                    right_information: child.right,
                    overall_information: child.overall,
                    information_drop: child.drop,
                    confidence_gain: child.gain,
                });
                nodes[parent.id].children.push(id);
                next.push(id);
            }
        }
        debug!(depth, nodes = next.len(), "iTree level expanded");
        frontier = next;
    }

    info!(
        goal = %request.goal,
        start = ?request.start,
        nodes = nodes.len(),
        "iTree built"
    );
    Ok(ITree {
        goal: request.goal.clone(),
        start: request.start.clone(),
        count_type: request.count_type,
        nodes,
    })
}
