//! Worked-example pools for few-shot prompting.
//!
//! A pool is immutable configuration handed to a strategy when it is built.
//! Selection is seeded so the same pool and count always embed the same
//! examples in the same order.

use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::prompts::render_hypotheses;

use super::StrategyError;

const SELECTION_SEED: u64 = 0x5eed_a5e0;

/// One solved correction: an n-best list and what was actually said.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkedExample {
    pub hypotheses: Vec<String>,
    pub output: String,
}

impl WorkedExample {
    pub fn new(hypotheses: &[&str], output: &str) -> Self {
        Self {
            hypotheses: hypotheses.iter().map(|h| h.to_string()).collect(),
            output: output.to_string(),
        }
    }

    /// Render as `Example {number}:` followed by the tagged hypotheses and the answer.
    pub fn render(&self, number: usize) -> String {
        format!(
            "Example {number}:\n{}\nYour output: {}",
            render_hypotheses(&self.hypotheses),
            self.output.trim()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExamplePool {
    examples: Vec<WorkedExample>,
}

impl ExamplePool {
    pub fn new(examples: Vec<WorkedExample>) -> Self {
        Self { examples }
    }

    /// Load a JSON array of `{"hypotheses": [...], "output": "..."}` objects.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StrategyError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| StrategyError::ExamplePool(e.to_string()))?;
        let examples: Vec<WorkedExample> =
            serde_json::from_str(&raw).map_err(|e| StrategyError::ExamplePool(e.to_string()))?;
        Ok(Self::new(examples))
    }

    /// Bundled pool for a dataset name, if one ships with the crate.
    pub fn builtin(dataset: &str) -> Option<Self> {
        match dataset {
            "cv" => Some(Self::new(common_voice_examples())),
            "lrs" | "chime" => Some(Self::default()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Pick `count` examples (all of them if `count >= len`), in pool order.
    pub fn select(&self, count: usize) -> Vec<&WorkedExample> {
        if count >= self.examples.len() {
            return self.examples.iter().collect();
        }
        let mut rng = StdRng::seed_from_u64(SELECTION_SEED);
        let mut picked = sample(&mut rng, self.examples.len(), count).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| &self.examples[i]).collect()
    }

    /// Selected examples rendered for a prompt, renumbered from 1.
    pub fn render(&self, count: usize) -> Vec<String> {
        self.select(count)
            .into_iter()
            .enumerate()
            .map(|(i, e)| e.render(i + 1))
            .collect()
    }
}

/// Few-shot settings injected into model-backed strategies.
#[derive(Debug, Clone, Default)]
pub struct FewShot {
    pub pool: ExamplePool,
    pub count: usize,
}

impl FewShot {
    pub fn new(pool: ExamplePool, count: usize) -> Self {
        Self { pool, count }
    }

    pub fn is_active(&self) -> bool {
        self.count > 0 && !self.pool.is_empty()
    }

    /// Rendered examples, computed once at strategy construction.
    pub fn rendered(&self) -> Vec<String> {
        if self.is_active() {
            self.pool.render(self.count)
        } else {
            Vec::new()
        }
    }
}

fn common_voice_examples() -> Vec<WorkedExample> {
    vec![
        WorkedExample::new(
            &[
                "see stongers were executed for these crimes and manures devoted to other islands",
                "the stungers were executed for this crime and maneuvers devoted to other islands",
                "the stungers were executed for this crime and many were deported to other islands",
                "the strongest were executed for the crime and maneuvers deported to other islands",
                "the stungers were executed for these crimes and maneuvers devoted to other islands",
            ],
            "six tongans were executed for this crime and many were deported to other islands",
        ),
        WorkedExample::new(
            &[
                "the hamlet of whitewell likes to the west",
                "the hamlet of white will lights to the west",
                "the hamlet of whitewell lies to the west",
                "the hamlet of whitewill lies to the west",
                "the hamlet of whiteville likes to the west",
            ],
            "the hamlet of whitewell lies to the west",
        ),
        WorkedExample::new(
            &[
                "conway was farmed and disguised as conway",
                "konui was formed and disguised as konui",
                "conroy was formed and disguised as conway",
                "conway was formed and disguised as conway",
                "connolly was formed and disguised as conway",
            ],
            "conwy was formerly anglicized as conway",
        ),
        WorkedExample::new(
            &[
                "due to space limitations as an extremely narrow platform",
                "due to space limitation as an extremely narrow platform",
                "due to space limitation as an extremely narrow platform",
                "due to space limitations as an extremely narrow platform",
                "due to space limitations as an extremely narrow platform",
            ],
            "due to space limitations it has an extremely narrow platform",
        ),
        WorkedExample::new(
            &[
                "the band continues to tune nationally",
                "the band continues to tour nationally",
                "the band continues to do it nationally",
                "the band continues to tour nationally",
                "the band continues to do it nationally",
            ],
            "the band continues to tour nationally",
        ),
        WorkedExample::new(
            &[
                "around holdcroft requires a lot more skill to keep upright",
                "around holdcroft requires a lot more skill to keep upright",
                "around hold croft requires a lot more skill to keep upright",
                "a roundhold craft requires a lot more skill to keep upright",
                "around hold craft requires a lot more skill to keep upright",
            ],
            "a round hulled craft requires a lot more skill to keep upright",
        ),
        WorkedExample::new(
            &[
                "tom the montana is a collective term for the appland varieties e g",
                "tom the monten is a collective term for the upland varieties e g",
                "tom the monten is a collective term for the appland varieties e g",
                "tom the monten is a collective term for the appland varieties e g",
                "tom the montana is a collective term for the appland varieties e g",
            ],
            "tomme de montagne is a collective term for the upland varieties e g",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_reproducible_and_ordered() {
        let pool = ExamplePool::builtin("cv").unwrap();
        let first = pool.select(3);
        let second = pool.select(3);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);

        let positions: Vec<usize> = first
            .iter()
            .map(|e| pool.examples.iter().position(|p| p == *e).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[test]
    fn oversized_count_returns_whole_pool() {
        let pool = ExamplePool::builtin("cv").unwrap();
        assert_eq!(pool.select(100).len(), pool.len());
    }

    #[test]
    fn rendered_examples_are_renumbered() {
        let pool = ExamplePool::builtin("cv").unwrap();
        let rendered = pool.render(2);
        assert!(rendered[0].starts_with("Example 1:"));
        assert!(rendered[1].starts_with("Example 2:"));
        assert!(rendered[0].contains("Your output: "));
    }

    #[test]
    fn empty_pool_disables_few_shot() {
        let few = FewShot::new(ExamplePool::builtin("lrs").unwrap(), 3);
        assert!(!few.is_active());
        assert!(few.rendered().is_empty());
        assert!(ExamplePool::builtin("unknown").is_none());
    }

    #[test]
    fn pool_loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, r#"[{"hypotheses": ["a b", "a c"], "output": "a b"}]"#).unwrap();
        let pool = ExamplePool::from_path(&path).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
