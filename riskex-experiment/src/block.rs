use log::{debug, info};
use rand::Rng;
use riskex_core::{Stimulus, TrialSpec};

use crate::config::ExperimentVariant;

/// Stimuli loaded for a session, by image bag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StimulusPool {
    pub sure: Vec<Stimulus>,
    pub gamble: Vec<Stimulus>,
}

impl StimulusPool {
    pub fn len(&self) -> usize {
        self.sure.len() + self.gamble.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-place Fisher-Yates shuffle.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

/// Every trial a variant can present with `pool`, in generation order.
pub fn combinations(variant: ExperimentVariant, pool: &StimulusPool) -> Vec<TrialSpec> {
    match variant {
        ExperimentVariant::Detection => pool
            .sure
            .iter()
            .chain(&pool.gamble)
            .map(|s| TrialSpec::new(vec![s.clone()]))
            .collect(),
        ExperimentVariant::SureVsSure => pairs(&pool.sure),
        ExperimentVariant::GambleVsGamble => pairs(&pool.gamble),
        ExperimentVariant::GambleVsSure | ExperimentVariant::SequentialPair => {
            cross(&pool.gamble, &pool.sure)
        }
        ExperimentVariant::ThreeGambles => triples(&pool.gamble),
    }
}

/// Unordered pairs: C(n, 2) specs.
pub fn pairs(items: &[Stimulus]) -> Vec<TrialSpec> {
    let mut specs = Vec::new();
    for (i, a) in items.iter().enumerate() {
        for b in &items[i + 1..] {
            specs.push(TrialSpec::new(vec![a.clone(), b.clone()]));
        }
    }
    specs
}

/// Unordered triples: C(n, 3) specs.
pub fn triples(items: &[Stimulus]) -> Vec<TrialSpec> {
    let mut specs = Vec::new();
    for (i, a) in items.iter().enumerate() {
        for (j, b) in items.iter().enumerate().skip(i + 1) {
            for c in &items[j + 1..] {
                specs.push(TrialSpec::new(vec![a.clone(), b.clone(), c.clone()]));
            }
        }
    }
    specs
}

/// Cartesian product: `left.len() * right.len()` specs.
pub fn cross(left: &[Stimulus], right: &[Stimulus]) -> Vec<TrialSpec> {
    left.iter()
        .flat_map(|a| {
            right
                .iter()
                .map(move |b| TrialSpec::new(vec![a.clone(), b.clone()]))
        })
        .collect()
}

/// The shuffled block being worked through.
///
/// The same combination set is revisited every block; only its order
/// changes. Block numbers start at 1.
#[derive(Debug, Clone)]
pub struct BlockOrder {
    specs: Vec<TrialSpec>,
    cursor: usize,
    block: u64,
}

impl BlockOrder {
    pub fn new<R: Rng + ?Sized>(mut specs: Vec<TrialSpec>, rng: &mut R) -> Self {
        shuffle(&mut specs, rng);
        debug!("generated block of {} trials", specs.len());
        Self {
            specs,
            cursor: 0,
            block: 1,
        }
    }

    pub fn for_variant<R: Rng + ?Sized>(
        variant: ExperimentVariant,
        pool: &StimulusPool,
        rng: &mut R,
    ) -> Self {
        Self::new(combinations(variant, pool), rng)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> &[TrialSpec] {
        &self.specs
    }

    pub fn current(&self) -> Option<&TrialSpec> {
        self.specs.get(self.cursor)
    }

    pub fn block_index(&self) -> u64 {
        self.block
    }

    /// Zero-based position of the current trial within its block.
    pub fn trial_within_block(&self) -> usize {
        self.cursor
    }

    /// Moves past the current trial. Returns true when that finished the
    /// block, in which case the set is reshuffled and the block number
    /// incremented.
    pub fn advance<R: Rng + ?Sized>(&mut self, rng: &mut R) -> bool {
        if self.specs.is_empty() {
            return false;
        }
        self.cursor += 1;
        if self.cursor < self.specs.len() {
            return false;
        }
        info!("Block {} complete. Reshuffling...", self.block);
        shuffle(&mut self.specs, rng);
        self.cursor = 0;
        self.block += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn sures(n: u32) -> Vec<Stimulus> {
        (1..=n).map(|i| Stimulus::sure(format!("sure{i}.png"))).collect()
    }

    fn gambles(n: u32) -> Vec<Stimulus> {
        (1..=n)
            .map(|i| Stimulus::gamble(format!("gamble{}v0pw{}.png", i + 1, i * 10)))
            .collect()
    }

    fn keys(specs: &[TrialSpec]) -> Vec<Vec<String>> {
        specs
            .iter()
            .map(|s| {
                let mut paths: Vec<String> = s.paths().iter().map(|p| p.to_string()).collect();
                paths.sort();
                paths
            })
            .collect()
    }

    #[test]
    fn pair_counts_and_uniqueness() {
        for n in 0..7u32 {
            let specs = pairs(&sures(n));
            let expected = (n * n.saturating_sub(1) / 2) as usize;
            assert_eq!(specs.len(), expected, "C({n},2)");

            let unique: HashSet<_> = keys(&specs).into_iter().collect();
            assert_eq!(unique.len(), expected);
            assert!(specs.iter().all(|s| s.stimuli[0].path != s.stimuli[1].path));
        }
    }

    #[test]
    fn triple_counts_and_uniqueness() {
        for n in 0..8u32 {
            let specs = triples(&gambles(n));
            let n = n as usize;
            let expected = if n < 3 { 0 } else { n * (n - 1) * (n - 2) / 6 };
            assert_eq!(specs.len(), expected, "C({n},3)");
            let unique: HashSet<_> = keys(&specs).into_iter().collect();
            assert_eq!(unique.len(), expected);
        }
    }

    #[test]
    fn cross_pairs_every_gamble_with_every_sure() {
        let pool = StimulusPool {
            sure: sures(3),
            gamble: gambles(4),
        };
        let specs = combinations(ExperimentVariant::GambleVsSure, &pool);
        assert_eq!(specs.len(), 12);
        for spec in &specs {
            assert!(!spec.stimuli[0].is_sure());
            assert!(spec.stimuli[1].is_sure());
        }
        let unique: HashSet<_> = keys(&specs).into_iter().collect();
        assert_eq!(unique.len(), 12);
    }

    #[test]
    fn detection_uses_every_stimulus_once() {
        let pool = StimulusPool {
            sure: sures(3),
            gamble: gambles(2),
        };
        let specs = combinations(ExperimentVariant::Detection, &pool);
        assert_eq!(specs.len(), 5);
        assert!(specs.iter().all(|s| s.len() == 1));
    }

    #[test]
    fn small_pools_give_empty_blocks() {
        let one = StimulusPool {
            sure: sures(1),
            gamble: gambles(2),
        };
        assert!(combinations(ExperimentVariant::SureVsSure, &one).is_empty());
        assert!(combinations(ExperimentVariant::ThreeGambles, &one).is_empty());
        assert!(combinations(ExperimentVariant::GambleVsSure, &StimulusPool::default()).is_empty());

        let mut rng = StdRng::seed_from_u64(1);
        let mut order = BlockOrder::new(Vec::new(), &mut rng);
        assert!(order.current().is_none());
        assert!(!order.advance(&mut rng));
        assert_eq!(order.block_index(), 1);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut items: Vec<u32> = (0..50).collect();
        shuffle(&mut items, &mut rng);
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(items, sorted);
    }

    #[test]
    fn reshuffle_keeps_membership_and_counts_blocks() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = StimulusPool {
            sure: sures(4),
            gamble: Vec::new(),
        };
        let mut order = BlockOrder::for_variant(ExperimentVariant::SureVsSure, &pool, &mut rng);
        assert_eq!(order.len(), 6);

        let mut first: Vec<Vec<String>> = keys(order.specs());
        first.sort();

        for i in 0..5 {
            assert_eq!(order.trial_within_block(), i);
            assert!(!order.advance(&mut rng));
        }
        assert!(order.advance(&mut rng));
        assert_eq!(order.block_index(), 2);
        assert_eq!(order.trial_within_block(), 0);

        let mut second = keys(order.specs());
        second.sort();
        assert_eq!(first, second);
    }
}
