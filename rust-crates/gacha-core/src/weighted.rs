//! Weighted choice shared by every stage of a draw.

/// Source of uniform rolls in `[0, 1)`.
///
/// Any [`rand::Rng`] is a roll source, so production draws pass `rand::rng()`
/// and reproducible runs pass a seeded `StdRng`.
pub trait RollSource {
    fn unit(&mut self) -> f64;

    /// Roll in `[0, 100)`, compared against percentage rates.
    fn percent(&mut self) -> f64 {
        self.unit() * 100.0
    }
}

impl<R: rand::Rng> RollSource for R {
    fn unit(&mut self) -> f64 {
        self.random::<f64>()
    }
}

/// Replays a fixed list of unit rolls. Panics once the script runs dry.
#[cfg(any(test, feature = "test-helpers"))]
#[derive(Debug, Clone, Default)]
pub struct ScriptedRolls {
    rolls: std::collections::VecDeque<f64>,
}

#[cfg(any(test, feature = "test-helpers"))]
impl ScriptedRolls {
    pub fn new(rolls: impl IntoIterator<Item = f64>) -> Self {
        Self {
            rolls: rolls.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rolls.len()
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl RollSource for ScriptedRolls {
    fn unit(&mut self) -> f64 {
        self.rolls
            .pop_front()
            .expect("scripted roll sequence exhausted")
    }
}

/// Cumulative-sum pick: draws `u * total` and returns the first candidate
/// whose running weight exceeds it.
///
/// Negative and non-finite weights count as zero. Returns `None` when no
/// candidate carries positive weight; in that case no roll is consumed.
pub fn pick_weighted<'a, T, F, R>(
    candidates: &'a [T],
    weight: F,
    rolls: &mut R,
) -> Option<&'a T>
where
    F: Fn(&T) -> f64,
    R: RollSource + ?Sized,
{
    let weights: Vec<f64> = candidates.iter().map(|c| sanitize(weight(c))).collect();
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let target = rolls.unit() * total;
    let mut cumulative = 0.0;
    let mut last_positive = None;
    for (candidate, weight) in candidates.iter().zip(&weights) {
        if *weight <= 0.0 {
            continue;
        }
        cumulative += weight;
        last_positive = Some(candidate);
        if target < cumulative {
            return Some(candidate);
        }
    }
    // float accumulation can leave `target` a hair above the final sum
    last_positive
}

pub fn pick_uniform<'a, T, R>(candidates: &'a [T], rolls: &mut R) -> Option<&'a T>
where
    R: RollSource + ?Sized,
{
    pick_weighted(candidates, |_| 1.0, rolls)
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}
