use log::{debug, info};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use statrs::distribution::Binomial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cinfo;
use crate::distrib::Distribution;
use crate::evaluator::Evaluator;
use crate::hof::{HallOfFame, HofSpec};
use crate::individual::Individual;
use crate::param::{MutationOperator, Param, SelectionRule, SortingStrategy};
use crate::predictor::Predictor;
use crate::prefilter;
use crate::sorting;
use crate::utils::{display_generation, display_generation_legend};

/// A finished hall of fame: members and their final per-objective
/// predictors, kept in parallel vectors.
#[derive(Clone, Debug)]
pub struct OptimizerResult {
    pub name: String,
    pub nick: String,
    pub individuals: Vec<Individual>,
    pub predictors: Vec<Vec<Option<Predictor>>>,
}

impl OptimizerResult {
    pub fn new(
        name: String,
        individuals: Vec<Individual>,
        predictors: Vec<Vec<Option<Predictor>>>,
    ) -> OptimizerResult {
        assert!(
            individuals.len() == predictors.len(),
            "{} individuals for {} predictor rows",
            individuals.len(),
            predictors.len()
        );
        let nick = short_digest(&individuals);
        OptimizerResult {
            name,
            nick,
            individuals,
            predictors,
        }
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    /// The first `keep` members with their predictors.
    pub fn select_individuals(&self, keep: usize) -> OptimizerResult {
        OptimizerResult::new(
            self.name.clone(),
            self.individuals.iter().take(keep).cloned().collect(),
            self.predictors.iter().take(keep).cloned().collect(),
        )
    }
}

/// Stable short identifier derived from the member masks.
fn short_digest(individuals: &[Individual]) -> String {
    let masks: Vec<_> = individuals.iter().map(|i| &i.mask).collect();
    let bytes = bincode::serialize(&masks).expect("mask serialization cannot fail");
    let digest = Sha256::digest(&bytes);
    digest[..4].iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerationRecord {
    pub sweep: usize,
    pub generation: usize,
    pub front_len: usize,
    pub n_evaluated: usize,
    pub best: Vec<f64>,
    pub mean_k: f64,
}

/// Per-generation history of one optimizer run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Logbook {
    pub records: Vec<GenerationRecord>,
}

pub struct OptimizerOutput {
    pub results: Vec<OptimizerResult>,
    pub retained: Vec<Individual>,
    pub logbook: Logbook,
}

/// Run the evolutionary optimizer against an evaluator.
///
/// One sweep per entry of `ga.generations`: the first seeds its population
/// from the prefilter importance distribution (or the provided initial
/// population), later sweeps continue from the previous sweep's survivors.
/// Halls of fame persist across sweeps; at termination every hall member's
/// predictors are refit on the full training data. SIGINT (via `running`)
/// finishes the generation in flight and stops cleanly.
pub fn optimize(
    evaluator: &Evaluator,
    seed_distribution: &Distribution,
    param: &Param,
    hof_specs: &[HofSpec],
    initial: Option<Vec<Individual>>,
    running: Arc<AtomicBool>,
    rng: &mut ChaCha8Rng,
) -> OptimizerOutput {
    let time = Instant::now();
    assert!(
        seed_distribution.len() == evaluator.n_features(),
        "seed distribution over {} features for an evaluator over {}",
        seed_distribution.len(),
        evaluator.n_features()
    );
    let mut hofs: Vec<HallOfFame> = hof_specs.iter().map(|s| s.build()).collect();
    let mut logbook = Logbook::default();

    let mut population = match initial {
        Some(individuals) => {
            assert!(
                individuals
                    .iter()
                    .all(|i| i.mask.len() == evaluator.n_features()),
                "initial population masks do not match the feature space"
            );
            individuals
        }
        None => prefilter::initial_population(&param.ga, seed_distribution, rng),
    };
    evaluator.evaluate_population(&mut population, rng.gen(), false);
    population = select(population, param, param.ga.pop, rng);
    for hof in hofs.iter_mut() {
        hof.update(&population);
    }

    let nicks: Vec<String> = evaluator.objectives().iter().map(|o| o.nick.clone()).collect();
    cinfo!(
        param.general.display_colorful,
        "{}",
        display_generation_legend(&nicks)
    );

    let mut generation = 0;
    'sweeps: for (sweep, &n_generations) in param.ga.generations.iter().enumerate() {
        if sweep > 0 {
            debug!(
                "sweep {} continues from {} retained individuals",
                sweep + 1,
                population.len()
            );
        }
        for _ in 0..n_generations {
            generation += 1;
            let mut offspring = breed(&population, param, seed_distribution, generation, rng);
            let pending = offspring.iter().filter(|i| !i.has_fitness()).count();
            evaluator.evaluate_population(&mut offspring, rng.gen(), false);

            let mut combined = population;
            combined.extend(offspring);
            for hof in hofs.iter_mut() {
                hof.update(&combined);
            }
            population = select(combined, param, param.ga.pop, rng);

            record_generation(
                &mut logbook,
                &population,
                sweep,
                generation,
                pending,
                param.general.display_colorful,
            );

            if !running.load(Ordering::Relaxed) {
                info!("interrupt received; stopping after generation {}", generation);
                break 'sweeps;
            }
        }
    }
    info!(
        "optimizer finished after {} generations in {:.2?}",
        generation,
        time.elapsed()
    );

    let results = finalize(&hofs, evaluator, rng.gen());
    OptimizerOutput {
        results,
        retained: population,
        logbook,
    }
}

/// Refit every hall-of-fame member's predictors on the full training data
/// and freeze the halls into results.
pub fn finalize(hofs: &[HallOfFame], evaluator: &Evaluator, seed: u64) -> Vec<OptimizerResult> {
    hofs.iter()
        .map(|hof| {
            let members: Vec<Individual> = hof.hofers().into_iter().cloned().collect();
            let masks: Vec<_> = members.iter().map(|m| m.mask.clone()).collect();
            let refit = evaluator.evaluate_batch(&masks, seed, true);
            let predictors: Vec<Vec<Option<Predictor>>> =
                refit.into_iter().map(|r| r.predictors).collect();
            OptimizerResult::new(hof.name(), members, predictors)
        })
        .collect()
}

fn select(
    population: Vec<Individual>,
    param: &Param,
    keep: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    match param.ga.selection {
        SelectionRule::elitist => {
            sorting::select_elitist(population, param.ga.sorting_strategy, keep, rng)
        }
        SelectionRule::tournament => sorting::select_tournament(
            population,
            param.ga.sorting_strategy,
            keep,
            param.ga.selection_tournament_size,
            rng,
        ),
    }
}

/// One round of variation: tournament-paired parents, uniform crossover on
/// the symmetric difference, one mutation operator, optional clone
/// repurposing. Fitness survives exactly when the mask did not change.
fn breed(
    population: &[Individual],
    param: &Param,
    seed_distribution: &Distribution,
    generation: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    let mut offspring = Vec::with_capacity(param.ga.pop);
    while offspring.len() < param.ga.pop {
        let a = tournament_parent(population, rng);
        let b = tournament_parent(population, rng);
        let (mut child1, mut child2) = if rng.gen_bool(param.ga.mating_prob) {
            crossover(&population[a], &population[b], generation, rng)
        } else {
            (population[a].clone(), population[b].clone())
        };
        mutate(&mut child1, param, generation, rng);
        mutate(&mut child2, param, generation, rng);
        offspring.push(child1);
        if offspring.len() < param.ga.pop {
            offspring.push(child2);
        }
    }

    if param.ga.use_clone_repurposing {
        repurpose_clones(population, &mut offspring, param, seed_distribution, generation, rng);
    }
    offspring
}

/// Pick the better of two random distinct members by dominance; on an
/// incomparable pair the smaller index wins, which favors the better rank
/// under elitist survivor ordering.
fn tournament_parent(population: &[Individual], rng: &mut ChaCha8Rng) -> usize {
    let mut picks: Vec<usize> = sample(rng, population.len(), 2.min(population.len())).iter().collect();
    picks.sort_unstable();
    match picks.as_slice() {
        [only] => *only,
        [first, second] => {
            if population[*second].dominates(&population[*first]) {
                *second
            } else {
                *first
            }
        }
        _ => unreachable!("tournament over an empty population"),
    }
}

/// Uniform crossover: every position where the parents disagree swaps
/// between the children with probability one half.
fn crossover(
    a: &Individual,
    b: &Individual,
    generation: usize,
    rng: &mut ChaCha8Rng,
) -> (Individual, Individual) {
    let mut mask1 = a.mask.clone();
    let mut mask2 = b.mask.clone();
    let mut changed = false;
    let in_a = a.mask.true_positions();
    let in_b = b.mask.true_positions();
    for &i in in_a.iter().chain(in_b.iter()) {
        if a.mask.get(i) != b.mask.get(i) && rng.gen_bool(0.5) {
            mask1.set(i, b.mask.get(i));
            mask2.set(i, a.mask.get(i));
            changed = true;
        }
    }
    if !changed {
        return (a.clone(), b.clone());
    }
    (
        Individual::new(mask1, generation),
        Individual::new(mask2, generation),
    )
}

fn mutate(child: &mut Individual, param: &Param, generation: usize, rng: &mut ChaCha8Rng) {
    let changed = match param.ga.bitlist_mutation_operator {
        MutationOperator::flip => mutate_flip(child, param.ga.mutation_frequency, rng),
        MutationOperator::symm => mutate_symmetric(child, param.ga.mutation_frequency, rng),
        MutationOperator::pers => mutate_personalized(child, param.ga.mutation_frequency, rng),
    };
    if changed {
        child.generation = generation;
        child.invalidate();
    }
}

fn binomial_count(n: usize, p: f64, rng: &mut ChaCha8Rng) -> usize {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    use rand::distributions::Distribution as SampleFrom;
    let binomial = Binomial::new(p, n as u64).expect("binomial from a clamped probability");
    let draw: u64 = binomial.sample(rng);
    draw as usize
}

/// Every bit flips with probability `f_m / N`.
fn mutate_flip(child: &mut Individual, frequency: f64, rng: &mut ChaCha8Rng) -> bool {
    let n = child.mask.len();
    let flips = binomial_count(n, frequency / n as f64, rng);
    if flips == 0 {
        return false;
    }
    for i in sample(rng, n, flips.min(n)) {
        child.mask.flip(i);
    }
    true
}

/// Class-balanced flips: 1→0 with `f_m / 2k`, 0→1 with `f_m / 2(N-k)`, so
/// the expected feature count is preserved.
fn mutate_symmetric(child: &mut Individual, frequency: f64, rng: &mut ChaCha8Rng) -> bool {
    let n = child.mask.len();
    let selected = child.mask.true_positions();
    let k = selected.len();
    let unselected: Vec<usize> = (0..n).filter(|&i| !child.mask.get(i)).collect();

    let drops = if k > 0 {
        binomial_count(k, frequency / (2.0 * k as f64), rng)
    } else {
        0
    };
    let adds = if n > k {
        binomial_count(n - k, frequency / (2.0 * (n - k) as f64), rng)
    } else {
        0
    };
    if drops == 0 && adds == 0 {
        return false;
    }
    for i in sample(rng, k, drops.min(k)) {
        child.mask.set(selected[i], false);
    }
    for i in sample(rng, unselected.len(), adds.min(unselected.len())) {
        child.mask.set(unselected[i], true);
    }
    true
}

/// Importance-aware variant of the symmetric flip: a selected feature's
/// drop probability shrinks with its share of the individual's own
/// importance mass, floored so even the best feature can be dropped.
/// Individuals without importances fall back to the plain flip.
fn mutate_personalized(child: &mut Individual, frequency: f64, rng: &mut ChaCha8Rng) -> bool {
    let importance = match &child.importance {
        Some(d) => d.clone(),
        None => return mutate_flip(child, frequency, rng),
    };
    let n = child.mask.len();
    let selected = child.mask.true_positions();
    let k = selected.len();
    let mut changed = false;

    if k > 0 {
        let base = frequency / (2.0 * k as f64);
        let max_weight = selected
            .iter()
            .map(|&i| importance.weight(i))
            .fold(0.0, f64::max);
        for &i in &selected {
            let share = if max_weight > 0.0 {
                importance.weight(i) / max_weight
            } else {
                0.0
            };
            let p = (base * (1.0 - share)).max(base * 0.1).min(1.0);
            if rng.gen_bool(p) {
                child.mask.set(i, false);
                changed = true;
            }
        }
    }
    if n > k {
        let unselected: Vec<usize> = (0..n).filter(|&i| !child.mask.get(i)).collect();
        let adds = binomial_count(unselected.len(), frequency / (2.0 * (n - k) as f64), rng);
        for i in sample(rng, unselected.len(), adds.min(unselected.len())) {
            child.mask.set(unselected[i], true);
            changed = true;
        }
    }
    changed
}

/// Replace offspring that duplicate a parent or an earlier offspring with
/// fresh draws from the seed distribution. The replacements carry no
/// fitness, so they are evaluated with the rest of the batch.
fn repurpose_clones(
    parents: &[Individual],
    offspring: &mut [Individual],
    param: &Param,
    seed_distribution: &Distribution,
    generation: usize,
    rng: &mut ChaCha8Rng,
) {
    let mut seen: std::collections::HashSet<u64> =
        parents.iter().map(|p| p.hash).collect();
    let mut repurposed = 0;
    for child in offspring.iter_mut() {
        if seen.insert(child.hash) {
            continue;
        }
        let mut replacement = prefilter::seed_individual(&param.ga, seed_distribution, generation, rng);
        // a fresh draw may still collide; accept it rather than loop forever
        seen.insert(replacement.hash);
        std::mem::swap(child, &mut replacement);
        repurposed += 1;
    }
    if repurposed > 0 {
        debug!("repurposed {} duplicate offspring", repurposed);
    }
}

fn record_generation(
    logbook: &mut Logbook,
    population: &[Individual],
    sweep: usize,
    generation: usize,
    n_evaluated: usize,
    colorful: bool,
) {
    let front_len = {
        let fronts = sorting::non_dominated_fronts(population);
        fronts.first().map(|f| f.len()).unwrap_or(0)
    };
    let n_objectives = population
        .iter()
        .find(|i| i.has_fitness())
        .map(|i| i.fitness().len())
        .unwrap_or(0);
    let best: Vec<f64> = (0..n_objectives)
        .map(|o| {
            population
                .iter()
                .filter(|i| i.has_fitness())
                .map(|i| i.fitness().weighted()[o])
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .collect();
    let mean_k = if population.is_empty() {
        0.0
    } else {
        population.iter().map(|i| i.k() as f64).sum::<f64>() / population.len() as f64
    };
    cinfo!(
        colorful,
        "{}",
        display_generation(generation, front_len, n_evaluated, &best, mean_k)
    );
    logbook.records.push(GenerationRecord {
        sweep,
        generation,
        front_len,
        n_evaluated,
        best,
        mean_k,
    });
}

/// Build the population-level rng for a run component from the master seed.
pub fn component_rng(seed: u64, component: &str) -> ChaCha8Rng {
    let mut hasher = Sha256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    ChaCha8Rng::seed_from_u64(u64::from_le_bytes(bytes))
}
