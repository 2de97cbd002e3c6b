use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::individual::Individual;
use crate::param::SortingStrategy;

/// Deb's fast non-dominated sort: indices layered into fronts, best first.
/// Individuals without fitness land together in one final layer.
pub fn non_dominated_fronts(individuals: &[Individual]) -> Vec<Vec<usize>> {
    let n = individuals.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut domination_count = vec![0usize; n];
    let mut unfit = Vec::new();
    let mut first_front = Vec::new();

    for i in 0..n {
        if !individuals[i].has_fitness() {
            unfit.push(i);
            continue;
        }
        for j in 0..n {
            if i == j || !individuals[j].has_fitness() {
                continue;
            }
            if individuals[i].dominates(&individuals[j]) {
                dominated_by[i].push(j);
            } else if individuals[j].dominates(&individuals[i]) {
                domination_count[i] += 1;
            }
        }
        if domination_count[i] == 0 {
            first_front.push(i);
        }
    }

    let mut fronts = Vec::new();
    let mut current = first_front;
    while !current.is_empty() {
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_by[i] {
                domination_count[j] -= 1;
                if domination_count[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(std::mem::replace(&mut current, next));
    }
    if !unfit.is_empty() {
        fronts.push(unfit);
    }
    fronts
}

/// Crowding distance of each member within one front; boundary members get
/// infinity.
pub fn crowding_distances(individuals: &[Individual], front: &[usize]) -> Vec<f64> {
    let m = front.len();
    let mut distances = vec![0.0; m];
    if m == 0 {
        return distances;
    }
    let k = individuals[front[0]].fitness().len();
    for objective in 0..k {
        let mut order: Vec<usize> = (0..m).collect();
        order.sort_by(|&a, &b| {
            individuals[front[a]]
                .fitness()
                .value(objective)
                .partial_cmp(&individuals[front[b]].fitness().value(objective))
                .unwrap()
        });
        let lo = individuals[front[order[0]]].fitness().value(objective);
        let hi = individuals[front[order[m - 1]]].fitness().value(objective);
        distances[order[0]] = f64::INFINITY;
        distances[order[m - 1]] = f64::INFINITY;
        if hi - lo <= 0.0 {
            continue;
        }
        for w in 1..m - 1 {
            let prev = individuals[front[order[w - 1]]].fitness().value(objective);
            let next = individuals[front[order[w + 1]]].fitness().value(objective);
            distances[order[w]] += (next - prev) / (hi - lo);
        }
    }
    distances
}

/// Attach crowding distances to every member, front by front.
pub fn assign_crowding(individuals: &mut [Individual], fronts: &[Vec<usize>]) {
    for front in fronts {
        if front.iter().any(|&i| !individuals[i].has_fitness()) {
            continue;
        }
        let distances = crowding_distances(individuals, front);
        for (w, &i) in front.iter().enumerate() {
            individuals[i].crowding = Some(distances[w]);
        }
    }
}

/// Decision-space ("social") scores per front: each member's mean Jaccard
/// distance to its two nearest mask-space neighbours in the same layer, and
/// its peculiarity, the mean distance to the whole layer. Spread-out masks
/// score high and are preferred at selection ties.
pub fn assign_social(individuals: &mut [Individual], fronts: &[Vec<usize>]) {
    for front in fronts {
        let m = front.len();
        for (w, &i) in front.iter().enumerate() {
            if !individuals[i].has_fitness() {
                continue;
            }
            let mut distances: Vec<f64> = (0..m)
                .filter(|&v| v != w)
                .map(|v| 1.0 - individuals[front[w]].mask.jaccard(&individuals[front[v]].mask))
                .collect();
            if distances.is_empty() {
                individuals[i].social_score = Some(f64::INFINITY);
                individuals[i].peculiarity = Some(f64::INFINITY);
                continue;
            }
            let peculiarity = distances.iter().sum::<f64>() / distances.len() as f64;
            distances.sort_by(|a, b| a.partial_cmp(b).unwrap());
            let count = distances.len().min(2);
            let social = distances.iter().take(count).sum::<f64>() / count as f64;
            individuals[i].social_score = Some(social);
            individuals[i].peculiarity = Some(peculiarity);
        }
    }
}

/// Rank each individual among the copies of its own mask: the first copy
/// seen gets 0, later copies count up. Repurposing targets ranks above 0.
pub fn assign_clone_rank(individuals: &mut [Individual]) {
    let mut seen: HashMap<u64, usize> = HashMap::new();
    for ind in individuals.iter_mut() {
        let rank = seen.entry(ind.hash).or_insert(0);
        ind.clone_rank = Some(*rank);
        *rank += 1;
    }
}

/// Das-Dennis reference directions on the unit simplex with `partitions`
/// divisions per axis.
pub fn reference_points(k: usize, partitions: usize) -> Vec<Vec<f64>> {
    let mut points = Vec::new();
    let mut current = vec![0usize; k];
    fill_reference(&mut points, &mut current, 0, partitions, partitions);
    points
        .into_iter()
        .map(|p: Vec<usize>| p.iter().map(|&c| c as f64 / partitions as f64).collect())
        .collect()
}

fn fill_reference(
    points: &mut Vec<Vec<usize>>,
    current: &mut Vec<usize>,
    dim: usize,
    partitions: usize,
    remaining: usize,
) {
    if dim == current.len() - 1 {
        current[dim] = remaining;
        points.push(current.clone());
        return;
    }
    for c in 0..=remaining {
        current[dim] = c;
        fill_reference(points, current, dim + 1, partitions, remaining - c);
    }
}

/// NSGA-III survivor selection: whole fronts are taken while they fit, then
/// the split front is filled by niching over adaptively normalized
/// reference points (least crowded niche first, random member within it).
pub fn nsga3_select(
    individuals: &[Individual],
    fronts: &[Vec<usize>],
    keep: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let mut chosen: Vec<usize> = Vec::with_capacity(keep);
    let mut split_front: Option<&Vec<usize>> = None;
    for front in fronts {
        if front.iter().any(|&i| !individuals[i].has_fitness()) {
            break;
        }
        if chosen.len() + front.len() <= keep {
            chosen.extend_from_slice(front);
        } else {
            split_front = Some(front);
            break;
        }
    }
    let split = match split_front {
        Some(front) => front,
        None => return chosen,
    };
    let slots = keep - chosen.len();

    let k = individuals[split[0]].fitness().len();
    let considered: Vec<usize> = chosen.iter().chain(split.iter()).copied().collect();

    // adaptive normalization: ideal point and per-objective span over the
    // considered members
    let mut ideal = vec![f64::INFINITY; k];
    let mut worst = vec![f64::NEG_INFINITY; k];
    for &i in &considered {
        let weighted = individuals[i].fitness().weighted();
        for d in 0..k {
            // weighted values are maximize-oriented; normalize on their negation
            ideal[d] = ideal[d].min(-weighted[d]);
            worst[d] = worst[d].max(-weighted[d]);
        }
    }
    let normalize = |i: usize| -> Vec<f64> {
        let weighted = individuals[i].fitness().weighted();
        (0..k)
            .map(|d| {
                let span = worst[d] - ideal[d];
                if span <= 0.0 {
                    0.0
                } else {
                    (-weighted[d] - ideal[d]) / span
                }
            })
            .collect()
    };

    let partitions = match k {
        0 | 1 | 2 => 12,
        3 => 10,
        4 => 6,
        _ => 3,
    };
    let refs = reference_points(k, partitions);

    let associate = |i: usize| -> usize {
        let f = normalize(i);
        let mut best = 0;
        let mut best_distance = f64::INFINITY;
        for (r, reference) in refs.iter().enumerate() {
            let distance = perpendicular_distance(reference, &f);
            if distance < best_distance {
                best_distance = distance;
                best = r;
            }
        }
        best
    };

    let mut niche_count = vec![0usize; refs.len()];
    for &i in &chosen {
        niche_count[associate(i)] += 1;
    }
    let mut pool: Vec<(usize, usize)> = split.iter().map(|&i| (associate(i), i)).collect();

    while chosen.len() < keep && !pool.is_empty() {
        // the niche with the fewest chosen members that still has candidates
        let min_count = pool.iter().map(|&(r, _)| niche_count[r]).min().unwrap();
        let candidates: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, &(r, _))| niche_count[r] == min_count)
            .map(|(idx, _)| idx)
            .collect();
        let pick = candidates[rng.gen_range(0..candidates.len())];
        let (reference, individual) = pool.remove(pick);
        niche_count[reference] += 1;
        chosen.push(individual);
    }
    chosen
}

fn perpendicular_distance(reference: &[f64], point: &[f64]) -> f64 {
    let norm_sq: f64 = reference.iter().map(|r| r * r).sum();
    if norm_sq <= 0.0 {
        return point.iter().map(|p| p * p).sum::<f64>().sqrt();
    }
    let scale: f64 = reference
        .iter()
        .zip(point.iter())
        .map(|(r, p)| r * p)
        .sum::<f64>()
        / norm_sq;
    point
        .iter()
        .zip(reference.iter())
        .map(|(p, r)| (p - scale * r).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Secondary comparison within one Pareto layer, per the configured
/// strategy. `Less` means `a` is preferred.
pub fn secondary_compare(a: &Individual, b: &Individual, strategy: SortingStrategy) -> Ordering {
    let by_crowding = || {
        b.crowding
            .unwrap_or(0.0)
            .partial_cmp(&a.crowding.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
    };
    match strategy {
        SortingStrategy::CrowdFull | SortingStrategy::NSGA3 => by_crowding(),
        SortingStrategy::CrowdCI => by_crowding().then_with(|| {
            // narrower interval = more reliable member wins the tie
            a.mean_ci_width()
                .partial_cmp(&b.mean_ci_width())
                .unwrap_or(Ordering::Equal)
        }),
        SortingStrategy::Social => b
            .social_score
            .unwrap_or(0.0)
            .partial_cmp(&a.social_score.unwrap_or(0.0))
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.peculiarity
                    .unwrap_or(0.0)
                    .partial_cmp(&a.peculiarity.unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal)
            }),
    }
}

/// Primary Pareto sort plus secondary attribute managers: returns the whole
/// population ordered best first, with crowding / social / clone-rank
/// attributes attached.
pub fn rank(
    individuals: &mut Vec<Individual>,
    strategy: SortingStrategy,
    keep: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<usize> {
    let fronts = non_dominated_fronts(individuals);
    assign_crowding(individuals, &fronts);
    assign_clone_rank(individuals);
    if strategy == SortingStrategy::Social {
        assign_social(individuals, &fronts);
    }

    if strategy == SortingStrategy::NSGA3 {
        let mut order = nsga3_select(individuals, &fronts, keep, rng);
        // pad with the remaining indices in front order for full-ranking uses
        let mut in_order: Vec<bool> = vec![false; individuals.len()];
        for &i in &order {
            in_order[i] = true;
        }
        for front in &fronts {
            for &i in front {
                if !in_order[i] {
                    order.push(i);
                }
            }
        }
        return order;
    }

    let mut order = Vec::with_capacity(individuals.len());
    for front in &fronts {
        let mut members = front.clone();
        members.sort_by(|&a, &b| secondary_compare(&individuals[a], &individuals[b], strategy));
        order.extend(members);
    }
    order
}

/// Elitist truncation: reorder the population by rank and keep the best
/// `keep` members.
pub fn select_elitist(
    mut individuals: Vec<Individual>,
    strategy: SortingStrategy,
    keep: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    let order = rank(&mut individuals, strategy, keep, rng);
    let mut by_rank: Vec<Individual> = Vec::with_capacity(keep);
    let mut taken = vec![false; individuals.len()];
    for &i in order.iter().take(keep) {
        taken[i] = true;
    }
    for &i in &order {
        if taken[i] {
            by_rank.push(individuals[i].clone());
            if by_rank.len() == keep {
                break;
            }
        }
    }
    by_rank
}

/// Tournament survivor selection: winners of repeated size-`arity`
/// tournaments under the secondary comparator, each winner removed from the
/// candidate pool. Ties fall to a uniformly random contestant.
pub fn select_tournament(
    mut individuals: Vec<Individual>,
    strategy: SortingStrategy,
    keep: usize,
    arity: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Individual> {
    let order = rank(&mut individuals, strategy, keep, rng);
    // rank position per index, the tournament's comparison key
    let mut position = vec![0usize; individuals.len()];
    for (p, &i) in order.iter().enumerate() {
        position[i] = p;
    }

    let mut pool: Vec<usize> = (0..individuals.len()).collect();
    let mut winners = Vec::with_capacity(keep);
    while winners.len() < keep && !pool.is_empty() {
        let mut contestants: Vec<usize> = pool
            .choose_multiple(rng, arity.min(pool.len()))
            .copied()
            .collect();
        contestants.shuffle(rng); // uniform tie-break among equal ranks
        let winner = *contestants
            .iter()
            .min_by_key(|&&i| position[i])
            .expect("tournament with no contestants");
        pool.retain(|&i| i != winner);
        winners.push(individuals[winner].clone());
    }
    winners
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::individual::tests::individual_with_fitness;
    use rand::SeedableRng;

    fn population() -> Vec<Individual> {
        vec![
            individual_with_fitness(&[0], 16, &[0.9, 0.1]),
            individual_with_fitness(&[1], 16, &[0.1, 0.9]),
            individual_with_fitness(&[2], 16, &[0.5, 0.5]),
            individual_with_fitness(&[3], 16, &[0.4, 0.4]), // dominated by [2]
            individual_with_fitness(&[4], 16, &[0.2, 0.2]), // dominated by all above
        ]
    }

    #[test]
    fn test_non_dominated_fronts_layering() {
        let pop = population();
        let fronts = non_dominated_fronts(&pop);
        assert_eq!(fronts.len(), 3);
        let mut first = fronts[0].clone();
        first.sort();
        assert_eq!(first, vec![0, 1, 2], "the trade-off triple forms the top layer");
        assert_eq!(fronts[1], vec![3]);
        assert_eq!(fronts[2], vec![4]);
    }

    #[test]
    fn test_top_front_is_mutually_non_dominating() {
        let pop = population();
        let fronts = non_dominated_fronts(&pop);
        for &a in &fronts[0] {
            for &b in &fronts[0] {
                assert!(
                    a == b || !pop[a].dominates(&pop[b]),
                    "front member {} dominates front member {}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_unfit_individuals_form_the_last_layer() {
        let mut pop = population();
        pop.push(Individual::new(crate::mask::FeatureMask::zeros(16), 0));
        let fronts = non_dominated_fronts(&pop);
        assert_eq!(fronts.last().unwrap(), &vec![5]);
    }

    #[test]
    fn test_crowding_boundaries_are_infinite() {
        let pop = population();
        let fronts = non_dominated_fronts(&pop);
        let distances = crowding_distances(&pop, &fronts[0]);
        let infinite = distances.iter().filter(|d| d.is_infinite()).count();
        assert_eq!(infinite, 2, "the two extreme members get infinite crowding");
        assert!(distances.iter().all(|&d| d > 0.0));
    }

    #[test]
    fn test_elitist_selection_respects_fronts() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kept = select_elitist(population(), SortingStrategy::CrowdFull, 3, &mut rng);
        assert_eq!(kept.len(), 3);
        let masks: Vec<Vec<usize>> = kept.iter().map(|i| i.mask.true_positions()).collect();
        assert!(
            masks.contains(&vec![0]) && masks.contains(&vec![1]) && masks.contains(&vec![2]),
            "the whole first front must survive: {:?}",
            masks
        );
    }

    #[test]
    fn test_crowd_ci_prefers_narrow_intervals() {
        let mut a = individual_with_fitness(&[0], 8, &[0.5, 0.5]);
        let mut b = individual_with_fitness(&[1], 8, &[0.6, 0.4]);
        a.crowding = Some(1.0);
        b.crowding = Some(1.0);
        a.ci95 = Some(vec![(0.4, 0.6), (0.4, 0.6)]);
        b.ci95 = Some(vec![(0.2, 0.8), (0.2, 0.8)]);
        assert_eq!(
            secondary_compare(&a, &b, SortingStrategy::CrowdCI),
            Ordering::Less,
            "equal crowding should fall back to the narrower interval"
        );
    }

    #[test]
    fn test_social_scores_spread() {
        let mut pop = vec![
            individual_with_fitness(&[0, 1, 2], 16, &[0.9, 0.1]),
            individual_with_fitness(&[0, 1, 3], 16, &[0.5, 0.5]),
            individual_with_fitness(&[10, 11, 12], 16, &[0.1, 0.9]),
        ];
        let fronts = non_dominated_fronts(&pop);
        assign_social(&mut pop, &fronts);
        assert!(
            pop[2].social_score.unwrap() > pop[0].social_score.unwrap(),
            "the mask far from everyone should score highest"
        );
        assert!(pop[2].peculiarity.unwrap() > pop[1].peculiarity.unwrap());
    }

    #[test]
    fn test_clone_rank_counts_duplicates() {
        let mut pop = vec![
            individual_with_fitness(&[0], 8, &[0.5]),
            individual_with_fitness(&[0], 8, &[0.5]),
            individual_with_fitness(&[1], 8, &[0.5]),
            individual_with_fitness(&[0], 8, &[0.5]),
        ];
        assign_clone_rank(&mut pop);
        let ranks: Vec<usize> = pop.iter().map(|i| i.clone_rank.unwrap()).collect();
        assert_eq!(ranks, vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_reference_points_lie_on_the_simplex() {
        let refs = reference_points(3, 4);
        assert_eq!(refs.len(), 15, "C(4+2, 2) lattice points for k=3, p=4");
        for point in &refs {
            let sum: f64 = point.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "reference {:?} off the simplex", point);
        }
    }

    #[test]
    fn test_nsga3_select_prefers_earlier_fronts() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let pop = population();
        let fronts = non_dominated_fronts(&pop);
        let chosen = nsga3_select(&pop, &fronts, 4, &mut rng);
        assert_eq!(chosen.len(), 4);
        assert!(
            chosen.contains(&0) && chosen.contains(&1) && chosen.contains(&2),
            "the whole first front fits and must be taken: {:?}",
            chosen
        );
    }

    #[test]
    fn test_tournament_selection_returns_distinct_winners() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kept = select_tournament(population(), SortingStrategy::CrowdFull, 4, 2, &mut rng);
        assert_eq!(kept.len(), 4);
        let mut hashes: Vec<u64> = kept.iter().map(|i| i.hash).collect();
        hashes.sort();
        hashes.dedup();
        assert_eq!(hashes.len(), 4, "winners are drawn without replacement");
    }
}
