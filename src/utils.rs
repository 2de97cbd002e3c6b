use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

/// a macro to declare simple Vec<String>
#[macro_export]
macro_rules! string_vec {
    ($($x:expr),*) => {
        vec![$($x.into()),*]
    };
}

/// Log at info level honoring the colorful-display switch: when `colorful`
/// is false any ANSI escape sequence in the message is stripped first.
#[macro_export]
macro_rules! cinfo {
    ($colorful:expr, $($arg:tt)*) => {
        if $colorful {
            log::info!($($arg)*);
        } else {
            log::info!("{}", $crate::utils::strip_ansi(&format!($($arg)*)));
        }
    };
}

/// Remove ANSI CSI sequences (`ESC [ ... final-byte`) from a string.
pub fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for d in chars.by_ref() {
                if d != '[' && ('\x40'..='\x7e').contains(&d) {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Kahan-compensated summation. Hypervolume sums accumulate many small cell
/// contributions of mixed magnitude; naive summation drifts there.
pub fn kahan_sum<I: IntoIterator<Item = f64>>(values: I) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for value in values {
        let y = value - compensation;
        let t = sum + y;
        compensation = (t - sum) - y;
        sum = t;
    }
    sum
}

/// Mean and population standard deviation. Empty input yields (0,0).
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Empirical quantile with linear interpolation. `sorted` must be ascending.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let h = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// a function used essentially in CV that split randomly a Vec<T> into p Vec<T> of approximatively the same size
pub fn split_into_balanced_random_chunks<T: std::clone::Clone>(
    vec: Vec<T>,
    p: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<Vec<T>> {
    let mut shuffled = vec;
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let base_size = n / p;
    let extra_elements = n % p;

    let mut chunks = Vec::new();
    let mut start = 0;

    for i in 0..p {
        let chunk_size = base_size + if i < extra_elements { 1 } else { 0 };
        let end = start + chunk_size;
        chunks.push(shuffled[start..end].to_vec());
        start = end;
    }

    chunks
}

/// Solve `a · x = b` by Gaussian elimination with partial pivoting.
/// Returns None when the system is singular.
pub fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap()
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                let delta = factor * a[col][k];
                a[row][k] -= delta;
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in row + 1..n {
            acc -= a[row][k] * x[k];
        }
        x[row] = acc / a[row][row];
    }
    Some(x)
}

/// One-line header matching [display_generation] columns.
pub fn display_generation_legend(objective_nicks: &[String]) -> String {
    let mut line = format!("{:>5} {:>6} {:>6}", "gen", "front", "evals");
    for nick in objective_nicks {
        line.push_str(&format!(" {:>14}", format!("best {}", nick)));
    }
    line.push_str(&format!(" {:>8}", "mean k"));
    line
}

/// One-line per-generation summary logged by the optimizer.
pub fn display_generation(
    generation: usize,
    front_len: usize,
    n_evaluated: usize,
    best_values: &[f64],
    mean_k: f64,
) -> String {
    let mut line = format!("{:>5} {:>6} {:>6}", generation, front_len, n_evaluated);
    for value in best_values {
        line.push_str(&format!(" {:>14.4}", value));
    }
    line.push_str(&format!(" {:>8.1}", mean_k));
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_kahan_sum_is_stable() {
        // 1.0 followed by many tiny values that a naive f64 sum drops entirely
        let values: Vec<f64> = std::iter::once(1.0)
            .chain(std::iter::repeat(1e-16).take(100_000))
            .collect();
        let kahan = kahan_sum(values.iter().copied());
        let expected = 1.0 + 1e-16 * 100_000.0;
        assert!(
            (kahan - expected).abs() < 1e-12,
            "Kahan sum should keep the small terms, got {} vs {}",
            kahan,
            expected
        );
    }

    #[test]
    fn test_mean_and_std() {
        let (mean, std) = mean_and_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-12, "mean should be 5, got {}", mean);
        assert!((std - 2.0).abs() < 1e-12, "population std should be 2, got {}", std);
        assert_eq!(mean_and_std(&[]), (0.0, 0.0), "empty input should yield zeros");
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn test_quantile() {
        let sorted = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile(&sorted, 0.0), 0.0);
        assert_eq!(quantile(&sorted, 1.0), 4.0);
        assert_eq!(quantile(&sorted, 0.5), 2.0);
        assert!((quantile(&sorted, 0.25) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_split_into_balanced_random_chunks() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let chunks = split_into_balanced_random_chunks((0..10).collect(), 3, &mut rng);
        assert_eq!(chunks.len(), 3, "should produce exactly 3 chunks");
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3], "sizes should be balanced with extras first");
        let mut all: Vec<i32> = chunks.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<i32>>(), "chunks should partition the input");
    }

    #[test]
    fn test_split_is_deterministic_per_seed() {
        let mut rng1 = ChaCha8Rng::seed_from_u64(42);
        let mut rng2 = ChaCha8Rng::seed_from_u64(42);
        let a = split_into_balanced_random_chunks((0..20).collect::<Vec<i32>>(), 4, &mut rng1);
        let b = split_into_balanced_random_chunks((0..20).collect::<Vec<i32>>(), 4, &mut rng2);
        assert_eq!(a, b, "same seed should reproduce the same chunks");
    }

    #[test]
    fn test_solve_linear_system() {
        // 2x + y = 5 ; x - y = 1  =>  x = 2, y = 1
        let a = vec![vec![2.0, 1.0], vec![1.0, -1.0]];
        let b = vec![5.0, 1.0];
        let x = solve_linear_system(a, b).unwrap();
        assert!((x[0] - 2.0).abs() < 1e-10 && (x[1] - 1.0).abs() < 1e-10);

        let singular = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(
            solve_linear_system(singular, vec![1.0, 2.0]).is_none(),
            "singular system should yield None"
        );
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[0m"), "ok");
        assert_eq!(strip_ansi("plain"), "plain");
    }
}
