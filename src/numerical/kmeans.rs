//! Deterministic Lloyd k-means over fixed-dimension points.
//!
//! Centroids are seeded from evenly spaced points of the sorted input and
//! ties in the assignment step go to the lowest-index centroid, so the same
//! input always produces the same labelling.

/// Maximum Lloyd iterations before giving up on convergence.
const MAX_ITERATIONS: usize = 100;

fn sq_dist<const D: usize>(a: &[f64; D], b: &[f64; D]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn cmp_points<const D: usize>(a: &[f64; D], b: &[f64; D]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ord = x.total_cmp(y);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

/// Number of clusters to use for `n` values.
///
/// Capped at 3, and scaled down so every cluster can hold the 10% of
/// points required to survive range extraction; small inputs collapse to a
/// single cluster spanning all values.
pub fn cluster_count(n: usize) -> usize {
    (n / 10).clamp(1, 3)
}

/// Cluster `points` into `k` groups, returning one label per point.
///
/// `k` is clamped to the number of points. Empty input yields no labels.
pub fn cluster<const D: usize>(points: &[[f64; D]], k: usize) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }
    let k = k.clamp(1, points.len());

    // Seed centroids from evenly spaced positions of the sorted input
    let mut sorted: Vec<&[f64; D]> = points.iter().collect();
    sorted.sort_by(|a, b| cmp_points(a, b));
    let mut centroids: Vec<[f64; D]> = (0..k)
        .map(|i| {
            let idx = if k == 1 { 0 } else { i * (points.len() - 1) / (k - 1) };
            *sorted[idx]
        })
        .collect();

    let mut labels = vec![0usize; points.len()];
    for _ in 0..MAX_ITERATIONS {
        // Assignment step; ties go to the lowest-index centroid
        let mut changed = false;
        for (label, point) in labels.iter_mut().zip(points.iter()) {
            let mut best = 0usize;
            let mut best_dist = f64::MAX;
            for (i, centroid) in centroids.iter().enumerate() {
                let dist = sq_dist(point, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best = i;
                }
            }
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        // Update step; empty clusters keep their previous centroid
        let mut sums = vec![[0.0f64; D]; k];
        let mut counts = vec![0usize; k];
        for (label, point) in labels.iter().zip(points.iter()) {
            counts[*label] += 1;
            for d in 0..D {
                sums[*label][d] += point[d];
            }
        }
        for i in 0..k {
            if counts[i] > 0 {
                for d in 0..D {
                    centroids[i][d] = sums[i][d] / counts[i] as f64;
                }
            }
        }
    }

    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_count_scales_with_input() {
        assert_eq!(cluster_count(0), 1);
        assert_eq!(cluster_count(4), 1);
        assert_eq!(cluster_count(29), 2);
        assert_eq!(cluster_count(30), 3);
        assert_eq!(cluster_count(10_000), 3);
    }

    #[test]
    fn test_single_cluster_labels_everything_zero() {
        let points: Vec<[f64; 1]> = vec![[1.0], [2.0], [3.0]];
        assert_eq!(cluster(&points, 1), vec![0, 0, 0]);
    }

    #[test]
    fn test_separates_two_groups() {
        let mut points: Vec<[f64; 1]> = Vec::new();
        points.extend((0..10).map(|i| [f64::from(i)]));
        points.extend((0..10).map(|i| [1000.0 + f64::from(i)]));
        let labels = cluster(&points, 2);
        let first = labels[0];
        assert!(labels[..10].iter().all(|&l| l == first));
        let second = labels[10];
        assert!(labels[10..].iter().all(|&l| l == second));
        assert_ne!(first, second);
    }

    #[test]
    fn test_deterministic() {
        let points: Vec<[f64; 2]> = (0..50)
            .map(|i| [f64::from(i % 7), f64::from(i % 11)])
            .collect();
        assert_eq!(cluster(&points, 3), cluster(&points, 3));
    }

    #[test]
    fn test_k_clamped_to_points() {
        let points: Vec<[f64; 1]> = vec![[1.0], [2.0]];
        let labels = cluster(&points, 3);
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().all(|&l| l < 2));
    }
}
