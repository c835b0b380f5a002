use num_traits::{Float, FromPrimitive, ToPrimitive};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::cmp::Ordering;

use crate::dist::{PairDistance, SelfDist, VecSet};
use crate::error::NndError;
use crate::graph::KnnGraph;
use crate::heap::NPOS;

/// Occlusion-prune the long edges of a k-NN graph
///
/// Classic relative-neighbour rule: walking each row from closest to
/// farthest, an edge `(i, j)` is dropped when some already-kept neighbour
/// sits closer to `j` than `i` does. The closest neighbour is always kept.
/// `prune_probability` below 1 randomises the rule: an occluded edge is
/// only dropped with that probability.
///
/// ### Params
///
/// * `store` - Ingested data (for the occlusion distances)
/// * `graph` - The graph to diversify
/// * `prune_probability` - Bernoulli chance of dropping an occluded edge,
///   in `(0, 1]`
/// * `seed` - Seed for the per-row draws
///
/// ### Returns
///
/// Per-row `(neighbour, distance)` lists of retained edges.
pub fn diversify<T>(
    store: &VecSet<T>,
    graph: &KnnGraph<T>,
    prune_probability: f64,
    seed: u64,
) -> Result<Vec<Vec<(usize, T)>>, NndError>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    if graph.n_points != store.n() {
        return Err(NndError::ShapeMismatch {
            expected: store.n(),
            got: graph.n_points,
        });
    }
    graph.validate(store.n())?;

    let dist = SelfDist::new(store);

    let kept: Vec<Vec<(usize, T)>> = (0..graph.n_points)
        .into_par_iter()
        .map(|i| {
            let mut neighbours: Vec<(usize, T)> = graph
                .idx_row(i)
                .iter()
                .zip(graph.dist_row(i).iter())
                .filter(|(&j, _)| j != NPOS)
                .map(|(&j, &d)| (j, d))
                .collect();
            neighbours.sort_unstable_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

            if neighbours.is_empty() {
                return Vec::new();
            }

            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(i as u64));
            let mut kept = vec![neighbours[0]];

            for &(cand_idx, cand_dist) in &neighbours[1..] {
                let mut retain = true;
                for &(kept_idx, _) in &kept {
                    let occluding = dist.distance(kept_idx, cand_idx);
                    if occluding < cand_dist && rng.random::<f64>() < prune_probability {
                        retain = false;
                        break;
                    }
                }
                if retain {
                    kept.push((cand_idx, cand_dist));
                }
            }

            kept
        })
        .collect();

    Ok(kept)
}

/// Cap every row at its `max_degree` closest edges
///
/// Ties on distance keep the earlier-inserted edge, so pruning is stable.
///
/// ### Params
///
/// * `graph` - Per-row `(neighbour, distance)` lists
/// * `max_degree` - Maximum retained edges per row
pub fn degree_prune<T>(graph: &[Vec<(usize, T)>], max_degree: usize) -> Vec<Vec<(usize, T)>>
where
    T: Float + Send + Sync,
{
    graph
        .iter()
        .map(|row| {
            let mut row = row.clone();
            // stable sort: equal distances stay in insertion order
            row.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            row.truncate(max_degree);
            row
        })
        .collect()
}

///////////
// Tests //
///////////
