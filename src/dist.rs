use faer::MatRef;
use num_traits::{Float, FromPrimitive, ToPrimitive};

use crate::error::NndError;

///////////////
// Distances //
///////////////

/// Distance metrics supported by the graph builders
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum Dist {
    /// Euclidean distance
    #[default]
    Euclidean,
    /// Squared Euclidean distance (no square root)
    L2,
    /// Cosine distance
    Cosine,
    /// Manhattan distance
    Manhattan,
    /// Hamming distance over 8-bit elements
    Hamming,
}

/// Parse a metric name
///
/// ### Params
///
/// * `s` - One of `"euclidean"`, `"l2"`, `"cosine"`, `"manhattan"` or
///   `"hamming"` (case-insensitive).
///
/// ### Returns
///
/// The `Dist` to use, or `NndError::UnknownMetric`.
pub fn parse_metric(s: &str) -> Result<Dist, NndError> {
    match s.to_lowercase().as_str() {
        "euclidean" => Ok(Dist::Euclidean),
        "l2" => Ok(Dist::L2),
        "cosine" => Ok(Dist::Cosine),
        "manhattan" => Ok(Dist::Manhattan),
        "hamming" => Ok(Dist::Hamming),
        _ => Err(NndError::UnknownMetric(s.to_string())),
    }
}

/////////////
// Kernels //
/////////////

#[inline(always)]
fn l2_dist<T: Float>(vec_i: &[T], vec_j: &[T]) -> T {
    vec_i
        .iter()
        .zip(vec_j.iter())
        .map(|(&a, &b)| {
            let diff = a - b;
            diff * diff
        })
        .fold(T::zero(), |acc, x| acc + x)
}

#[inline(always)]
fn manhattan_dist<T: Float>(vec_i: &[T], vec_j: &[T]) -> T {
    vec_i
        .iter()
        .zip(vec_j.iter())
        .map(|(&a, &b)| (a - b).abs())
        .fold(T::zero(), |acc, x| acc + x)
}

#[inline(always)]
fn cosine_dist<T: Float>(vec_i: &[T], vec_j: &[T], norm_i: T, norm_j: T) -> T {
    let dot = vec_i
        .iter()
        .zip(vec_j.iter())
        .map(|(&a, &b)| a * b)
        .fold(T::zero(), |acc, x| acc + x);

    T::one() - (dot / (norm_i * norm_j))
}

#[inline(always)]
fn hamming_dist(bytes_i: &[u8], bytes_j: &[u8]) -> u32 {
    bytes_i
        .iter()
        .zip(bytes_j.iter())
        .map(|(&a, &b)| (a ^ b).count_ones())
        .sum()
}

//////////////////
// Vector store //
//////////////////

/// Flat vector store for one point collection
///
/// Rows of the input matrix are flattened into a contiguous buffer so the
/// distance kernels stream contiguous coordinates. Cosine norms are
/// pre-computed at ingestion; hamming inputs are cast element-wise to `u8`.
///
/// ### Fields
///
/// * `vectors_flat` - Row-major flattened data
/// * `bytes_flat` - `u8` cast of the data, filled only for Hamming
/// * `norms` - Per-sample L2 norms, filled only for Cosine
/// * `dim` - Embedding dimensions
/// * `n` - Number of samples
/// * `metric` - The metric this store was ingested for
pub struct VecSet<T> {
    vectors_flat: Vec<T>,
    bytes_flat: Vec<u8>,
    norms: Vec<T>,
    dim: usize,
    n: usize,
    metric: Dist,
}

impl<T> VecSet<T>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    /// Ingest a data matrix
    ///
    /// ### Params
    ///
    /// * `mat` - The data matrix. Rows represent the samples, columns the
    ///   embedding dimensions.
    /// * `metric` - The distance metric the store will serve.
    ///
    /// ### Returns
    ///
    /// The flattened store, or `NndError::NonFiniteData` if the input
    /// contains NaN or infinite values.
    pub fn from_mat(mat: MatRef<T>, metric: Dist) -> Result<Self, NndError> {
        let n = mat.nrows();
        let dim = mat.ncols();

        let mut vectors_flat = Vec::with_capacity(n * dim);
        for i in 0..n {
            vectors_flat.extend(mat.row(i).iter().copied());
        }

        if vectors_flat.iter().any(|v| !v.is_finite()) {
            return Err(NndError::NonFiniteData);
        }

        let bytes_flat = if metric == Dist::Hamming {
            vectors_flat
                .iter()
                .map(|v| v.to_u8().ok_or(NndError::NonFiniteData))
                .collect::<Result<Vec<u8>, NndError>>()?
        } else {
            Vec::new()
        };

        let norms = if metric == Dist::Cosine {
            (0..n)
                .map(|i| {
                    let start = i * dim;
                    vectors_flat[start..start + dim]
                        .iter()
                        .map(|x| *x * *x)
                        .fold(T::zero(), |a, b| a + b)
                        .sqrt()
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            vectors_flat,
            bytes_flat,
            norms,
            dim,
            n,
            metric,
        })
    }

    /// Number of samples in the store
    pub fn n(&self) -> usize {
        self.n
    }

    /// Embedding dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The metric this store was ingested for
    pub fn metric(&self) -> Dist {
        self.metric
    }

    #[inline(always)]
    fn vector(&self, i: usize) -> &[T] {
        let start = i * self.dim;
        &self.vectors_flat[start..start + self.dim]
    }

    #[inline(always)]
    fn bytes(&self, i: usize) -> &[u8] {
        let start = i * self.dim;
        &self.bytes_flat[start..start + self.dim]
    }

    /// Distance between row `i` of this store and row `j` of `other`
    ///
    /// Both stores must have been ingested with the same metric and
    /// dimensionality; this is enforced at the public entry points.
    #[inline(always)]
    pub fn dist_between(&self, i: usize, other: &VecSet<T>, j: usize) -> T {
        match self.metric {
            Dist::Euclidean => l2_dist(self.vector(i), other.vector(j)).sqrt(),
            Dist::L2 => l2_dist(self.vector(i), other.vector(j)),
            Dist::Cosine => cosine_dist(
                self.vector(i),
                other.vector(j),
                self.norms[i],
                other.norms[j],
            ),
            Dist::Manhattan => manhattan_dist(self.vector(i), other.vector(j)),
            Dist::Hamming => {
                T::from_u32(hamming_dist(self.bytes(i), other.bytes(j))).unwrap_or_else(T::zero)
            }
        }
    }
}

///////////////
// Pair seam //
///////////////

/// Pairwise distance over indices into one or two point collections
///
/// The graph updaters are generic over this seam so the per-pair loop stays
/// monomorphised for the build and query cases.
pub trait PairDistance<T>: Sync {
    fn distance(&self, i: usize, j: usize) -> T;
}

/// Distances within a single collection (graph build)
pub struct SelfDist<'a, T> {
    store: &'a VecSet<T>,
}

impl<'a, T> SelfDist<'a, T> {
    pub fn new(store: &'a VecSet<T>) -> Self {
        Self { store }
    }
}

impl<T> PairDistance<T> for SelfDist<'_, T>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    #[inline(always)]
    fn distance(&self, i: usize, j: usize) -> T {
        self.store.dist_between(i, self.store, j)
    }
}

/// Distances from query rows to reference rows (graph query)
///
/// `distance(i, j)` is measured between query row `i` and reference row `j`.
pub struct QueryDist<'a, T> {
    reference: &'a VecSet<T>,
    query: &'a VecSet<T>,
}

impl<'a, T> QueryDist<'a, T> {
    pub fn new(reference: &'a VecSet<T>, query: &'a VecSet<T>) -> Self {
        Self { reference, query }
    }
}

impl<T> PairDistance<T> for QueryDist<'_, T>
where
    T: Float + FromPrimitive + ToPrimitive + Send + Sync,
{
    #[inline(always)]
    fn distance(&self, i: usize, j: usize) -> T {
        self.query.dist_between(i, self.reference, j)
    }
}

///////////
// Tests //
///////////
