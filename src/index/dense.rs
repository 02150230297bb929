//! Dense nearest-neighbor structures
//!
//! Two structures behind one enum: an exact flat scan for small corpora
//! and an inverted-file (IVF) structure for larger ones, trained by
//! k-means over the corpus vectors. The IVF path trades recall for search
//! cost; selection between the two is a size policy, not a correctness
//! rule. Distances are squared Euclidean throughout.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;

use super::IndexError;

const KMEANS_ITERATIONS: usize = 10;

/// Nearest-neighbor structure over row-indexed vectors
#[derive(Debug, Clone)]
pub enum DenseIndex {
    Flat(FlatIndex),
    Clustered(IvfIndex),
}

/// Exact brute-force scan
#[derive(Debug, Clone)]
pub struct FlatIndex {
    vectors: Array2<f32>,
}

/// Inverted-file structure: vectors grouped by nearest trained centroid,
/// searched by probing the closest `nprobe` groups
#[derive(Debug, Clone)]
pub struct IvfIndex {
    vectors: Array2<f32>,
    centroids: Array2<f32>,
    lists: Vec<Vec<u32>>,
    nprobe: usize,
}

impl DenseIndex {
    /// Build a structure for the given vectors, choosing flat or
    /// clustered by the configured size threshold.
    pub fn build(vectors: Array2<f32>, config: &IndexConfig) -> Self {
        let n = vectors.nrows();
        if n <= config.flat_threshold {
            return DenseIndex::Flat(FlatIndex { vectors });
        }

        let nlist = (n / config.cluster_divisor)
            .min(config.max_clusters)
            .max(1);
        let (centroids, assignments) = kmeans(&vectors, nlist, KMEANS_ITERATIONS);

        let mut lists = vec![Vec::new(); nlist];
        for (row, &cluster) in assignments.iter().enumerate() {
            lists[cluster as usize].push(row as u32);
        }

        DenseIndex::Clustered(IvfIndex {
            vectors,
            centroids,
            lists,
            nprobe: config.nprobe.max(1),
        })
    }

    /// Append vectors, assigning clustered rows to their nearest existing
    /// centroid. Centroids are not retrained on add.
    pub fn add(&mut self, new: ArrayView2<f32>) -> Result<(), IndexError> {
        match self {
            DenseIndex::Flat(flat) => {
                flat.vectors
                    .append(Axis(0), new)
                    .map_err(|e| IndexError::Codec(format!("append failed: {}", e)))?;
            }
            DenseIndex::Clustered(ivf) => {
                for row in new.outer_iter() {
                    let cluster = nearest_centroid(&ivf.centroids, row);
                    let row_id = ivf.vectors.nrows() as u32;
                    ivf.lists[cluster].push(row_id);
                    ivf.vectors
                        .append(Axis(0), row.insert_axis(Axis(0)))
                        .map_err(|e| IndexError::Codec(format!("append failed: {}", e)))?;
                }
            }
        }
        Ok(())
    }

    /// Nearest rows to `query`, ascending by squared distance, at most `k`
    pub fn search(&self, query: ArrayView1<f32>, k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.is_empty() {
            return Vec::new();
        }
        match self {
            DenseIndex::Flat(flat) => scan(&flat.vectors, 0..flat.vectors.nrows(), query, k),
            DenseIndex::Clustered(ivf) => {
                let mut by_centroid: Vec<(usize, f32)> = (0..ivf.centroids.nrows())
                    .map(|c| (c, squared_l2(ivf.centroids.row(c), query)))
                    .collect();
                by_centroid.sort_by(|a, b| a.1.total_cmp(&b.1));
                by_centroid.truncate(ivf.nprobe);

                let rows: Vec<usize> = by_centroid
                    .iter()
                    .flat_map(|&(c, _)| ivf.lists[c].iter().map(|&r| r as usize))
                    .collect();
                scan(&ivf.vectors, rows.into_iter(), query, k)
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DenseIndex::Flat(flat) => flat.vectors.nrows(),
            DenseIndex::Clustered(ivf) => ivf.vectors.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        match self {
            DenseIndex::Flat(flat) => flat.vectors.ncols(),
            DenseIndex::Clustered(ivf) => ivf.vectors.ncols(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DenseIndex::Flat(_) => "flat",
            DenseIndex::Clustered(_) => "clustered",
        }
    }

    pub fn to_snapshot(&self) -> IndexSnapshot {
        match self {
            DenseIndex::Flat(flat) => IndexSnapshot {
                dimension: flat.vectors.ncols(),
                kind: SnapshotKind::Flat {
                    rows: flat.vectors.nrows(),
                    data: flat.vectors.iter().copied().collect(),
                },
            },
            DenseIndex::Clustered(ivf) => IndexSnapshot {
                dimension: ivf.vectors.ncols(),
                kind: SnapshotKind::Clustered {
                    rows: ivf.vectors.nrows(),
                    data: ivf.vectors.iter().copied().collect(),
                    centroid_rows: ivf.centroids.nrows(),
                    centroid_data: ivf.centroids.iter().copied().collect(),
                    lists: ivf.lists.clone(),
                    nprobe: ivf.nprobe,
                },
            },
        }
    }

    pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Self, IndexError> {
        let dimension = snapshot.dimension;
        match snapshot.kind {
            SnapshotKind::Flat { rows, data } => {
                let vectors = Array2::from_shape_vec((rows, dimension), data)
                    .map_err(|e| IndexError::Codec(e.to_string()))?;
                Ok(DenseIndex::Flat(FlatIndex { vectors }))
            }
            SnapshotKind::Clustered {
                rows,
                data,
                centroid_rows,
                centroid_data,
                lists,
                nprobe,
            } => {
                let vectors = Array2::from_shape_vec((rows, dimension), data)
                    .map_err(|e| IndexError::Codec(e.to_string()))?;
                let centroids = Array2::from_shape_vec((centroid_rows, dimension), centroid_data)
                    .map_err(|e| IndexError::Codec(e.to_string()))?;
                Ok(DenseIndex::Clustered(IvfIndex {
                    vectors,
                    centroids,
                    lists,
                    nprobe,
                }))
            }
        }
    }
}

/// Serializable form of a dense index
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexSnapshot {
    dimension: usize,
    kind: SnapshotKind,
}

impl IndexSnapshot {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            SnapshotKind::Flat { rows, .. } => *rows,
            SnapshotKind::Clustered { rows, .. } => *rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum SnapshotKind {
    Flat {
        rows: usize,
        data: Vec<f32>,
    },
    Clustered {
        rows: usize,
        data: Vec<f32>,
        centroid_rows: usize,
        centroid_data: Vec<f32>,
        lists: Vec<Vec<u32>>,
        nprobe: usize,
    },
}

fn squared_l2(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum()
}

fn nearest_centroid(centroids: &Array2<f32>, vector: ArrayView1<f32>) -> usize {
    let mut best = 0;
    let mut best_distance = f32::INFINITY;
    for (c, centroid) in centroids.outer_iter().enumerate() {
        let d = squared_l2(centroid, vector);
        if d < best_distance {
            best_distance = d;
            best = c;
        }
    }
    best
}

fn scan(
    vectors: &Array2<f32>,
    rows: impl Iterator<Item = usize>,
    query: ArrayView1<f32>,
    k: usize,
) -> Vec<(usize, f32)> {
    let mut hits: Vec<(usize, f32)> = rows
        .map(|r| (r, squared_l2(vectors.row(r), query)))
        .collect();
    hits.sort_by(|a, b| a.1.total_cmp(&b.1));
    hits.truncate(k);
    hits
}

/// Lloyd's iterations with deterministic strided initialization. Empty
/// clusters keep their previous centroid.
fn kmeans(data: &Array2<f32>, k: usize, iterations: usize) -> (Array2<f32>, Vec<u32>) {
    let n = data.nrows();
    let dim = data.ncols();

    let mut centroids = Array2::zeros((k, dim));
    for c in 0..k {
        let row = c * n / k;
        centroids.row_mut(c).assign(&data.row(row));
    }

    let mut assignments = vec![0u32; n];
    for _ in 0..iterations {
        let mut changed = false;
        for i in 0..n {
            let best = nearest_centroid(&centroids, data.row(i)) as u32;
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }

        let mut sums = Array2::<f32>::zeros((k, dim));
        let mut counts = vec![0usize; k];
        for i in 0..n {
            let c = assignments[i] as usize;
            let mut sum = sums.row_mut(c);
            sum += &data.row(i);
            counts[c] += 1;
        }
        for c in 0..k {
            if counts[c] > 0 {
                let mut row = centroids.row_mut(c);
                row.assign(&sums.row(c));
                row.mapv_inplace(|x| x / counts[c] as f32);
            }
        }

        if !changed {
            break;
        }
    }

    (centroids, assignments)
}
