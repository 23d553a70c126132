use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{trace, warn};

use crate::data::collate::{collate, Batch, CollatePolicy};
use crate::data::dataset::VideoDataset;
use crate::error::{Error, Result};

/// Batches fetched ahead per worker.
const PREFETCH_PER_WORKER: usize = 2;

/// Options for a `DataLoader`.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    /// `0` decodes on the calling thread.
    pub num_workers: usize,
    pub policy: CollatePolicy,
    pub seed: u64,
}

/// Iterates a dataset in collated batches, one pass per call to `iter`.
pub struct DataLoader {
    dataset: Arc<dyn VideoDataset>,
    config: LoaderConfig,
    rng: StdRng,
}

impl DataLoader {
    /// Fails on a zero batch size.
    pub fn new(dataset: Arc<dyn VideoDataset>, config: LoaderConfig) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(Error::Collate("batch size must be at least 1".into()));
        }
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(DataLoader { dataset, config, rng })
    }

    /// Number of batches one pass yields.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.config.batch_size;
        if self.config.drop_last {
            n / bs
        } else {
            (n + bs - 1) / bs
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset_len(&self) -> usize {
        self.dataset.len()
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Starts a new pass. With `shuffle` the sample order is redrawn from the
    /// loader's seeded generator, so consecutive passes differ but a run is
    /// reproducible.
    pub fn iter(&mut self) -> BatchIter {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.config.shuffle {
            order.shuffle(&mut self.rng);
        }

        let bs = self.config.batch_size;
        let plan: Vec<Vec<usize>> = order
            .chunks(bs)
            .filter(|chunk| !self.config.drop_last || chunk.len() == bs)
            .map(|chunk| chunk.to_vec())
            .collect();

        if self.config.num_workers == 0 {
            return BatchIter {
                source: Source::Inline {
                    dataset: self.dataset.clone(),
                    plan: plan.into_iter(),
                    policy: self.config.policy,
                },
                next_batch: 0,
            };
        }

        let workers = self.config.num_workers.min(plan.len()).max(1);
        let mut receivers = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for w in 0..workers {
            let (tx, rx) = bounded::<Result<Batch>>(PREFETCH_PER_WORKER);
            let dataset = self.dataset.clone();
            let policy = self.config.policy;
            let assigned: Vec<Vec<usize>> =
                plan.iter().skip(w).step_by(workers).cloned().collect();

            handles.push(Some(std::thread::spawn(move || {
                for indices in assigned {
                    let batch = load_batch(dataset.as_ref(), &indices, policy);
                    // Receiver gone: the pass was abandoned.
                    if tx.send(batch).is_err() {
                        trace!(worker = w, "loader worker stopping early");
                        break;
                    }
                }
            })));
            receivers.push(rx);
        }

        BatchIter {
            source: Source::Workers {
                receivers,
                handles,
                remaining: plan.len(),
            },
            next_batch: 0,
        }
    }
}

fn load_batch(dataset: &dyn VideoDataset, indices: &[usize], policy: CollatePolicy) -> Result<Batch> {
    let videos = indices
        .iter()
        .map(|&i| dataset.get(i))
        .collect::<Result<Vec<_>>>()?;
    collate(&videos, policy)
}

enum Source {
    Inline {
        dataset: Arc<dyn VideoDataset>,
        plan: std::vec::IntoIter<Vec<usize>>,
        policy: CollatePolicy,
    },
    Workers {
        receivers: Vec<Receiver<Result<Batch>>>,
        handles: Vec<Option<JoinHandle<()>>>,
        remaining: usize,
    },
}

/// One pass over a `DataLoader`. Batches arrive in plan order regardless of
/// how many workers decode them.
pub struct BatchIter {
    source: Source,
    next_batch: usize,
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = match &mut self.source {
            Source::Inline {
                dataset,
                plan,
                policy,
            } => {
                let indices = plan.next()?;
                load_batch(dataset.as_ref(), &indices, *policy)
            }
            Source::Workers {
                receivers,
                handles,
                remaining,
            } => {
                if *remaining == 0 {
                    return None;
                }
                let worker = self.next_batch % receivers.len();
                *remaining -= 1;
                match receivers[worker].recv() {
                    Ok(batch) => batch,
                    // A worker only hangs up early if it panicked. End the
                    // pass with that failure.
                    Err(_) => {
                        *remaining = 0;
                        let reason = match handles[worker].take().map(JoinHandle::join) {
                            Some(Err(payload)) => panic_message(payload.as_ref()),
                            _ => "worker exited before its batches were sent".to_string(),
                        };
                        Err(Error::LoaderWorker { worker, reason })
                    }
                }
            }
        };
        self.next_batch += 1;
        Some(item)
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let Source::Workers {
            receivers, handles, ..
        } = &mut self.source
        {
            receivers.clear();
            for (worker, handle) in handles.drain(..).enumerate() {
                if let Some(Err(payload)) = handle.map(JoinHandle::join) {
                    warn!(worker, reason = %panic_message(payload.as_ref()), "loader worker panicked");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::Video;
    use crate::error::Error;
    use ndarray::Array4;

    /// Video `i` has `i % 3 + 2` frames filled with `i`.
    struct Synthetic(usize);

    impl VideoDataset for Synthetic {
        fn len(&self) -> usize {
            self.0
        }

        fn get(&self, idx: usize) -> Result<Video> {
            if idx == 99 {
                return Err(Error::Shape("boom".into()));
            }
            Ok(Array4::from_elem((idx % 3 + 2, 3, 2, 2), idx as f32))
        }
    }

    fn config(num_workers: usize, shuffle: bool) -> LoaderConfig {
        LoaderConfig {
            batch_size: 3,
            shuffle,
            drop_last: true,
            num_workers,
            policy: CollatePolicy::Truncate,
            seed: 7,
        }
    }

    fn first_values(loader: &mut DataLoader) -> Vec<f32> {
        loader
            .iter()
            .map(|b| {
                let b = b.unwrap();
                (0..b.batch_size()).map(|i| b.video[[i, 0, 0, 0, 0]]).collect::<Vec<_>>()
            })
            .flatten()
            .collect()
    }

    #[test]
    fn drop_last_discards_partial_batch() {
        let mut loader = DataLoader::new(Arc::new(Synthetic(10)), config(0, false)).unwrap();
        assert_eq!(loader.len(), 3);
        assert_eq!(first_values(&mut loader), (0..9).map(|i| i as f32).collect::<Vec<_>>());

        let mut keep = config(0, false);
        keep.drop_last = false;
        assert_eq!(DataLoader::new(Arc::new(Synthetic(10)), keep).unwrap().len(), 4);
    }

    #[test]
    fn workers_preserve_order() {
        let mut inline = DataLoader::new(Arc::new(Synthetic(12)), config(0, true)).unwrap();
        let mut threaded = DataLoader::new(Arc::new(Synthetic(12)), config(3, true)).unwrap();
        assert_eq!(first_values(&mut inline), first_values(&mut threaded));
    }

    #[test]
    fn shuffles_differ_between_passes_but_cover_everything() {
        let mut loader = DataLoader::new(Arc::new(Synthetic(30)), config(2, true)).unwrap();
        let mut a = first_values(&mut loader);
        let mut b = first_values(&mut loader);
        assert_ne!(a, b);
        a.sort_by(|x, y| x.partial_cmp(y).unwrap());
        b.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn abandoning_a_pass_stops_workers() {
        let mut loader = DataLoader::new(Arc::new(Synthetic(60)), config(2, false)).unwrap();
        let mut it = loader.iter();
        assert!(it.next().is_some());
        drop(it);
    }

    #[test]
    fn load_errors_are_yielded() {
        let mut loader = DataLoader::new(Arc::new(Synthetic(102)), config(0, false)).unwrap();
        let errors = loader.iter().filter(|b| b.is_err()).count();
        assert_eq!(errors, 1);
    }

    /// Panics while decoding sample 1.
    struct Panicky(usize);

    impl VideoDataset for Panicky {
        fn len(&self) -> usize {
            self.0
        }

        fn get(&self, idx: usize) -> Result<Video> {
            if idx == 1 {
                panic!("corrupt sample {}", idx);
            }
            Ok(Array4::zeros((2, 3, 2, 2)))
        }
    }

    #[test]
    fn worker_panic_ends_the_pass_with_an_error() {
        let mut cfg = config(2, false);
        cfg.batch_size = 1;
        let mut loader = DataLoader::new(Arc::new(Panicky(6)), cfg).unwrap();
        let results: Vec<_> = loader.iter().collect();

        // Batch 0 arrives, batch 1 reports the panic, nothing after it.
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(Error::LoaderWorker { worker, reason }) => {
                assert_eq!(*worker, 1);
                assert!(reason.contains("corrupt sample 1"));
            }
            other => panic!("expected a worker error, got {:?}", other.as_ref().map(|b| b.batch_size())),
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut cfg = config(0, false);
        cfg.batch_size = 0;
        assert!(matches!(
            DataLoader::new(Arc::new(Synthetic(4)), cfg),
            Err(Error::Collate(_))
        ));
    }
}
