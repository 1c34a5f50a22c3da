//! Prefetching batch loader
//!
//! A producer thread walks the requested order in batch-sized chunks and
//! decodes each chunk on a fixed rayon pool. Finished batches go through a
//! bounded channel to the calling thread, which is the only thread that ever
//! sees the model. The producer stays at most `prefetch_batches` ahead.

use std::sync::mpsc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::dataset::provider::{HorseItem, SampleProvider};
use crate::utils::error::{EquiVisionError, Result};

pub struct BatchLoader {
    pool: ThreadPool,
    num_workers: usize,
    batch_size: usize,
    prefetch_batches: usize,
}

impl BatchLoader {
    pub fn new(num_workers: usize, batch_size: usize, prefetch_batches: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(EquiVisionError::Config("batch_size must be > 0".into()));
        }

        let num_workers = num_workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .thread_name(|i| format!("loader-{}", i))
            .build()
            .map_err(|e| EquiVisionError::Config(format!("failed to start loader pool: {}", e)))?;

        Ok(Self {
            pool,
            num_workers,
            batch_size,
            prefetch_batches: prefetch_batches.max(1),
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches `len` samples produce
    pub fn num_batches(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Fold over the batches of `order` (positions within `provider`), in order.
    ///
    /// `f` runs on the calling thread. The first decode error, or the first
    /// error returned by `f`, stops the producer and is returned.
    pub fn try_fold<S, F>(&self, provider: &SampleProvider, order: &[usize], init: S, mut f: F) -> Result<S>
    where
        F: FnMut(S, Vec<HorseItem>) -> Result<S>,
    {
        std::thread::scope(|scope| {
            let (tx, rx) = mpsc::sync_channel::<Result<Vec<HorseItem>>>(self.prefetch_batches);

            scope.spawn(move || {
                for (i, chunk) in order.chunks(self.batch_size).enumerate() {
                    let batch = self.pool.install(|| {
                        chunk
                            .par_iter()
                            .map(|&idx| provider.get(idx))
                            .collect::<Result<Vec<_>>>()
                    });
                    let failed = batch.is_err();

                    // Receiver gone means the consumer stopped early
                    if tx.send(batch).is_err() || failed {
                        debug!("Loader stopped after batch {}", i);
                        break;
                    }
                }
            });

            let mut state = init;
            for batch in rx.iter() {
                state = f(state, batch?)?;
            }
            Ok(state)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::augmentation::Transform;
    use crate::dataset::catalog::tests::{write_manifest, write_png};
    use crate::dataset::catalog::ClassCatalog;
    use crate::dataset::provider::{Partition, PartitionRole};
    use tempfile::TempDir;

    fn provider(dir: &TempDir, n: usize) -> SampleProvider {
        write_manifest(dir.path(), r#"{"01":"Arabian","02":"Friesian"}"#);
        for i in 0..n {
            let id = if i < n / 2 { "01" } else { "02" };
            write_png(&dir.path().join(format!("{}_{:03}.png", id, i)), i as u8);
        }
        let catalog = ClassCatalog::build(dir.path()).unwrap();
        let partition = Partition {
            role: PartitionRole::Validation,
            indices: (0..catalog.len()).collect(),
        };
        SampleProvider::new(catalog.samples(), partition, Transform::evaluation(8)).unwrap()
    }

    #[test]
    fn test_batches_preserve_order() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, 10);
        let loader = BatchLoader::new(3, 4, 2).unwrap();
        let order: Vec<usize> = (0..10).rev().collect();

        let (sizes, labels) = loader
            .try_fold(&provider, &order, (Vec::new(), Vec::new()), |(mut sizes, mut labels), items| {
                sizes.push(items.len());
                labels.extend(items.iter().map(|it| it.label));
                Ok((sizes, labels))
            })
            .unwrap();

        assert_eq!(sizes, vec![4, 4, 2]);
        let expected: Vec<usize> = order.iter().map(|&i| provider.sample(i).unwrap().label).collect();
        assert_eq!(labels, expected);
        assert_eq!(loader.num_batches(10), 3);
    }

    #[test]
    fn test_decode_failure_aborts() {
        let dir = TempDir::new().unwrap();
        let _ = provider(&dir, 4);
        std::fs::write(dir.path().join("01_bad.png"), b"garbage").unwrap();
        let catalog = ClassCatalog::build(dir.path()).unwrap();
        let partition = Partition {
            role: PartitionRole::Train,
            indices: (0..catalog.len()).collect(),
        };
        let provider = SampleProvider::new(catalog.samples(), partition, Transform::evaluation(8)).unwrap();

        let loader = BatchLoader::new(2, 2, 1).unwrap();
        let order: Vec<usize> = (0..provider.len()).collect();
        let result = loader.try_fold(&provider, &order, 0usize, |n, items| Ok(n + items.len()));

        assert!(matches!(result, Err(EquiVisionError::Decode(..))));
    }

    #[test]
    fn test_consumer_error_stops_loader() {
        let dir = TempDir::new().unwrap();
        let provider = provider(&dir, 8);
        let loader = BatchLoader::new(2, 1, 1).unwrap();
        let order: Vec<usize> = (0..8).collect();

        let result = loader.try_fold(&provider, &order, 0usize, |n, _| {
            if n == 2 {
                Err(EquiVisionError::Config("stop".into()))
            } else {
                Ok(n + 1)
            }
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        assert!(BatchLoader::new(1, 0, 1).is_err());
    }
}
