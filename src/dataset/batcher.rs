//! Burn batcher: stacks transformed items into device tensors

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use crate::dataset::provider::HorseItem;

/// A mini-batch on device
#[derive(Clone, Debug)]
pub struct HorseBatch<B: Backend> {
    /// `[batch, 3, size, size]`, already normalized
    pub images: Tensor<B, 4>,
    /// `[batch]` class indices
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> HorseBatch<B> {
    pub fn len(&self) -> usize {
        self.targets.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stacks [`HorseItem`]s produced by a `SampleProvider`
#[derive(Clone, Debug)]
pub struct HorseBatcher {
    image_size: usize,
}

impl HorseBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, HorseItem, HorseBatch<B>> for HorseBatcher {
    fn batch(&self, items: Vec<HorseItem>, device: &B::Device) -> HorseBatch<B> {
        let batch_size = items.len();
        let size = self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend_from_slice(&item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, size, size]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        HorseBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let items = vec![
            HorseItem {
                image: vec![0.5; 3 * 4 * 4],
                label: 1,
            },
            HorseItem {
                image: vec![-0.5; 3 * 4 * 4],
                label: 0,
            },
        ];

        let batch: HorseBatch<TestBackend> = HorseBatcher::new(4).batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.len(), 2);
        let targets: Vec<i64> = batch.targets.into_data().convert::<i64>().to_vec().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }
}
