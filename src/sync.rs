use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::model::{PhotoRef, ProductDescriptor, SyncResult};
use crate::upload::MediaUploadService;

/// Drives the upload service over every photo of a descriptor.
pub struct SyncOrchestrator {
    uploader: Arc<MediaUploadService>,
    concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(uploader: Arc<MediaUploadService>, concurrency: usize) -> Self {
        Self {
            uploader,
            concurrency: concurrency.max(1),
        }
    }

    /// Caller has already checked that `product` is valid and sync-eligible.
    #[instrument(skip_all, fields(product_id = %product.id, photos = product.photos.len()))]
    pub async fn sync(&self, product: &ProductDescriptor) -> SyncResult {
        let order = upload_order(&product.photos);
        let outcomes = stream::iter(order.into_iter().enumerate())
            .map(|(position, index)| {
                self.uploader
                    .sync_photo(&product.id, &product.photos[index], position + 1, index)
            })
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let result = SyncResult::from_outcomes(&product.id, outcomes);
        info!(
            uploaded = result.uploaded,
            failed = result.failed,
            total = result.total,
            "photo sync complete"
        );
        result
    }
}

/// Array indices in upload order: sequence position ascending, array position on ties
/// or when the sequence is absent.
pub fn upload_order(photos: &[PhotoRef]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..photos.len()).collect();
    order.sort_by_key(|&i| (photos[i].sequence.unwrap_or(i as i64), i));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(seq: Option<i64>) -> PhotoRef {
        PhotoRef {
            url: "x.jpg".into(),
            alt: None,
            sequence: seq,
            note: None,
        }
    }

    #[test]
    fn order_follows_sequence_then_array_position() {
        let photos = vec![photo(Some(5)), photo(Some(1)), photo(None), photo(Some(1))];
        // keys: (5,0) (1,1) (2,2) (1,3)
        assert_eq!(upload_order(&photos), vec![1, 3, 2, 0]);
    }

    #[test]
    fn order_without_sequences_is_array_order() {
        let photos = vec![photo(None), photo(None), photo(None)];
        assert_eq!(upload_order(&photos), vec![0, 1, 2]);
    }
}
