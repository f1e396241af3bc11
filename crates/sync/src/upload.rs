use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tether_remote::{BlobError, BlobStore};
use uuid::Uuid;

use crate::settings::SyncSettings;

/// Bandwidth-oriented default; visible compression artifacts are accepted.
pub const DEFAULT_JPEG_QUALITY: u8 = 60;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AttachmentError {
    #[snafu(display("attachment is not a decodable image"))]
    DecodeImage {
        stage: &'static str,
        source: image::ImageError,
    },
    #[snafu(display("failed to re-encode attachment as jpeg"))]
    EncodeImage {
        stage: &'static str,
        source: image::ImageError,
    },
    #[snafu(display("object store rejected attachment '{key}'"))]
    StoreObject {
        stage: &'static str,
        key: String,
        source: BlobError,
    },
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Compresses and stores message/ticket attachments, returning durable URLs.
#[derive(Clone)]
pub struct AttachmentUploader {
    blobs: Arc<dyn BlobStore>,
    jpeg_quality: u8,
}

impl AttachmentUploader {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self::with_quality(blobs, DEFAULT_JPEG_QUALITY)
    }

    pub fn with_quality(blobs: Arc<dyn BlobStore>, jpeg_quality: u8) -> Self {
        Self {
            blobs,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Builds an uploader from the persisted settings.
    pub fn from_settings(blobs: Arc<dyn BlobStore>, settings: &SyncSettings) -> Self {
        Self::with_quality(blobs, settings.jpeg_quality)
    }

    /// Compresses one image and stores it under `{key_hint}-{fresh uuid}`.
    ///
    /// The fresh suffix makes every attempt land on its own key, so retries
    /// after a partial failure and concurrent sends from the same ticket can
    /// never overwrite each other's objects.
    pub async fn upload(&self, bytes: &[u8], key_hint: &str) -> AttachmentResult<String> {
        let compressed = self.compress(bytes)?;
        let key = format!("{key_hint}-{}", Uuid::now_v7());
        self.blobs
            .store(compressed, &key)
            .await
            .context(StoreObjectSnafu {
                stage: "upload-store",
                key: key.clone(),
            })
    }

    /// Uploads a batch in input order. The first failure aborts the batch;
    /// earlier uploads stay in storage, orphaned but harmless.
    pub async fn upload_all(
        &self,
        images: &[Vec<u8>],
        mut key_hint: impl FnMut(usize) -> String,
    ) -> AttachmentResult<Vec<String>> {
        let mut urls = Vec::with_capacity(images.len());
        for (index, bytes) in images.iter().enumerate() {
            urls.push(self.upload(bytes, &key_hint(index)).await?);
        }
        Ok(urls)
    }

    fn compress(&self, bytes: &[u8]) -> AttachmentResult<Vec<u8>> {
        let decoded = image::load_from_memory(bytes).context(DecodeImageSnafu {
            stage: "compress-decode",
        })?;

        let mut output = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut output, self.jpeg_quality);
        // JPEG has no alpha channel; flatten before encoding.
        decoded
            .to_rgb8()
            .write_with_encoder(encoder)
            .context(EncodeImageSnafu {
                stage: "compress-encode",
            })?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::sample_image;
    use tether_remote::MemoryBlobStore;

    fn uploader(blobs: &Arc<MemoryBlobStore>) -> AttachmentUploader {
        AttachmentUploader::new(Arc::clone(blobs) as Arc<dyn BlobStore>)
    }

    #[tokio::test]
    async fn upload_stores_a_compressed_object_under_a_unique_key() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let uploader = uploader(&blobs);

        let first = uploader.upload(&sample_image(), "t1/m1/0").await.unwrap();
        let second = uploader.upload(&sample_image(), "t1/m1/0").await.unwrap();

        assert!(first.starts_with("memory://t1/m1/0-"));
        // Same hint, distinct keys: a retry never collides with the earlier attempt.
        assert_ne!(first, second);
        assert_eq!(blobs.object_count(), 2);
    }

    #[tokio::test]
    async fn non_image_payloads_fail_before_any_store_call() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let uploader = uploader(&blobs);

        let error = uploader.upload(b"not an image", "t1/m1/0").await.unwrap_err();
        assert!(matches!(error, AttachmentError::DecodeImage { .. }));
        assert_eq!(blobs.object_count(), 0);
    }

    #[tokio::test]
    async fn settings_quality_drives_the_compression_level() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let coarse = AttachmentUploader::from_settings(
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            &SyncSettings {
                jpeg_quality: 5,
                ..SyncSettings::default()
            },
        );
        let fine = AttachmentUploader::from_settings(
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            &SyncSettings {
                jpeg_quality: 95,
                ..SyncSettings::default()
            },
        );

        let input = detailed_image();
        let coarse_url = coarse.upload(&input, "q/low").await.unwrap();
        let fine_url = fine.upload(&input, "q/high").await.unwrap();

        let object_len = |url: &str| {
            blobs
                .object(url.strip_prefix("memory://").unwrap())
                .unwrap()
                .len()
        };
        assert!(object_len(&coarse_url) < object_len(&fine_url));
    }

    // High-frequency content so the quality setting visibly changes the
    // encoded size.
    fn detailed_image() -> Vec<u8> {
        let pixels = image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 7 + y * 13) as u8, (x * 31) as u8, (y * 17) as u8])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(pixels)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn batch_upload_preserves_input_order_and_aborts_on_failure() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let uploader = uploader(&blobs);

        let images = vec![sample_image(), sample_image(), sample_image()];
        let urls = uploader
            .upload_all(&images, |index| format!("t1/m1/{index}"))
            .await
            .unwrap();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].contains("/0-") && urls[2].contains("/2-"));

        blobs.fail_nth_store(2);
        let error = uploader
            .upload_all(&images, |index| format!("t1/m2/{index}"))
            .await
            .unwrap_err();
        assert!(matches!(error, AttachmentError::StoreObject { .. }));
        // Image 1 of the failed batch is orphaned in storage, images 2..3 were never stored.
        assert_eq!(blobs.object_count(), 4);
    }
}
