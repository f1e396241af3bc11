use std::io::Cursor;
use std::sync::Arc;

use tether_remote::{BlobStore, MemoryBlobStore, MemoryTree, RemoteTree};

use crate::decode;
use crate::ids::{AccountId, TicketId};
use crate::paths;
use crate::types::TicketRecord;
use crate::upload::AttachmentUploader;

pub(crate) fn memory_tree() -> Arc<MemoryTree> {
    Arc::new(MemoryTree::new())
}

pub(crate) fn blob_store() -> Arc<MemoryBlobStore> {
    Arc::new(MemoryBlobStore::new())
}

pub(crate) fn uploader_for(blobs: &Arc<MemoryBlobStore>) -> AttachmentUploader {
    AttachmentUploader::new(Arc::clone(blobs) as Arc<dyn BlobStore>)
}

/// A tiny but real PNG; the uploader must decode it before compressing.
pub(crate) fn sample_image() -> Vec<u8> {
    let pixels = image::RgbImage::from_fn(2, 2, |x, y| {
        image::Rgb([(x * 80) as u8, (y * 80) as u8, 200])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(pixels)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Writes a minimal ticket record under the given account and returns its id.
pub(crate) async fn seed_ticket(tree: &Arc<MemoryTree>, account: &str) -> TicketId {
    let record = TicketRecord {
        id: TicketId::new_v7(),
        reference: "R1".to_string(),
        description: "D1".to_string(),
        attached_photo_urls: None,
    };
    tree.write(
        &paths::ticket_path(&AccountId::from(account), record.id),
        decode::encode_ticket(&record),
    )
    .await
    .unwrap();
    record.id
}
