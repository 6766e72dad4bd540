use std::sync::Arc;

use lumen_contracts::media::{BlobFetcher, BlobMaterializer, MediaDecoder};

/// Optional collaborators that turn a resolved URL into a local copy.
#[derive(Clone)]
pub struct Materializer {
    pub(crate) fetcher: Arc<dyn BlobFetcher>,
    pub(crate) store: Arc<dyn BlobMaterializer>,
    pub(crate) decoder: Option<Arc<dyn MediaDecoder>>,
}

impl Materializer {
    pub fn new(
        fetcher: Arc<dyn BlobFetcher>,
        store: Arc<dyn BlobMaterializer>,
    ) -> Self {
        Self {
            fetcher,
            store,
            decoder: None,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn MediaDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }
}

impl std::fmt::Debug for Materializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Materializer")
            .field("decoder", &self.decoder.is_some())
            .finish_non_exhaustive()
    }
}
