pub mod face;
pub mod media;

pub use face::{EmbeddingStatus, FaceClusterRow, FaceEmbeddingRow, FaceMatchRow, FacialArea};
pub use media::{EventRow, MediaRow, UserReference};
