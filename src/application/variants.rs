//! Image variant generation: four derived rasters per source image.
//!
//! Thumbnails are always produced. Large variants are produced only when the
//! source exceeds the large box; otherwise the large JPEG aliases the
//! original and only a cheap WebP re-encode is written. There is no partial
//! result: any decode, encode, or write error fails the whole operation.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView, codecs::jpeg::JpegEncoder, imageops::FilterType};
use thiserror::Error;

use crate::{
    domain::media::ProcessedImage,
    infra::storage::{MediaStorage, StorageError},
};

/// Target box for thumbnail variants, aspect ratio preserved.
pub const THUMBNAIL_BOX: (u32, u32) = (300, 200);

/// Target box for large variants; sources already inside it are not resized.
pub const LARGE_BOX: (u32, u32) = (1200, 800);

const JPEG_QUALITY: u8 = 85;
const WEBP_QUALITY: f32 = 85.0;
/// Quality for the WebP re-encode of an original that needed no resize.
const WEBP_PASSTHROUGH_QUALITY: f32 = 90.0;

#[derive(Debug, Error)]
pub enum VariantError {
    #[error("failed to read source image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode source image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to encode `{path}`: {reason}")]
    Encode { path: PathBuf, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Produces the derived variant set for one source image.
///
/// All work is synchronous and CPU-bound; callers on the async runtime wrap
/// invocations in `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct VariantGenerator {
    storage: MediaStorage,
}

impl VariantGenerator {
    pub fn new(storage: MediaStorage) -> Self {
        Self { storage }
    }

    /// Generate all variants for `source`, deriving output file names from
    /// `base_name` and passing `original_url` through onto the result.
    pub fn process(
        &self,
        source: &Path,
        base_name: &str,
        original_url: &str,
    ) -> Result<ProcessedImage, VariantError> {
        let file_size = fs::metadata(source)?.len();
        let img = image::open(source)?;
        let (width, height) = img.dimensions();

        let thumb = img.resize(THUMBNAIL_BOX.0, THUMBNAIL_BOX.1, FilterType::Lanczos3);
        let thumb_jpeg = self.storage.thumbnail_dir().join(format!("{base_name}_thumb.jpg"));
        let thumb_webp = self.storage.thumbnail_dir().join(format!("{base_name}_thumb.webp"));
        write_jpeg(&thumb, &thumb_jpeg)?;
        write_webp(&thumb, &thumb_webp, WEBP_QUALITY)?;

        let large_webp = self.storage.large_dir().join(format!("{base_name}_large.webp"));
        let large_url = if width > LARGE_BOX.0 || height > LARGE_BOX.1 {
            let large = img.resize(LARGE_BOX.0, LARGE_BOX.1, FilterType::Lanczos3);
            let large_jpeg = self.storage.large_dir().join(format!("{base_name}_large.jpg"));
            write_jpeg(&large, &large_jpeg)?;
            write_webp(&large, &large_webp, WEBP_QUALITY)?;
            self.storage.public_url(&large_jpeg)?
        } else {
            // The source already fits the large box: alias the original for
            // JPEG and only re-encode to WebP, which is worth having anyway.
            write_webp(&img, &large_webp, WEBP_PASSTHROUGH_QUALITY)?;
            original_url.to_string()
        };

        Ok(ProcessedImage {
            original_url: original_url.to_string(),
            thumbnail_url: self.storage.public_url(&thumb_jpeg)?,
            thumbnail_webp_url: self.storage.public_url(&thumb_webp)?,
            large_url,
            large_webp_url: self.storage.public_url(&large_webp)?,
            width,
            height,
            file_size,
        })
    }
}

/// Derive the output base name from a source URL: the file stem, or the
/// item id when the URL carries no usable name.
pub fn base_name_for(original_url: &str, id: i64) -> String {
    Path::new(original_url)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("media-{id}"))
}

fn write_jpeg(img: &DynamicImage, path: &Path) -> Result<(), VariantError> {
    // JPEG has no alpha channel; flatten whatever the decoder produced.
    let rgb = img.to_rgb8();
    let file = fs::File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
    rgb.write_with_encoder(encoder)
        .map_err(|err| VariantError::Encode {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
}

fn write_webp(img: &DynamicImage, path: &Path, quality: f32) -> Result<(), VariantError> {
    let rgb = img.to_rgb8();
    let encoder = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height());
    let encoded = encoder
        .encode_simple(false, quality)
        .map_err(|err| VariantError::Encode {
            path: path.to_path_buf(),
            reason: format!("{err:?}"),
        })?;
    fs::write(path, &*encoded)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;

    fn generator(root: &Path) -> VariantGenerator {
        let settings = StorageSettings {
            root: root.to_path_buf(),
            thumbnail_dir: PathBuf::from("temp/thumbnails"),
            large_dir: PathBuf::from("temp/large"),
        };
        VariantGenerator::new(MediaStorage::new(&settings).expect("storage"))
    }

    fn write_png(root: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let dir = root.join("uploads/media/originals");
        fs::create_dir_all(&dir).expect("originals dir");
        let path = dir.join(name);
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 251) as u8, (y % 241) as u8, ((x + y) % 239) as u8])
        });
        img.save(&path).expect("write png");
        path
    }

    #[test]
    fn oversized_source_gets_resized_large_variants() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = generator(dir.path());
        let source = write_png(dir.path(), "battle.png", 1600, 900);

        let result = generator
            .process(&source, "battle", "/uploads/media/originals/battle.png")
            .expect("process");

        assert_eq!(result.width, 1600);
        assert_eq!(result.height, 900);
        assert_eq!(result.thumbnail_url, "/images/screenshots/thumbnails/battle_thumb.jpg");
        assert_eq!(
            result.thumbnail_webp_url,
            "/images/screenshots/thumbnails/battle_thumb.webp"
        );
        assert_eq!(result.large_url, "/images/screenshots/large/battle_large.jpg");
        assert_eq!(result.large_webp_url, "/images/screenshots/large/battle_large.webp");

        let large = image::open(dir.path().join("temp/large/battle_large.jpg")).expect("large");
        let (w, h) = large.dimensions();
        assert!(w <= LARGE_BOX.0 && h <= LARGE_BOX.1);
    }

    #[test]
    fn source_exactly_at_the_box_is_not_resized() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = generator(dir.path());
        let source = write_png(dir.path(), "edge.png", 1200, 800);

        let result = generator
            .process(&source, "edge", "/uploads/media/originals/edge.png")
            .expect("process");

        // Large JPEG aliases the original; only the WebP re-encode exists.
        assert_eq!(result.large_url, "/uploads/media/originals/edge.png");
        assert!(!dir.path().join("temp/large/edge_large.jpg").exists());
        assert!(dir.path().join("temp/large/edge_large.webp").exists());
    }

    #[test]
    fn one_pixel_over_the_box_triggers_a_resize() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = generator(dir.path());
        let source = write_png(dir.path(), "wide.png", 1201, 800);

        let result = generator
            .process(&source, "wide", "/uploads/media/originals/wide.png")
            .expect("process");

        assert_eq!(result.large_url, "/images/screenshots/large/wide_large.jpg");
        let large = image::open(dir.path().join("temp/large/wide_large.jpg")).expect("large");
        let (w, h) = large.dimensions();
        assert!(w <= 1200 && h <= 800);
    }

    #[test]
    fn thumbnails_fit_the_thumbnail_box() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = generator(dir.path());
        let source = write_png(dir.path(), "tall.png", 600, 1000);

        generator
            .process(&source, "tall", "/uploads/media/originals/tall.png")
            .expect("process");

        let thumb = image::open(dir.path().join("temp/thumbnails/tall_thumb.jpg")).expect("thumb");
        let (w, h) = thumb.dimensions();
        assert!(w <= THUMBNAIL_BOX.0 && h <= THUMBNAIL_BOX.1);
    }

    #[test]
    fn missing_source_fails_the_whole_operation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let generator = generator(dir.path());
        let err = generator
            .process(
                &dir.path().join("uploads/media/originals/gone.png"),
                "gone",
                "/uploads/media/originals/gone.png",
            )
            .expect_err("must fail");
        assert!(matches!(err, VariantError::Io(_)));
    }

    #[test]
    fn base_names_come_from_the_url_stem() {
        assert_eq!(base_name_for("/uploads/media/originals/keep.png", 7), "keep");
        assert_eq!(base_name_for("", 7), "media-7");
    }
}
