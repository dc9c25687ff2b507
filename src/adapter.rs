use std::io::Read;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{CollagerError, Result};
use crate::video::VideoReader;

const SUPPORTED_EXTENSIONS: [&str; 8] = ["jpg", "jpeg", "png", "webp", "bmp", "gif", "tiff", "avif"];

/// Largest download accepted for a single image.
const MAX_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;

/// What an input specifier points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Url(String),
    Directory(PathBuf),
    File(PathBuf),
}

/// Turns input specifiers (urls, files, directories, videos) into media.
pub struct Adapter;

impl Adapter {
    pub fn resolve(spec: &str) -> Source {
        let lower = spec.trim().to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Source::Url(spec.trim().to_string());
        }
        let path = PathBuf::from(spec);
        if path.is_dir() {
            Source::Directory(path)
        } else {
            Source::File(path)
        }
    }

    pub fn is_supported_image_format(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    }

    /// Flattens specifiers into one list of image locations, directories expanded in
    /// sorted order.
    pub fn expand(inputs: &[String]) -> Result<Vec<Source>> {
        let mut sources = Vec::with_capacity(inputs.len());
        for spec in inputs {
            match Self::resolve(spec) {
                Source::Directory(dir) => {
                    let mut files: Vec<PathBuf> = WalkDir::new(&dir)
                        .into_iter()
                        .filter_map(|e| e.ok())
                        .filter(|e| e.file_type().is_file())
                        .map(|e| e.into_path())
                        .filter(|p| Self::is_supported_image_format(p))
                        .collect();
                    files.sort();
                    debug!(dir = %dir.display(), count = files.len(), "expanded directory");
                    sources.extend(files.into_iter().map(Source::File));
                }
                source => sources.push(source),
            }
        }
        Ok(sources)
    }

    /// Loads every image named by `inputs`, in order.
    pub fn load(inputs: &[String]) -> Result<Vec<DynamicImage>> {
        let sources = Self::expand(inputs)?;

        let progress_bar = ProgressBar::new(sources.len() as u64);
        progress_bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} loading",
            )
            .map_err(|e| CollagerError::Configuration {
                message: e.to_string(),
            })?
            .progress_chars("#>-"),
        );

        let images = sources
            .par_iter()
            .progress_with(progress_bar.clone())
            .map(Self::load_source)
            .collect::<Result<Vec<_>>>()?;
        progress_bar.finish_and_clear();

        Ok(images)
    }

    pub fn load_one(spec: &str) -> Result<DynamicImage> {
        match Self::resolve(spec) {
            Source::Directory(dir) => Err(CollagerError::validation(
                "input",
                format!("{} is a directory, expected a single image", dir.display()),
            )),
            source => Self::load_source(&source),
        }
    }

    pub fn load_video(spec: &str) -> Result<VideoReader> {
        match Self::resolve(spec) {
            Source::File(path) => {
                if !path.exists() {
                    return Err(not_found(&path, "opening video"));
                }
                VideoReader::open(&path)
            }
            Source::Url(url) => Err(CollagerError::validation(
                "input",
                format!("{url} is a url; videos must be local files"),
            )),
            Source::Directory(dir) => Err(CollagerError::validation(
                "input",
                format!("{} is a directory, expected a video file", dir.display()),
            )),
        }
    }

    fn load_source(source: &Source) -> Result<DynamicImage> {
        match source {
            Source::Url(url) => Self::fetch(url),
            Source::File(path) => {
                if !path.exists() {
                    return Err(not_found(path, "opening image"));
                }
                image::open(path).map_err(|e| CollagerError::ImageProcessing {
                    path: path.display().to_string(),
                    operation: "image decoding".to_string(),
                    source: Box::new(e),
                })
            }
            Source::Directory(dir) => Err(CollagerError::validation(
                "input",
                format!("{} is a directory", dir.display()),
            )),
        }
    }

    fn fetch(url: &str) -> Result<DynamicImage> {
        let fetch_error = |source| CollagerError::Fetch {
            url: url.to_string(),
            source,
        };
        let response = reqwest::blocking::get(url)
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;

        let mut bytes = Vec::new();
        response
            .take(MAX_DOWNLOAD_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|e| CollagerError::ImageProcessing {
                path: url.to_string(),
                operation: "download".to_string(),
                source: Box::new(e),
            })?;
        debug!(url, bytes = bytes.len(), "downloaded image");

        image::load_from_memory(&bytes).map_err(|e| CollagerError::ImageProcessing {
            path: url.to_string(),
            operation: "image decoding".to_string(),
            source: Box::new(e),
        })
    }
}

fn not_found(path: &Path, operation: &str) -> CollagerError {
    CollagerError::FileSystem {
        path: path.to_path_buf(),
        operation: operation.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_supported_formats() {
        let test_cases = vec![
            ("test.jpg", true),
            ("test.JPEG", true),
            ("test.png", true),
            ("test.webp", true),
            ("test.txt", false),
            ("test", false),
        ];

        for (filename, expected) in test_cases {
            assert_eq!(
                Adapter::is_supported_image_format(Path::new(filename)),
                expected,
                "{filename}"
            );
        }
    }

    #[test]
    fn test_resolve() -> Result<()> {
        let temp_dir = TempDir::new()?;
        assert_eq!(
            Adapter::resolve("https://example.com/a.png"),
            Source::Url("https://example.com/a.png".to_string())
        );
        assert_eq!(
            Adapter::resolve("HTTP://example.com/a.png"),
            Source::Url("HTTP://example.com/a.png".to_string())
        );
        assert_eq!(
            Adapter::resolve(temp_dir.path().to_str().unwrap()),
            Source::Directory(temp_dir.path().to_path_buf())
        );
        assert_eq!(
            Adapter::resolve("missing.png"),
            Source::File(PathBuf::from("missing.png"))
        );
        Ok(())
    }

    #[test]
    fn test_expand_walks_directories_in_order() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let nested = temp_dir.path().join("nested");
        fs::create_dir_all(&nested)?;
        let img = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        img.save(temp_dir.path().join("b.png"))?;
        img.save(temp_dir.path().join("a.png"))?;
        img.save(nested.join("c.png"))?;
        fs::write(temp_dir.path().join("notes.txt"), b"skip me")?;

        let sources = Adapter::expand(&[
            "first.jpg".to_string(),
            temp_dir.path().display().to_string(),
        ])?;
        assert_eq!(
            sources,
            vec![
                Source::File(PathBuf::from("first.jpg")),
                Source::File(temp_dir.path().join("a.png")),
                Source::File(temp_dir.path().join("b.png")),
                Source::File(nested.join("c.png")),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_load_keeps_input_order() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let small = temp_dir.path().join("small.png");
        let large = temp_dir.path().join("large.png");
        RgbImage::new(2, 2).save(&small)?;
        RgbImage::new(8, 8).save(&large)?;

        let images = Adapter::load(&[
            large.display().to_string(),
            small.display().to_string(),
        ])?;
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].width(), 8);
        assert_eq!(images[1].width(), 2);
        Ok(())
    }

    #[test]
    fn test_load_missing_file() {
        let err = Adapter::load(&["definitely/missing.png".to_string()]).unwrap_err();
        assert!(matches!(err, CollagerError::FileSystem { .. }));
    }

    #[test]
    fn test_load_video_rejects_urls() {
        let err = Adapter::load_video("https://example.com/clip.mp4").unwrap_err();
        assert!(matches!(err, CollagerError::Validation { .. }));
    }
}
