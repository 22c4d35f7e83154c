use std::fs;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use tracing::debug;

use crate::{check_dimensions, FrameError, FrameSource};

/// File extensions picked up by [`FileSequence::open`], compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Directory of still images replayed in file-name order, looping forever.
///
/// Decoded frames are cached, so the second pass over the sequence (the
/// sum-of-squares pass re-requests every frame) costs no decoding.
#[derive(Debug)]
pub struct FileSequence {
    root: PathBuf,
    paths: Vec<PathBuf>,
    cache: Vec<Option<RgbaImage>>,
    cursor: usize,
    size: (u32, u32),
}

impl FileSequence {
    /// Lists the images in `dir`, keeping at most `limit` of them.
    pub fn open(dir: impl AsRef<Path>, limit: Option<usize>) -> Result<Self, FrameError> {
        let root = dir.as_ref().to_path_buf();
        let mut paths: Vec<PathBuf> = fs::read_dir(&root)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && has_supported_extension(path))
            .collect();
        paths.sort();
        if let Some(limit) = limit {
            paths.truncate(limit);
        }
        if paths.is_empty() {
            return Err(FrameError::Empty(root));
        }

        let first = decode(&paths[0])?;
        let size = first.dimensions();
        let mut cache = vec![None; paths.len()];
        cache[0] = Some(first);
        debug!(
            root = %root.display(),
            frames = paths.len(),
            width = size.0,
            height = size.1,
            "opened frame sequence"
        );

        Ok(Self {
            root,
            paths,
            cache,
            cursor: 0,
            size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    fn frame(&mut self, index: usize) -> Result<RgbaImage, FrameError> {
        if let Some(frame) = &self.cache[index] {
            return Ok(frame.clone());
        }
        let frame = decode(&self.paths[index])?;
        check_dimensions(index, &frame, self.size)?;
        self.cache[index] = Some(frame.clone());
        Ok(frame)
    }
}

impl FrameSource for FileSequence {
    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn try_next(&mut self) -> Result<Option<RgbaImage>, FrameError> {
        let index = self.cursor;
        let frame = self.frame(index)?;
        self.cursor = (index + 1) % self.paths.len();
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<(), FrameError> {
        self.cursor = 0;
        Ok(())
    }

    fn len(&self) -> Option<usize> {
        Some(self.paths.len())
    }

    fn describe(&self) -> String {
        format!("{} ({} frames)", self.root.display(), self.paths.len())
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
        .unwrap_or(false)
}

fn decode(path: &Path) -> Result<RgbaImage, FrameError> {
    let image = image::open(path).map_err(|source| FrameError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image.to_rgba8())
}
