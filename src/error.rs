use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid MetaImage header: {0}")]
    InvalidHeader(String),

    #[error("unsupported MetaImage element type `{0}`")]
    UnsupportedElementType(String),

    #[error("images with {0} channels per voxel are not supported")]
    UnsupportedChannels(usize),

    #[error("unsupported ElementDataFile `{0}`")]
    UnsupportedDataFile(String),

    #[error("voxel data is truncated: expected {expected} bytes, found {found}")]
    TruncatedData { expected: usize, found: usize },

    #[error("could not decompress voxel data: {0}")]
    CorruptData(String),

    #[error("invalid ASCII voxel value `{0}`")]
    InvalidAsciiData(String),

    #[error("shape {0:?} has more than three non-singleton dimensions")]
    TooManyDimensions(Vec<usize>),

    #[error("buffer of {found} voxels does not match dimensions {shape:?}")]
    DimensionMismatch { shape: [usize; 3], found: usize },

    #[error("extent {0} exceeds the NIfTI-1 limit of 32767")]
    DimensionTooLarge(usize),

    #[error("no reader for {}", .0.display())]
    UnsupportedInput(PathBuf),

    #[error("no writer for {}", .0.display())]
    UnsupportedOutput(PathBuf),

    #[cfg(feature = "io-nifti")]
    #[error(transparent)]
    Nifti(#[from] nifti::NiftiError),

    #[cfg(feature = "io-nifti")]
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Error {
        let path = path.into();
        move |source| Error::Io { path, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
