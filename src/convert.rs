use std::path::Path;
use crate::{io_mha, io_nifti, Error, Result, Volume};




#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    MetaImage,
    Nifti,
}

impl ImageFormat {
    /// `.mha`/`.mhd` and `.nii`/`.nii.gz`, case-insensitive
    pub fn from_path(path: &Path) -> Option<ImageFormat> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".mha") || name.ends_with(".mhd") {
            Some(ImageFormat::MetaImage)
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(ImageFormat::Nifti)
        } else {
            None
        }
    }
}

/// load a whole volume as f32 voxels
pub fn load_volume(file:impl AsRef<Path>) -> Result<Volume>
{
    let file = file.as_ref();
    match ImageFormat::from_path(file) {
        Some(ImageFormat::MetaImage) => io_mha::read_mha_to_volume(file),
        Some(ImageFormat::Nifti) => io_nifti::read_nifti_to_volume(file),
        None => Err(Error::UnsupportedInput(file.to_path_buf())),
    }
}

/// Save a volume in the format named by the extension. NIfTI is the only output format.
/// The volume is written to a temporary file beside the target and renamed into place, so a
/// failed write leaves any existing file untouched.
pub fn save_volume(file:impl AsRef<Path>, volume:&Volume) -> Result<()>
{
    let file = file.as_ref();
    let name = match (ImageFormat::from_path(file), file.file_name()) {
        (Some(ImageFormat::Nifti), Some(name)) => name.to_string_lossy().into_owned(),
        _ => return Err(Error::UnsupportedOutput(file.to_path_buf())),
    };
    let dir = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    // keep the full file name as suffix so `.nii.gz` still selects compression
    let suffix = format!("-{name}");
    let mut builder = tempfile::Builder::new();
    builder.prefix(".").suffix(&suffix);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(std::fs::Permissions::from_mode(0o644));
    }
    let tmp = builder.tempfile_in(dir).map_err(Error::io(file))?;
    io_nifti::write_nifti_from_volume(tmp.path(), volume)?;
    tmp.persist(file).map_err(|e| Error::Io { path: file.to_path_buf(), source: e.error })?;
    Ok(())
}
