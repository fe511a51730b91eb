use std::path::Path;
use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};
use nifti;
use nifti::{NiftiHeader, NiftiObject, NiftiVolume};
use ndarray;
use ndarray::ShapeBuilder;
use crate::{Error, Result, SpatialMeta, Volume, VolumeDim};

/// NIFTI_XFORM_SCANNER_ANAT
const XFORM_SCANNER_ANAT: i16 = 1;
/// NIFTI_UNITS_MM
const UNITS_MM: u8 = 2;
/// NIFTI_TYPE_FLOAT32
const DT_FLOAT32: i16 = 16;
const MAGIC_NIFTI_SINGLE: [u8; 4] = *b"n+1\0";
/// dim[] is a signed short in NIfTI-1
const MAX_EXTENT: usize = i16::MAX as usize;

/// LPS <-> RAS, flips the first two world axes
fn lps_ras() -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0))
}




/// Build a single-file NIfTI-1 header for the volume, placing it in RAS world space with
/// both the sform and the qform.
pub fn nifti_header_for(volume:&Volume) -> Result<NiftiHeader>
{
    let shape = *volume.dims().shape();
    if let Some(&too_big) = shape.iter().find(|&&s| s > MAX_EXTENT) {
        return Err(Error::DimensionTooLarge(too_big));
    }

    let meta = volume.meta();
    let direction = lps_ras() * meta.direction;
    let origin = lps_ras() * meta.origin;
    let affine = direction * Matrix3::from_diagonal(&meta.spacing);

    let mut rotation = direction;
    let qfac = if direction.determinant() < 0.0 {
        let flipped = -direction.column(2).into_owned();
        rotation.set_column(2, &flipped);
        -1.0
    } else {
        1.0
    };
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation));
    // NIfTI stores b, c, d and implies a non-negative a
    let [b, c, d, a] = [q.i, q.j, q.k, q.w];
    let [b, c, d] = if a < 0.0 { [-b, -c, -d] } else { [b, c, d] };

    let srow = |r: usize| [affine[(r, 0)] as f32, affine[(r, 1)] as f32, affine[(r, 2)] as f32, origin[r] as f32];

    Ok(NiftiHeader {
        dim: [3, shape[0] as u16, shape[1] as u16, shape[2] as u16, 1, 1, 1, 1],
        datatype: DT_FLOAT32,
        bitpix: 32,
        pixdim: [qfac as f32, meta.spacing[0] as f32, meta.spacing[1] as f32, meta.spacing[2] as f32, 0., 0., 0., 0.],
        xyzt_units: UNITS_MM,
        scl_slope: 1.0,
        scl_inter: 0.0,
        qform_code: XFORM_SCANNER_ANAT,
        sform_code: XFORM_SCANNER_ANAT,
        quatern_b: b as f32,
        quatern_c: c as f32,
        quatern_d: d as f32,
        quatern_x: origin[0] as f32,
        quatern_y: origin[1] as f32,
        quatern_z: origin[2] as f32,
        srow_x: srow(0),
        srow_y: srow(1),
        srow_z: srow(2),
        magic: MAGIC_NIFTI_SINGLE,
        ..NiftiHeader::default()
    })
}

/// write the volume as float32 voxels. A `.nii.gz` path is gzip-compressed.
pub fn write_nifti_from_volume(file: impl AsRef<Path>, volume:&Volume) -> Result<()>
{
    let header = nifti_header_for(volume)?;
    let dims = volume.dims();
    let arr = ndarray::Array::from_shape_vec([dims.size(0),dims.size(1),dims.size(2)].f(), volume.data().to_vec())?;
    let writer = nifti::writer::WriterOptions::new(file.as_ref()).reference_header(&header);
    writer.write_nifti(&arr)?;
    log::info!("wrote {} with shape {:?}", file.as_ref().display(), dims.shape());
    Ok(())
}

/// read any NIfTI-1 volume as f32 voxels, recovering its placement in LPS space
pub fn read_nifti_to_volume(file:impl AsRef<Path>) -> Result<Volume>
{
    let nii = nifti::ReaderOptions::new().read_file(file.as_ref())?;
    let header = nii.header().clone();
    let volume = nii.into_volume();
    let shape:Vec<_> = volume.dim().iter().map(|&dim| dim as usize).collect();
    let dims = VolumeDim::from_shape(&shape)?;
    let data:Vec<f32> = volume.into_nifti_typed_data()?;
    Volume::new(data, dims, spatial_meta(&header))
}

/// placement from the sform when present, otherwise the qform, otherwise spacing alone
fn spatial_meta(header:&NiftiHeader) -> SpatialMeta
{
    let pixdim = |i: usize| if header.pixdim[i] > 0.0 { header.pixdim[i] as f64 } else { 1.0 };
    let mut meta = SpatialMeta {
        spacing: Vector3::new(pixdim(1), pixdim(2), pixdim(3)),
        ..SpatialMeta::default()
    };

    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let affine = Matrix3::from_fn(|r, c| rows[r][c] as f64);
        let origin = Vector3::from_fn(|r, _| rows[r][3] as f64);
        let spacing = Vector3::from_fn(|c, _| affine.column(c).norm());
        if spacing.iter().all(|&s| s > 0.0) {
            meta.spacing = spacing;
            meta.direction = lps_ras() * affine * Matrix3::from_diagonal(&spacing.map(|s| 1.0 / s));
            meta.origin = lps_ras() * origin;
        }
    } else if header.qform_code > 0 {
        let (b, c, d) = (header.quatern_b as f64, header.quatern_c as f64, header.quatern_d as f64);
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let mut rotation = UnitQuaternion::from_quaternion(Quaternion::new(a, b, c, d))
            .to_rotation_matrix()
            .into_inner();
        if header.pixdim[0] < 0.0 {
            let flipped = -rotation.column(2).into_owned();
            rotation.set_column(2, &flipped);
        }
        meta.direction = lps_ras() * rotation;
        meta.origin = lps_ras() * Vector3::new(header.quatern_x as f64, header.quatern_y as f64, header.quatern_z as f64);
    }
    meta
}
