use nalgebra::{Matrix3, Vector3};
use crate::{Error, Result, VolumeDim};




/// Origin, voxel spacing and direction cosines of a volume, in LPS patient coordinates.
///
/// Column `i` of `direction` is the unit direction of image axis `i`.
#[derive(Clone, Debug, PartialEq)]
pub struct SpatialMeta {
    pub origin: Vector3<f64>,
    pub spacing: Vector3<f64>,
    pub direction: Matrix3<f64>,
}

impl Default for SpatialMeta {
    fn default() -> Self {
        Self {
            origin: Vector3::zeros(),
            spacing: Vector3::repeat(1.0),
            direction: Matrix3::identity(),
        }
    }
}

impl SpatialMeta {
    /// voxel index to physical coordinate: `origin + direction * diag(spacing) * index`
    pub fn index_to_physical(&self, idx: [usize; 3]) -> Vector3<f64> {
        let idx = Vector3::new(idx[0] as f64, idx[1] as f64, idx[2] as f64);
        self.origin + self.direction * idx.component_mul(&self.spacing)
    }
}

/// A three-dimensional grid of f32 intensities, stored column-major (x fastest).
#[derive(Clone, Debug)]
pub struct Volume {
    data: Vec<f32>,
    dims: VolumeDim,
    meta: SpatialMeta,
}

impl Volume {
    pub fn new(data: Vec<f32>, dims: VolumeDim, meta: SpatialMeta) -> Result<Volume> {
        if data.len() != dims.numel() {
            return Err(Error::DimensionMismatch { shape: *dims.shape(), found: data.len() });
        }
        Ok(Volume { data, dims, meta })
    }

    pub fn dims(&self) -> VolumeDim {
        self.dims
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn meta(&self) -> &SpatialMeta {
        &self.meta
    }

    pub fn voxel(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        let [nx, ny, nz] = *self.dims.shape();
        if i >= nx || j >= ny || k >= nz {
            return None;
        }
        Some(self.data[self.dims.calc_addr(&[i, j, k])])
    }

    pub fn index_to_physical(&self, idx: [usize; 3]) -> Vector3<f64> {
        self.meta.index_to_physical(idx)
    }
}
