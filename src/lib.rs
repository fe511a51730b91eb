/*
    Conversion of MetaImage volumes to NIfTI-1
    Volumes are held as column-major f32 buffers with a fixed three-dimensional shape,
    together with the origin, spacing and direction cosines read from the source header
 */
pub mod error;
pub mod volume;

#[cfg(feature = "io-mha")]
pub mod mha_header;

#[cfg(feature = "io-mha")]
pub mod io_mha;

#[cfg(feature = "io-nifti")]
pub mod io_nifti;

#[cfg(all(feature = "io-mha", feature = "io-nifti"))]
pub mod convert;

pub use error::{Error, Result};
pub use volume::{SpatialMeta, Volume};

const N_DIMS:usize = 3;


/// Shape and strides of a three-dimensional column-major volume
#[derive(Clone,Copy,Debug,PartialEq,Eq)]
pub struct VolumeDim {
    shape: [usize; N_DIMS],
    strides: [usize; N_DIMS],
}

impl Default for VolumeDim {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeDim {

    pub fn new() -> VolumeDim {
        VolumeDim{
            shape: [1;N_DIMS],
            strides: [1;N_DIMS],
        }
    }

    /// build dims from the extents of a file. Missing axes are singleton, and any axis past
    /// the third must be singleton too.
    pub fn from_shape(shape: &[usize]) -> Result<VolumeDim> {

        if shape.iter().skip(N_DIMS).any(|&s| s != 1) {
            return Err(Error::TooManyDimensions(shape.to_vec()));
        }

        let mut dims = VolumeDim::new();
        for (ax,&s) in shape.iter().take(N_DIMS).enumerate() {
            dims = dims.with_dim(ax,s);
        }
        Ok(dims)

    }

    pub fn shape(&self) -> &[usize; N_DIMS] {
        &self.shape
    }

    pub fn size(&self, dim:usize) -> usize {
        assert!(dim < N_DIMS);
        self.shape[dim]
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn with_dim(mut self,axis:usize,dim:usize) -> VolumeDim {
        assert!(axis < N_DIMS,"only volumes of up to 3 axes are supported");
        self.shape[axis] = dim;
        self.update_strides();
        self
    }

    fn update_strides(&mut self) {
        let mut stride = 1;
        for (dim,s) in self.shape.iter().zip(self.strides.iter_mut()) {
            *s = stride;
            stride *= dim;
        }
    }

    #[inline]
    /// calculate the voxel address from the index (subscripts)
    pub fn calc_addr(&self,idx: &[usize]) -> usize {
        idx.iter().zip(self.strides.iter()).map(|(i,stride)| i * stride).sum()
    }

    #[inline]
    /// calculate the voxel index (subscript) from the address
    pub fn calc_idx(&self,addr:usize) -> [usize;N_DIMS] {
        debug_assert!(addr < self.numel(), "offset {} exceeds total number of voxels {}", addr, self.numel());
        let mut addr = addr;
        let mut idx = [0usize; N_DIMS];
        for (i,&d) in idx.iter_mut().zip(self.shape.iter()) {
            *i = addr % d;
            addr /= d;
        }
        idx
    }

    /// allocates a vector of values the size of dims
    pub fn alloc<T:Sized + Clone>(&self,value:T) -> Vec<T> {
        vec![value;self.numel()]
    }

}

impl From<[usize;N_DIMS]> for VolumeDim {
    fn from(shape:[usize;N_DIMS]) -> VolumeDim {
        let mut dims = VolumeDim::new();
        for (ax,&dim) in shape.iter().enumerate() {
            dims = dims.with_dim(ax,dim);
        }
        dims
    }
}
