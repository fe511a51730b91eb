use std::io::Read;
use std::path::Path;
use bytemuck::Pod;
use flate2::read::{GzDecoder, ZlibDecoder};
use nalgebra::{Matrix3, Vector3};
use num_traits::AsPrimitive;
use rayon::prelude::*;
use crate::mha_header::{ElementDataFile, ElementType, MetaHeader};
use crate::{Error, Result, SpatialMeta, Volume, VolumeDim};


#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Matrix3, Vector3};
    use tempfile::tempdir;
    use crate::Error;
    use super::{read_mha_header, read_mha_to_volume};

    fn header(dims: &str, element_type: &str, extra: &str, data_file: &str) -> String {
        format!(
            "ObjectType = Image\nNDims = {}\nDimSize = {dims}\nElementType = {element_type}\n{extra}ElementDataFile = {data_file}\n",
            dims.split_whitespace().count()
        )
    }

    fn write_mha(path: &Path, header: &str, data: &[u8]) {
        let mut bytes = header.as_bytes().to_vec();
        bytes.extend_from_slice(data);
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn reads_attached_float_volume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vol.mha");
        let values: Vec<f32> = (0..24).map(|v| v as f32 * 0.5).collect();
        let extra = "ElementSpacing = 1 2 3\nOffset = 5 6 7\nTransformMatrix = 0 1 0 -1 0 0 0 0 1\n";
        write_mha(&path, &header("2 3 4", "MET_FLOAT", extra, "LOCAL"), bytemuck::cast_slice(&values));

        let vol = read_mha_to_volume(&path).unwrap();
        assert_eq!(vol.dims().shape(), &[2, 3, 4]);
        assert_eq!(vol.data(), values.as_slice());
        assert_eq!(vol.voxel(1, 2, 3), Some(11.5));
        assert_abs_diff_eq!(vol.meta().spacing, Vector3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(vol.meta().origin, Vector3::new(5.0, 6.0, 7.0));
        // first axis points along +y, second along -x
        let expected = Matrix3::new(
            0.0, -1.0, 0.0,
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        assert_abs_diff_eq!(vol.meta().direction, expected);
    }

    #[test]
    fn reads_big_endian_shorts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("be.mha");
        let values: [i16; 4] = [-2, 1, 300, -32768];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_be_bytes()).collect();
        write_mha(&path, &header("2 2", "MET_SHORT", "BinaryDataByteOrderMSB = True\n", "LOCAL"), &data);

        let vol = read_mha_to_volume(&path).unwrap();
        assert_eq!(vol.dims().shape(), &[2, 2, 1]);
        assert_eq!(vol.data(), &[-2.0f32, 1.0, 300.0, -32768.0]);
    }

    #[test]
    fn reads_compressed_data() {
        use std::io::Write;
        use flate2::Compression;
        use flate2::write::ZlibEncoder;

        let dir = tempdir().unwrap();
        let path = dir.path().join("z.mha");
        let values: Vec<u16> = (0..60).map(|v| v * 1000).collect();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(bytemuck::cast_slice(&values)).unwrap();
        let compressed = enc.finish().unwrap();
        let extra = format!("CompressedData = True\nCompressedDataSize = {}\n", compressed.len());
        write_mha(&path, &header("5 4 3", "MET_USHORT", &extra, "LOCAL"), &compressed);

        let vol = read_mha_to_volume(&path).unwrap();
        let expected: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        assert_eq!(vol.data(), expected.as_slice());
    }

    #[test]
    fn reads_gzip_data() {
        use std::io::Write;
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempdir().unwrap();
        let path = dir.path().join("gz.mha");
        let values: Vec<i16> = (-6..6).collect();
        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(bytemuck::cast_slice(&values)).unwrap();
        let compressed = enc.finish().unwrap();
        write_mha(&path, &header("3 4", "MET_SHORT", "CompressedData = True\n", "LOCAL"), &compressed);

        let vol = read_mha_to_volume(&path).unwrap();
        let expected: Vec<f32> = values.iter().map(|&v| v as f32).collect();
        assert_eq!(vol.data(), expected.as_slice());
    }

    #[test]
    fn compressed_size_limits_the_stream() {
        use std::io::Write;
        use flate2::Compression;
        use flate2::write::ZlibEncoder;

        let dir = tempdir().unwrap();
        let path = dir.path().join("padded.mha");
        let values: Vec<u8> = (0..8).collect();
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&values).unwrap();
        let mut stored = enc.finish().unwrap();
        let extra = format!("CompressedData = True\nCompressedDataSize = {}\n", stored.len());
        stored.extend_from_slice(b"\xff\xfe trailing junk");
        write_mha(&path, &header("2 2 2", "MET_UCHAR", &extra, "LOCAL"), &stored);

        let vol = read_mha_to_volume(&path).unwrap();
        assert_eq!(vol.data(), &[0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn reads_four_dimensional_header_with_unit_extent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("4d.mha");
        let values: Vec<u8> = (0..8).collect();
        let extra = "ElementSpacing = 1 2 3 4\nOffset = 5 6 7 8\n\
            TransformMatrix = 0 1 0 0 -1 0 0 0 0 0 1 0 0 0 0 1\n";
        write_mha(&path, &header("2 2 2 1", "MET_UCHAR", extra, "LOCAL"), &values);

        let vol = read_mha_to_volume(&path).unwrap();
        assert_eq!(vol.dims().shape(), &[2, 2, 2]);
        assert_eq!(vol.voxel(1, 1, 1), Some(7.0));
        assert_abs_diff_eq!(vol.meta().spacing, Vector3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(vol.meta().origin, Vector3::new(5.0, 6.0, 7.0));
        let expected = Matrix3::new(
            0.0, -1.0, 0.0,
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
        );
        assert_abs_diff_eq!(vol.meta().direction, expected);
    }

    #[test]
    fn rejects_four_dimensional_volume() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("4d.mha");
        write_mha(&path, &header("2 2 2 2", "MET_UCHAR", "", "LOCAL"), &[0u8; 16]);

        match read_mha_to_volume(&path) {
            Err(Error::TooManyDimensions(shape)) => assert_eq!(shape, vec![2, 2, 2, 2]),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn reads_detached_data_with_header_size() {
        let dir = tempdir().unwrap();
        let header_path = dir.path().join("vol.mhd");
        let mut raw = vec![0xAAu8; 16];
        raw.extend_from_slice(&[0, 255, 7, 9]);
        fs::write(dir.path().join("vol.raw"), &raw).unwrap();
        fs::write(&header_path, header("4", "MET_UCHAR", "HeaderSize = 16\n", "vol.raw")).unwrap();

        let vol = read_mha_to_volume(&header_path).unwrap();
        assert_eq!(vol.dims().shape(), &[4, 1, 1]);
        assert_eq!(vol.data(), &[0.0f32, 255.0, 7.0, 9.0]);
    }

    #[test]
    fn header_size_minus_one_reads_the_tail() {
        let dir = tempdir().unwrap();
        let header_path = dir.path().join("tail.mhd");
        let mut raw = b"some vendor preamble".to_vec();
        raw.extend_from_slice(bytemuck::cast_slice(&[1.5f64, -2.25]));
        fs::write(dir.path().join("tail.raw"), &raw).unwrap();
        fs::write(&header_path, header("2", "MET_DOUBLE", "HeaderSize = -1\n", "tail.raw")).unwrap();

        let vol = read_mha_to_volume(&header_path).unwrap();
        assert_eq!(vol.data(), &[1.5f32, -2.25]);
    }

    #[test]
    fn reads_list_of_slice_files() {
        let dir = tempdir().unwrap();
        let header_path = dir.path().join("list.mhd");
        for k in 0..3i32 {
            let slice: Vec<i32> = (0..4).map(|v| v + 10 * k).collect();
            fs::write(dir.path().join(format!("s{k}.raw")), bytemuck::cast_slice::<i32, u8>(&slice)).unwrap();
        }
        let text = format!("{}s0.raw\ns1.raw\ns2.raw\n", header("2 2 3", "MET_INT", "", "LIST"));
        fs::write(&header_path, text).unwrap();

        let vol = read_mha_to_volume(&header_path).unwrap();
        assert_eq!(vol.voxel(1, 1, 0), Some(3.0f32));
        assert_eq!(vol.voxel(0, 0, 2), Some(20.0));
        assert_eq!(vol.data().len(), 12);
    }

    #[test]
    fn list_with_header_size_minus_one() {
        let dir = tempdir().unwrap();
        let header_path = dir.path().join("list.mhd");
        fs::write(dir.path().join("a.raw"), b"PRE\x00\x01").unwrap();
        fs::write(dir.path().join("b.raw"), b"PRE\x0a\x0b").unwrap();
        let text = format!("{}a.raw\nb.raw\n", header("2 1 2", "MET_UCHAR", "HeaderSize = -1\n", "LIST"));
        fs::write(&header_path, text).unwrap();

        let vol = read_mha_to_volume(&header_path).unwrap();
        assert_eq!(vol.data(), &[0.0f32, 1.0, 10.0, 11.0]);
    }

    #[test]
    fn reads_ascii_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ascii.mha");
        write_mha(&path, &header("3", "MET_FLOAT", "BinaryData = False\n", "LOCAL"), b"1.5 -2\n  4e2\n");

        let vol = read_mha_to_volume(&path).unwrap();
        assert_eq!(vol.data(), &[1.5f32, -2.0, 400.0]);
    }

    #[test]
    fn rejects_short_ascii_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ascii.mha");
        write_mha(&path, &header("3", "MET_FLOAT", "BinaryData = False\n", "LOCAL"), b"1 2\n");

        let err = read_mha_to_volume(&path).unwrap_err();
        assert!(matches!(err, Error::TruncatedData { expected: 3, found: 2 }));
    }

    #[test]
    fn rejects_truncated_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.mha");
        write_mha(&path, &header("4 4", "MET_FLOAT", "", "LOCAL"), &[0u8; 60]);

        let err = read_mha_to_volume(&path).unwrap_err();
        assert!(matches!(err, Error::TruncatedData { expected: 64, found: 60 }));
    }

    #[test]
    fn rejects_multichannel() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rgb.mha");
        write_mha(&path, &header("2 2", "MET_UCHAR_ARRAY", "ElementNumberOfChannels = 3\n", "LOCAL"), &[0u8; 12]);

        assert!(matches!(read_mha_to_volume(&path), Err(Error::UnsupportedChannels(3))));
        // the header alone is still readable
        assert_eq!(read_mha_header(&path).unwrap().channels, 3);
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nope.mha");
        match read_mha_to_volume(&path) {
            Err(Error::Io { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
    }

}


/// read and parse the header of a MetaImage file without decoding the voxels
pub fn read_mha_header(file:impl AsRef<Path>) -> Result<MetaHeader>
{
    let bytes = std::fs::read(file.as_ref()).map_err(Error::io(file.as_ref()))?;
    MetaHeader::parse(&bytes)
}

/// read a scalar MetaImage volume, either attached (.mha) or detached (.mhd), as f32 voxels
pub fn read_mha_to_volume(file:impl AsRef<Path>) -> Result<Volume>
{
    let file = file.as_ref();
    let bytes = std::fs::read(file).map_err(Error::io(file))?;
    let header = MetaHeader::parse(&bytes)?;

    if header.channels != 1 {
        return Err(Error::UnsupportedChannels(header.channels));
    }
    let dims = VolumeDim::from_shape(&header.dim_size)?;

    let stored = match &header.data_file {
        ElementDataFile::Local => bytes[header.data_offset..].to_vec(),
        ElementDataFile::External(data_file) => {
            read_data_file(&MetaHeader::resolve_data_path(file, data_file), &header, header.data_len())?
        }
        ElementDataFile::List(files) => {
            // every slice file holds an equal share of the voxel data
            let share = header.data_len() / files.len();
            let mut stored = vec![];
            for data_file in files {
                let data_file = MetaHeader::resolve_data_path(file, data_file);
                stored.extend(read_data_file(&data_file, &header, share)?);
            }
            stored
        }
    };

    let stored = if header.compressed {
        inflate(&stored, header.compressed_size)?
    } else {
        stored
    };

    let data = if header.binary_data {
        decode_binary(&stored, &header)?
    } else {
        decode_ascii(&stored, header.numel())?
    };

    let meta = spatial_meta(&header);
    log::info!(
        "read {} with shape {:?}, {:?} voxels, spacing {:?}",
        file.display(), dims.shape(), header.element_type, meta.spacing.as_slice()
    );
    Volume::new(data, dims, meta)
}

/// read an external data file, skipping `HeaderSize` bytes. `data_len` is the number of voxel
/// bytes this file contributes.
fn read_data_file(path: &Path, header: &MetaHeader, data_len: usize) -> Result<Vec<u8>> {
    let bytes = std::fs::read(path).map_err(Error::io(path))?;
    let skip = match header.header_size {
        // data sits at the end of the file; the size is unknown for compressed data
        -1 if !header.compressed => bytes.len().saturating_sub(data_len),
        -1 => 0,
        n => n as usize,
    };
    if skip > bytes.len() {
        return Err(Error::TruncatedData { expected: skip, found: bytes.len() });
    }
    Ok(bytes[skip..].to_vec())
}

/// MetaIO writes zlib streams; gzip is accepted too
fn inflate(stored: &[u8], compressed_size: Option<usize>) -> Result<Vec<u8>> {
    let input = match compressed_size {
        Some(n) if n < stored.len() => &stored[..n],
        _ => stored,
    };
    let mut out = vec![];
    let res = if input.starts_with(&[0x1f, 0x8b]) {
        GzDecoder::new(input).read_to_end(&mut out)
    } else {
        ZlibDecoder::new(input).read_to_end(&mut out)
    };
    res.map_err(|e| Error::CorruptData(e.to_string()))?;
    Ok(out)
}

fn decode_binary(stored: &[u8], header: &MetaHeader) -> Result<Vec<f32>> {
    let expected = header.data_len();
    if stored.len() < expected {
        return Err(Error::TruncatedData { expected, found: stored.len() });
    }
    if stored.len() > expected {
        log::warn!("ignoring {} trailing bytes after the voxel data", stored.len() - expected);
    }
    let stored = &stored[..expected];
    let msb = header.byte_order_msb;
    let data = match header.element_type {
        ElementType::Char => convert_elements::<i8>(stored, msb),
        ElementType::UChar => convert_elements::<u8>(stored, msb),
        ElementType::Short => convert_elements::<i16>(stored, msb),
        ElementType::UShort => convert_elements::<u16>(stored, msb),
        ElementType::Int => convert_elements::<i32>(stored, msb),
        ElementType::UInt => convert_elements::<u32>(stored, msb),
        ElementType::LongLong => convert_elements::<i64>(stored, msb),
        ElementType::ULongLong => convert_elements::<u64>(stored, msb),
        ElementType::Float => convert_elements::<f32>(stored, msb),
        ElementType::Double => convert_elements::<f64>(stored, msb),
    };
    Ok(data)
}

/// reinterpret raw bytes as `T`, fix the byte order and widen/narrow to f32
fn convert_elements<T>(stored: &[u8], msb: bool) -> Vec<f32>
where T: Pod + AsPrimitive<f32> + Send + Sync
{
    let mut elements: Vec<T> = bytemuck::pod_collect_to_vec(stored);
    if msb != cfg!(target_endian = "big") {
        elements.par_iter_mut().for_each(|e| bytemuck::bytes_of_mut(e).reverse());
    }
    elements.par_iter().map(|&e| e.as_()).collect()
}

fn decode_ascii(stored: &[u8], numel: usize) -> Result<Vec<f32>> {
    let text = String::from_utf8_lossy(stored);
    let data = text
        .split_whitespace()
        .take(numel)
        .map(|v| v.parse::<f64>().map(|v| v as f32).map_err(|_| Error::InvalidAsciiData(v.to_string())))
        .collect::<Result<Vec<f32>>>()?;
    if data.len() < numel {
        return Err(Error::TruncatedData { expected: numel, found: data.len() });
    }
    Ok(data)
}

/// spacing, origin and direction cosines of the first three axes
fn spatial_meta(header: &MetaHeader) -> SpatialMeta {
    let n = header.ndims;
    let mut meta = SpatialMeta::default();
    for i in 0..n.min(3) {
        meta.spacing[i] = header.element_spacing[i];
        meta.origin[i] = header.offset[i];
    }
    let mut direction = Matrix3::identity();
    for axis in 0..n.min(3) {
        let row = &header.transform_matrix[axis * n..axis * n + n];
        let mut col = Vector3::zeros();
        for (c, &v) in col.iter_mut().zip(row.iter()) {
            *c = v;
        }
        direction.set_column(axis, &col);
    }
    meta.direction = direction;
    meta
}
