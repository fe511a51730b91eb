use std::path::{Path, PathBuf};
use crate::{Error, Result};




/// Voxel storage type declared by `ElementType`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ElementType {
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    LongLong,
    ULongLong,
    Float,
    Double,
}

impl ElementType {
    pub fn parse(s: &str) -> Result<ElementType> {
        use ElementType::*;
        let name = s.trim();
        let base = name.strip_suffix("_ARRAY").unwrap_or(name);
        let t = match base {
            "MET_CHAR" | "MET_ASCII_CHAR" => Char,
            "MET_UCHAR" => UChar,
            "MET_SHORT" => Short,
            "MET_USHORT" => UShort,
            // MetaIO stores LONG as 4 bytes
            "MET_INT" | "MET_LONG" => Int,
            "MET_UINT" | "MET_ULONG" => UInt,
            "MET_LONG_LONG" => LongLong,
            "MET_ULONG_LONG" => ULongLong,
            "MET_FLOAT" => Float,
            "MET_DOUBLE" => Double,
            _ => return Err(Error::UnsupportedElementType(name.to_string())),
        };
        Ok(t)
    }

    /// bytes per element
    pub fn size(&self) -> usize {
        use ElementType::*;
        match self {
            Char | UChar => 1,
            Short | UShort => 2,
            Int | UInt | Float => 4,
            LongLong | ULongLong | Double => 8,
        }
    }
}

/// Where the voxel bytes live.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementDataFile {
    /// appended to the header file
    Local,
    /// a single raw file, relative to the header's directory
    External(PathBuf),
    /// one raw file per slice, listed after the `ElementDataFile = LIST` line
    List(Vec<PathBuf>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct MetaHeader {
    pub ndims: usize,
    pub dim_size: Vec<usize>,
    pub element_type: ElementType,
    pub channels: usize,
    pub element_spacing: Vec<f64>,
    pub offset: Vec<f64>,
    /// row `i` holds the direction of image axis `i`
    pub transform_matrix: Vec<f64>,
    pub binary_data: bool,
    pub byte_order_msb: bool,
    pub compressed: bool,
    pub compressed_size: Option<usize>,
    /// bytes to skip in external data files, `-1` for "data at the end of the file"
    pub header_size: i64,
    pub anatomical_orientation: Option<String>,
    pub data_file: ElementDataFile,
    /// byte offset of attached data within the header file
    pub data_offset: usize,
}

impl MetaHeader {
    pub fn numel(&self) -> usize {
        self.dim_size.iter().product()
    }

    /// expected size in bytes of the decoded voxel stream
    pub fn data_len(&self) -> usize {
        self.numel() * self.channels * self.element_type.size()
    }

    /// Parse a header from the raw bytes of a `.mha` or `.mhd` file. Only the text up to and
    /// including the `ElementDataFile` line (and the file list for `LIST`) is inspected.
    pub fn parse(bytes: &[u8]) -> Result<MetaHeader> {

        let mut fields = Fields::default();
        let mut lines = Lines { bytes, pos: 0 };

        let mut data_file = None;
        while let Some(line) = lines.next() {
            let line = String::from_utf8_lossy(line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                Error::InvalidHeader(format!("expected `Key = Value`, found `{line}`"))
            })?;
            let (key, value) = (key.trim(), value.trim());
            if key == "ElementDataFile" {
                data_file = Some(value.to_string());
                break;
            }
            fields.set(key, value)?;
        }

        let data_file = data_file.ok_or_else(|| missing("ElementDataFile"))?;
        let data_offset = lines.pos;

        let data_file = match data_file.as_str() {
            "LOCAL" | "Local" | "local" => ElementDataFile::Local,
            list if list.split_whitespace().next() == Some("LIST") => {
                let files: Vec<PathBuf> = lines
                    .map(|l| String::from_utf8_lossy(l).trim().to_string())
                    .filter(|l| !l.is_empty())
                    .map(PathBuf::from)
                    .collect();
                if files.is_empty() {
                    return Err(Error::InvalidHeader("ElementDataFile LIST names no files".to_string()));
                }
                ElementDataFile::List(files)
            }
            pattern if pattern.contains('%') => {
                return Err(Error::UnsupportedDataFile(pattern.to_string()));
            }
            file => ElementDataFile::External(PathBuf::from(file)),
        };

        fields.finish(data_file, data_offset)
    }

    /// resolve an external data file against the directory of the header
    pub fn resolve_data_path(header_path: &Path, file: &Path) -> PathBuf {
        if file.is_absolute() {
            return file.to_path_buf();
        }
        header_path.parent().map(|dir| dir.join(file)).unwrap_or_else(|| file.to_path_buf())
    }
}

/// newline-delimited iteration that tracks the byte position after each line
struct Lines<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let rest = &self.bytes[self.pos..];
        let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
            Some(n) => (&rest[..n], n + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(line)
    }
}

#[derive(Default)]
struct Fields {
    ndims: Option<usize>,
    dim_size: Option<Vec<usize>>,
    element_type: Option<ElementType>,
    channels: Option<usize>,
    element_spacing: Option<Vec<f64>>,
    element_size: Option<Vec<f64>>,
    offset: Option<Vec<f64>>,
    transform_matrix: Option<Vec<f64>>,
    binary_data: Option<bool>,
    byte_order_msb: Option<bool>,
    compressed: Option<bool>,
    compressed_size: Option<usize>,
    header_size: Option<i64>,
    anatomical_orientation: Option<String>,
}

impl Fields {
    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "ObjectType" => {
                if value != "Image" {
                    return Err(Error::InvalidHeader(format!("ObjectType `{value}` is not an Image")));
                }
            }
            "NDims" => self.ndims = Some(parse_one(key, value)?),
            "DimSize" => self.dim_size = Some(parse_list(key, value)?),
            "ElementType" => self.element_type = Some(ElementType::parse(value)?),
            "ElementNumberOfChannels" => self.channels = Some(parse_one(key, value)?),
            "ElementSpacing" => self.element_spacing = Some(parse_list(key, value)?),
            "ElementSize" => self.element_size = Some(parse_list(key, value)?),
            "Offset" | "Position" | "Origin" => self.offset = Some(parse_list(key, value)?),
            "TransformMatrix" | "Rotation" | "Orientation" => {
                self.transform_matrix = Some(parse_list(key, value)?)
            }
            "BinaryData" => self.binary_data = Some(parse_bool(value)),
            "BinaryDataByteOrderMSB" | "ElementByteOrderMSB" => {
                self.byte_order_msb = Some(parse_bool(value))
            }
            "CompressedData" => self.compressed = Some(parse_bool(value)),
            "CompressedDataSize" => self.compressed_size = Some(parse_one(key, value)?),
            "HeaderSize" => self.header_size = Some(parse_one(key, value)?),
            "AnatomicalOrientation" => self.anatomical_orientation = Some(value.to_string()),
            _ => log::debug!("ignoring MetaImage header field {key} = {value}"),
        }
        Ok(())
    }

    fn finish(self, data_file: ElementDataFile, data_offset: usize) -> Result<MetaHeader> {

        let ndims = self.ndims.ok_or_else(|| missing("NDims"))?;
        if ndims == 0 {
            return Err(Error::InvalidHeader("NDims must be at least 1".to_string()));
        }

        let dim_size = self.dim_size.ok_or_else(|| missing("DimSize"))?;
        if dim_size.len() != ndims {
            return Err(Error::InvalidHeader(format!(
                "DimSize has {} values but NDims is {ndims}", dim_size.len()
            )));
        }
        if dim_size.contains(&0) {
            return Err(Error::InvalidHeader(format!("DimSize {dim_size:?} has an empty axis")));
        }

        let element_type = self.element_type.ok_or_else(|| missing("ElementType"))?;
        let channels = self.channels.unwrap_or(1);

        // numel() and data_len() multiply without checks, so the sizes must fit here
        dim_size.iter()
            .try_fold(element_type.size(), |acc, &d| acc.checked_mul(d))
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| Error::InvalidHeader(format!("DimSize {dim_size:?} is too large to address")))?;

        let element_spacing = self.element_spacing.or(self.element_size).unwrap_or_else(|| vec![1.0; ndims]);
        check_len("ElementSpacing", &element_spacing, ndims)?;

        let offset = self.offset.unwrap_or_else(|| vec![0.0; ndims]);
        check_len("Offset", &offset, ndims)?;

        let transform_matrix = match self.transform_matrix {
            Some(m) => m,
            None => {
                let mut m = vec![0.0; ndims * ndims];
                (0..ndims).for_each(|i| m[i * ndims + i] = 1.0);
                m
            }
        };
        check_len("TransformMatrix", &transform_matrix, ndims * ndims)?;

        let header_size = self.header_size.unwrap_or(0);
        if header_size < -1 {
            return Err(Error::InvalidHeader(format!("HeaderSize {header_size} is negative")));
        }

        let header = MetaHeader {
            ndims,
            dim_size,
            element_type,
            channels,
            element_spacing,
            offset,
            transform_matrix,
            binary_data: self.binary_data.unwrap_or(true),
            byte_order_msb: self.byte_order_msb.unwrap_or(false),
            compressed: self.compressed.unwrap_or(false),
            compressed_size: self.compressed_size,
            header_size,
            anatomical_orientation: self.anatomical_orientation,
            data_file,
            data_offset,
        };
        log::debug!("parsed MetaImage header {header:?}");
        Ok(header)
    }
}

fn missing(key: &str) -> Error {
    Error::InvalidHeader(format!("missing required field {key}"))
}

fn check_len(key: &str, values: &[f64], expected: usize) -> Result<()> {
    if values.len() < expected {
        return Err(Error::InvalidHeader(format!(
            "{key} has {} values, expected {expected}", values.len()
        )));
    }
    Ok(())
}

/// MetaIO treats any value starting with `T`, `t` or `1` as true
fn parse_bool(value: &str) -> bool {
    matches!(value.chars().next(), Some('T' | 't' | '1'))
}

fn parse_one<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidHeader(format!("bad value `{value}` for {key}")))
}

fn parse_list<T: std::str::FromStr>(key: &str, value: &str) -> Result<Vec<T>> {
    value.split_whitespace().map(|v| parse_one(key, v)).collect()
}
