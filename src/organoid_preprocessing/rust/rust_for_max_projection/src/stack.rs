use anyhow::{anyhow, Context, Result};
use memmap2::MmapOptions;
use ndarray::{Array2, Array3, Axis, Zip};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};

/// A z-stack in its on-disk sample type, shaped (Z, H, W).
#[derive(Debug, Clone, PartialEq)]
pub enum Stack {
    U8(Array3<u8>),
    U16(Array3<u16>),
    U32(Array3<u32>),
    U64(Array3<u64>),
    I8(Array3<i8>),
    I16(Array3<i16>),
    I32(Array3<i32>),
    I64(Array3<i64>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

/// A projected plane, shaped (H, W), same sample type as its stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    U8(Array2<u8>),
    U16(Array2<u16>),
    U32(Array2<u32>),
    U64(Array2<u64>),
    I8(Array2<i8>),
    I16(Array2<i16>),
    I32(Array2<i32>),
    I64(Array2<i64>),
    F32(Array2<f32>),
    F64(Array2<f64>),
}

macro_rules! for_each_sample_type {
    ($value:expr, $from:ident => $to:ident, |$arr:ident| $body:expr) => {
        match $value {
            $from::U8($arr) => $to::U8($body),
            $from::U16($arr) => $to::U16($body),
            $from::U32($arr) => $to::U32($body),
            $from::U64($arr) => $to::U64($body),
            $from::I8($arr) => $to::I8($body),
            $from::I16($arr) => $to::I16($body),
            $from::I32($arr) => $to::I32($body),
            $from::I64($arr) => $to::I64($body),
            $from::F32($arr) => $to::F32($body),
            $from::F64($arr) => $to::F64($body),
        }
    };
}

impl Stack {
    /// (Z, H, W)
    pub fn shape(&self) -> (usize, usize, usize) {
        match self {
            Stack::U8(a) => a.dim(),
            Stack::U16(a) => a.dim(),
            Stack::U32(a) => a.dim(),
            Stack::U64(a) => a.dim(),
            Stack::I8(a) => a.dim(),
            Stack::I16(a) => a.dim(),
            Stack::I32(a) => a.dim(),
            Stack::I64(a) => a.dim(),
            Stack::F32(a) => a.dim(),
            Stack::F64(a) => a.dim(),
        }
    }

    pub fn max_project(&self) -> Result<Projection> {
        Ok(for_each_sample_type!(self, Stack => Projection, |a| max_project(a)?))
    }
}

impl Projection {
    /// (H, W)
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Projection::U8(a) => a.dim(),
            Projection::U16(a) => a.dim(),
            Projection::U32(a) => a.dim(),
            Projection::U64(a) => a.dim(),
            Projection::I8(a) => a.dim(),
            Projection::I16(a) => a.dim(),
            Projection::I32(a) => a.dim(),
            Projection::I64(a) => a.dim(),
            Projection::F32(a) => a.dim(),
            Projection::F64(a) => a.dim(),
        }
    }
}

/// Element-wise maximum over axis 0. NaN wins over every other value, so a
/// NaN anywhere in a z-column makes the projected pixel NaN.
pub fn max_project<T>(stack: &Array3<T>) -> Result<Array2<T>>
where
    T: Copy + PartialOrd,
{
    if stack.len_of(Axis(0)) == 0 {
        return Err(anyhow!("Cannot project an empty stack"));
    }

    let mut projection = stack.index_axis(Axis(0), 0).to_owned();
    for slice in stack.axis_iter(Axis(0)).skip(1) {
        Zip::from(&mut projection).and(&slice).for_each(|acc, &value| {
            let is_nan = value.partial_cmp(&value).is_none();
            if value > *acc || is_nan {
                *acc = value;
            }
        });
    }
    Ok(projection)
}

/// Read every page of a TIFF file as one z-slice.
pub fn read_stack(path: &Path) -> Result<Stack> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let mmap = unsafe { MmapOptions::new().map(&file) }
        .with_context(|| format!("Failed to mmap {:?}", path))?;

    let cursor = std::io::Cursor::new(&mmap[..]);
    let mut decoder = Decoder::new(cursor)
        .with_context(|| format!("Failed to create decoder for {:?}", path))?
        .with_limits(Limits::unlimited());

    let (width, height) = decoder
        .dimensions()
        .with_context(|| format!("Failed to get dimensions from {:?}", path))?;
    let plane = width as usize * height as usize;

    let mut pages = Vec::new();
    loop {
        let dims = decoder
            .dimensions()
            .with_context(|| format!("Failed to get dimensions from {:?}", path))?;
        if dims != (width, height) {
            return Err(anyhow!(
                "Page {} of {:?} is {}x{}, expected {}x{}",
                pages.len(),
                path,
                dims.0,
                dims.1,
                width,
                height
            ));
        }

        let page = decoder
            .read_image()
            .with_context(|| format!("Failed to decode page {} of {:?}", pages.len(), path))?;
        pages.push(page);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .with_context(|| format!("Failed to seek to page {} of {:?}", pages.len(), path))?;
    }

    stack_pages(path, pages, height as usize, width as usize, plane)
}

fn stack_pages(
    path: &Path,
    pages: Vec<DecodingResult>,
    height: usize,
    width: usize,
    plane: usize,
) -> Result<Stack> {
    let depth = pages.len();

    macro_rules! stack_of {
        ($variant:ident) => {{
            let mut data = Vec::with_capacity(depth * plane);
            for (z, page) in pages.into_iter().enumerate() {
                match page {
                    DecodingResult::$variant(values) => {
                        if values.len() != plane {
                            return Err(anyhow!(
                                "Page {} of {:?} holds {} samples, expected {} (single channel {}x{})",
                                z, path, values.len(), plane, width, height
                            ));
                        }
                        data.extend(values);
                    }
                    _ => {
                        return Err(anyhow!(
                            "Page {} of {:?} changes sample type mid-stack",
                            z, path
                        ))
                    }
                }
            }
            Stack::$variant(
                Array3::from_shape_vec((depth, height, width), data)
                    .map_err(|e| anyhow!("Failed to shape {:?} as a stack: {}", path, e))?,
            )
        }};
    }

    let stack = match pages.first() {
        Some(DecodingResult::U8(_)) => stack_of!(U8),
        Some(DecodingResult::U16(_)) => stack_of!(U16),
        Some(DecodingResult::U32(_)) => stack_of!(U32),
        Some(DecodingResult::U64(_)) => stack_of!(U64),
        Some(DecodingResult::I8(_)) => stack_of!(I8),
        Some(DecodingResult::I16(_)) => stack_of!(I16),
        Some(DecodingResult::I32(_)) => stack_of!(I32),
        Some(DecodingResult::I64(_)) => stack_of!(I64),
        Some(DecodingResult::F32(_)) => stack_of!(F32),
        Some(DecodingResult::F64(_)) => stack_of!(F64),
        #[allow(unreachable_patterns)]
        Some(_) => return Err(anyhow!("{:?} has an unsupported sample type", path)),
        None => return Err(anyhow!("{:?} contains no pages", path)),
    };
    Ok(stack)
}

/// Write a single-page grayscale TIFF with the projection's own sample type.
pub fn write_projection(path: &Path, projection: &Projection) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    let mut encoder = TiffEncoder::new(&mut writer)?;

    let (height, width) = projection.shape();
    let (width, height) = (width as u32, height as u32);

    match projection {
        Projection::U8(a) => encoder.write_image::<colortype::Gray8>(width, height, as_plane(a, path)?),
        Projection::U16(a) => encoder.write_image::<colortype::Gray16>(width, height, as_plane(a, path)?),
        Projection::U32(a) => encoder.write_image::<colortype::Gray32>(width, height, as_plane(a, path)?),
        Projection::U64(a) => encoder.write_image::<colortype::Gray64>(width, height, as_plane(a, path)?),
        Projection::I8(a) => encoder.write_image::<colortype::GrayI8>(width, height, as_plane(a, path)?),
        Projection::I16(a) => encoder.write_image::<colortype::GrayI16>(width, height, as_plane(a, path)?),
        Projection::I32(a) => encoder.write_image::<colortype::GrayI32>(width, height, as_plane(a, path)?),
        Projection::I64(a) => encoder.write_image::<colortype::GrayI64>(width, height, as_plane(a, path)?),
        Projection::F32(a) => encoder.write_image::<colortype::Gray32Float>(width, height, as_plane(a, path)?),
        Projection::F64(a) => encoder.write_image::<colortype::Gray64Float>(width, height, as_plane(a, path)?),
    }
    .with_context(|| format!("Failed to encode {:?}", path))?;

    writer.flush()?;
    Ok(())
}

fn as_plane<'a, T>(array: &'a Array2<T>, path: &Path) -> Result<&'a [T]> {
    array
        .as_slice()
        .ok_or_else(|| anyhow!("Projection for {:?} is not contiguous", path))
}
