//! # `CifarResNet` Utilities

/// Expand a scalar to a square array.
#[inline(always)]
pub fn scalar_to_array<const D: usize, T: Copy>(value: T) -> [T; D] {
    [value; D]
}

/// Size of a strided axis: ``ceil(size / stride)``.
///
/// This is the output size of a ``3x3`` conv with ``padding = 1``, a ``1x1`` conv,
/// and a ``x[::stride]`` subsample alike.
#[inline(always)]
pub fn strided_output_size(
    size: usize,
    stride: usize,
) -> usize {
    size.div_ceil(stride)
}

/// Get the output resolution for a given input resolution.
///
/// # Arguments
///
/// - `input_resolution`: ``[height_in, width_in]``; any size.
///
/// # Returns
///
/// ``[ceil(height_in / stride), ceil(width_in / stride)]``
#[inline(always)]
pub fn strided_output_resolution(
    input_resolution: [usize; 2],
    stride: usize,
) -> [usize; 2] {
    input_resolution.map(|size| strided_output_size(size, stride))
}
