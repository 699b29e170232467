// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side staging: HWC images in, CHW binding bytes out, and back.

use ndarray::ArrayView3;
use num_traits::AsPrimitive;
use tensor_core::{DType, TensorError};

/// Casts `image` (`H × W × C`) to f32 and writes it channel-first into
/// `staging`, which is cleared first.
pub fn hwc_to_chw<T>(image: ArrayView3<'_, T>, staging: &mut Vec<f32>)
where
    T: AsPrimitive<f32>,
{
    staging.clear();
    staging.extend(image.permuted_axes([2, 0, 1]).iter().map(|&v| v.as_()));
}

/// Stages `image` into `dst` as channel-first elements of `dtype`.
pub fn encode_image<T>(
    image: ArrayView3<'_, T>,
    dtype: DType,
    staging: &mut Vec<f32>,
    dst: &mut [u8],
) -> Result<(), TensorError>
where
    T: AsPrimitive<f32>,
{
    hwc_to_chw(image, staging);
    dtype.encode(staging, dst)
}

/// Widens output binding bytes of `dtype` into `dst`.
pub fn decode_output(dtype: DType, src: &[u8], dst: &mut [f32]) -> Result<(), TensorError> {
    dtype.decode(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_hwc_to_chw_order() {
        // 1 × 2 × 3: pixel (0,0) = [1,2,3], pixel (0,1) = [4,5,6]
        let image = Array3::from_shape_vec((1, 2, 3), vec![1u8, 2, 3, 4, 5, 6]).unwrap();
        let mut staging = Vec::new();
        hwc_to_chw(image.view(), &mut staging);
        assert_eq!(staging, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_staging_is_reused() {
        let image = Array3::<f64>::from_elem((2, 2, 3), 0.5);
        let mut staging = vec![9.0; 100];
        hwc_to_chw(image.view(), &mut staging);
        assert_eq!(staging.len(), 12);
        assert!(staging.iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_encode_f16() {
        let image = Array3::<i32>::from_elem((1, 1, 3), 2);
        let mut staging = Vec::new();
        let mut bytes = [0u8; 6];
        encode_image(image.view(), DType::F16, &mut staging, &mut bytes).unwrap();
        let mut back = [0.0f32; 3];
        decode_output(DType::F16, &bytes, &mut back).unwrap();
        assert_eq!(back, [2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_encode_size_mismatch() {
        let image = Array3::<f32>::zeros((2, 2, 3));
        let mut staging = Vec::new();
        let mut bytes = [0u8; 8];
        assert!(encode_image(image.view(), DType::F32, &mut staging, &mut bytes).is_err());
    }
}
